// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery and RBAC management.

pub mod crd;
pub mod rbac;

pub use crd::{render_crds, wait_for_data_crds};
pub use rbac::ensure_runtime_role_binding;
