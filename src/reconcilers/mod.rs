// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes reconcilers that react to watch events.

pub mod data;
pub mod dataset;
pub mod pod_events;

pub use data::DataReconciler;
pub use dataset::DataSetReconciler;
