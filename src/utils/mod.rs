// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Small pure helpers shared by the reconcilers and the pod injector.

pub mod fingerprint;
pub mod matcher;

pub use fingerprint::fingerprint;
pub use matcher::matches;
