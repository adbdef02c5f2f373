// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resources served under `data.kuda.io/v1alpha1`.

pub mod data;
pub mod dataset;

pub use data::{
    AlluxioDataSource, Data, DataItem, DataItemStatus, DataPhase, DataSources, DataSpec,
    DataStatus, HdfsDataSource, Lifecycle, LifecycleHandler,
};
pub use dataset::{DataSet, DataSetSpec, DataSetStatus};

/// API group shared by both custom resources
pub const GROUP: &str = "data.kuda.io";
/// API version shared by both custom resources
pub const VERSION: &str = "v1alpha1";
