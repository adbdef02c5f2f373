// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The `Data` resource: one per (DataSet, pod) pair, tracking download state.

use crate::constants::{labels, DATA_FINALIZER};
use k8s_openapi::api::core::v1::{ExecAction, HTTPGetAction};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::Utc;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "data.kuda.io",
    version = "v1alpha1",
    kind = "Data",
    plural = "datas",
    namespaced,
    status = "DataStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DataSpec {
    /// Data items to download, in order
    pub data_items: Vec<DataItem>,
    /// Hooks applied to every item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
    /// Connection details of the remote storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_sources: Option<DataSources>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataItem {
    /// Unique within `namespace`
    pub name: String,
    pub namespace: String,
    /// Location on the remote storage
    pub remote_path: String,
    /// Location inside the application container
    pub local_path: String,
    pub version: String,
    pub data_source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
}

/// Actions the runtime sidecar takes around a download.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_download: Option<LifecycleHandler>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_download: Option<LifecycleHandler>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleHandler {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HTTPGetAction>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataSources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdfs: Option<HdfsDataSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alluxio: Option<AlluxioDataSource>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HdfsDataSource {
    pub addresses: Vec<String>,
    pub user_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlluxioDataSource {
    pub host: String,
    pub port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DataPhase {
    #[default]
    Waiting,
    Downloading,
    Success,
    Failed,
    /// A phase this operator does not know; left out of the rollup
    #[serde(other)]
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataStatus {
    #[serde(default)]
    pub data_items_status: Vec<DataItemStatus>,
    #[serde(default)]
    pub data_items: u32,
    #[serde(default)]
    pub success: u32,
    #[serde(default)]
    pub waiting: u32,
    #[serde(default)]
    pub downloading: u32,
    #[serde(default)]
    pub failed: u32,
    /// `"success/total"`
    #[serde(default)]
    pub ready: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataItemStatus {
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub phase: DataPhase,
    pub start_time: Time,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DataStatus {
    /// Status at the start of a download epoch: every item waiting, fresh start times.
    pub fn initial(spec: &DataSpec) -> Self {
        let now = Time(Utc::now());
        let total = spec.data_items.len() as u32;

        DataStatus {
            data_items_status: spec
                .data_items
                .iter()
                .map(|item| DataItemStatus {
                    name: item.name.clone(),
                    namespace: item.namespace.clone(),
                    version: item.version.clone(),
                    phase: DataPhase::Waiting,
                    start_time: now.clone(),
                    message: None,
                })
                .collect(),
            data_items: total,
            waiting: total,
            ready: format!("0/{}", total),
            ..Default::default()
        }
    }

    /// Recount the rollup fields from the item phases already recorded in `current`.
    pub fn recount(spec: &DataSpec, current: Option<&DataStatus>) -> Self {
        let items = current
            .map(|s| s.data_items_status.clone())
            .unwrap_or_default();
        let total = spec.data_items.len() as u32;

        let mut status = DataStatus {
            data_items: total,
            ..Default::default()
        };
        for item in &items {
            match item.phase {
                DataPhase::Waiting => status.waiting += 1,
                DataPhase::Downloading => status.downloading += 1,
                DataPhase::Success => status.success += 1,
                DataPhase::Failed => status.failed += 1,
                DataPhase::Unknown => {}
            }
        }
        status.ready = format!("{}/{}", status.success, total);
        status.data_items_status = items;
        status
    }
}

impl Data {
    /// Name of the pod this resource provisions, taken from its `kuda.io/pod` label
    pub fn pod_name(&self) -> Option<&str> {
        self.labels()
            .get(labels::POD)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    /// Number of items whose download finished, zero when no status was recorded yet
    pub fn success_count(&self) -> u32 {
        self.status.as_ref().map(|s| s.success).unwrap_or(0)
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == DATA_FINALIZER)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
