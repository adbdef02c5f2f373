// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The `DataSet` resource: a data template applied to every matching workload pod.

use crate::types::data::{Data, DataSpec};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "data.kuda.io",
    version = "v1alpha1",
    kind = "DataSet",
    plural = "datasets",
    namespaced,
    status = "DataSetStatus",
    printcolumn = r#"{"name":"DataItems","type":"integer","jsonPath":".status.dataItems"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DataSetSpec {
    /// Spec copied into every `Data` created for this set
    pub template: DataSpec,
    /// Pods whose labels contain all of these pairs receive the data
    #[serde(default)]
    pub workload_selector: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataSetStatus {
    #[serde(default)]
    pub data_items: u32,
    #[serde(default)]
    pub replicas: u32,
    /// Replicas with every data item downloaded
    #[serde(default, rename = "success")]
    pub success_replicas: u32,
    #[serde(default)]
    pub ready: String,
}

impl DataSet {
    pub fn data_item_count(&self) -> u32 {
        self.spec.template.data_items.len() as u32
    }
}

impl DataSetStatus {
    /// Roll up replica counts from the given data resources
    pub fn from_replicas<'a>(data_items: u32, replicas: impl IntoIterator<Item = &'a Data>) -> Self {
        let mut status = DataSetStatus {
            data_items,
            ..Default::default()
        };
        for data in replicas {
            status.replicas += 1;
            if data.success_count() == data_items {
                status.success_replicas += 1;
            }
        }
        status.ready = format!("{}/{}", status.success_replicas, status.replicas);
        status
    }
}
