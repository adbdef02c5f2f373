// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Decides whether a pod gets the runtime sidecar, and what it looks like.

use crate::config::InjectorConfig;
use crate::constants::{annotations, injection, runtime_env};
use crate::error::{KudaError, Result};
use crate::types::DataSet;
use crate::utils::matches;
use k8s_openapi::api::core::v1::{
    Affinity, Container, DownwardAPIVolumeFile, DownwardAPIVolumeSource, EmptyDirVolumeSource,
    EnvVar, EnvVarSource, HostPathVolumeSource, ObjectFieldSelector, Pod, PodAffinity,
    PodAffinityTerm, Volume, VolumeMount, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Everything that is added to a pod selected by a DataSet
#[derive(Debug, Clone, PartialEq)]
pub struct MutationPlan {
    pub dataset: String,
    pub sidecar: Container,
    pub volumes: Vec<Volume>,
    /// Mounts appended to every container already in the pod
    pub shared_mounts: Vec<VolumeMount>,
    pub affinity: Option<WeightedPodAffinityTerm>,
}

/// Pick the DataSet for `pod` and plan its mutation.
///
/// Returns `None` for pods that were already injected and for pods no
/// DataSet selects. The first DataSet in `datasets` whose selector matches
/// wins.
pub fn decide(
    pod: &Pod,
    datasets: &[DataSet],
    config: &InjectorConfig,
) -> Result<Option<MutationPlan>> {
    if pod.annotations().contains_key(annotations::DATASET) {
        return Ok(None);
    }

    let Some(dataset) = datasets
        .iter()
        .find(|ds| matches(pod.labels(), &ds.spec.workload_selector))
    else {
        return Ok(None);
    };

    let main_container = pod
        .spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .ok_or_else(|| KudaError::InvalidPod(format!("pod {} has no containers", pod.name_any())))?;

    Ok(Some(MutationPlan {
        dataset: dataset.name_any(),
        sidecar: runtime_sidecar(config, &main_container.name),
        volumes: data_volumes(config),
        shared_mounts: shared_mounts(config),
        affinity: config
            .enable_affinity
            .then(|| colocation_term(&dataset.spec.workload_selector)),
    }))
}

impl MutationPlan {
    pub fn apply(self, pod: &mut Pod) {
        let spec = pod.spec.get_or_insert_with(Default::default);

        for container in spec.containers.iter_mut() {
            container
                .volume_mounts
                .get_or_insert_with(Vec::new)
                .extend(self.shared_mounts.iter().cloned());
        }
        spec.containers.push(self.sidecar);
        spec.volumes
            .get_or_insert_with(Vec::new)
            .extend(self.volumes);

        if let Some(term) = self.affinity {
            spec.affinity
                .get_or_insert_with(Affinity::default)
                .pod_affinity
                .get_or_insert_with(PodAffinity::default)
                .preferred_during_scheduling_ignored_during_execution
                .get_or_insert_with(Vec::new)
                .push(term);
        }

        pod.annotations_mut()
            .insert(annotations::DATASET.to_string(), self.dataset);
    }
}

fn field_ref(path: impl Into<String>) -> Option<EnvVarSource> {
    Some(EnvVarSource {
        field_ref: Some(ObjectFieldSelector {
            field_path: path.into(),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn runtime_sidecar(config: &InjectorConfig, main_container: &str) -> Container {
    let mut volume_mounts = vec![VolumeMount {
        name: injection::VOLUME_POD_DATA.to_string(),
        mount_path: injection::POD_INFO_MOUNT_PATH.to_string(),
        ..Default::default()
    }];
    volume_mounts.extend(shared_mounts(config));

    Container {
        name: injection::SIDECAR_CONTAINER_NAME.to_string(),
        image: Some(config.runtime_image.clone()),
        args: Some(vec![
            format!("--download-root-dir={}", config.host_path),
            format!("--local-root-dir={}", config.data_path_prefix),
            format!("--notice-server-port={}", config.runtime_server_port),
        ]),
        env: Some(vec![
            EnvVar {
                name: runtime_env::DATASET_NAME.to_string(),
                value_from: field_ref(format!("metadata.annotations['{}']", annotations::DATASET)),
                ..Default::default()
            },
            EnvVar {
                name: runtime_env::DATASET_NAMESPACE.to_string(),
                value_from: field_ref("metadata.namespace"),
                ..Default::default()
            },
            EnvVar {
                name: runtime_env::POD_NAME.to_string(),
                value_from: field_ref("metadata.name"),
                ..Default::default()
            },
            EnvVar {
                name: runtime_env::MAIN_CONTAINER_NAME.to_string(),
                value: Some(main_container.to_string()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    }
}

fn shared_mounts(config: &InjectorConfig) -> Vec<VolumeMount> {
    vec![
        VolumeMount {
            name: injection::VOLUME_SHARE_DATA.to_string(),
            mount_path: config.data_path_prefix.clone(),
            ..Default::default()
        },
        VolumeMount {
            name: injection::VOLUME_HOST_DATA.to_string(),
            mount_path: config.host_path.clone(),
            ..Default::default()
        },
    ]
}

fn data_volumes(config: &InjectorConfig) -> Vec<Volume> {
    vec![
        Volume {
            name: injection::VOLUME_SHARE_DATA.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: injection::VOLUME_HOST_DATA.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: config.host_path.clone(),
                type_: Some("DirectoryOrCreate".to_string()),
            }),
            ..Default::default()
        },
        Volume {
            name: injection::VOLUME_POD_DATA.to_string(),
            downward_api: Some(DownwardAPIVolumeSource {
                items: Some(vec![DownwardAPIVolumeFile {
                    path: "annotations".to_string(),
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "metadata.annotations".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        },
    ]
}

/// Soft preference for nodes already running pods of the same workload
fn colocation_term(selector: &BTreeMap<String, String>) -> WeightedPodAffinityTerm {
    WeightedPodAffinityTerm {
        weight: 1,
        pod_affinity_term: PodAffinityTerm {
            label_selector: Some(LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            }),
            topology_key: injection::AFFINITY_TOPOLOGY_KEY.to_string(),
            ..Default::default()
        },
    }
}
