// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! DataSet reconciler - fans a DataSet out to one Data per matching pod.

use crate::config::ControllerConfig;
use crate::constants::labels;
use crate::error::{is_already_exists, is_not_found, KudaError, Result};
use crate::reconcilers::pod_events::pod_triggers;
use crate::types::{Data, DataSet, DataSetStatus};
use crate::utils::matcher::to_label_selector;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams},
    runtime::{controller::Action, Controller},
    Api, Client, Resource, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub struct DataSetReconciler {
    client: Client,
    config: ControllerConfig,
}

/// Name of the Data provisioning `pod_name` for `dataset_name`: the DataSet
/// name followed by the last two dash separated tokens of the pod name.
pub fn data_name_for_pod(dataset_name: &str, pod_name: &str) -> String {
    let tokens: Vec<&str> = pod_name.split('-').collect();
    let suffix = if tokens.len() >= 2 {
        tokens[tokens.len() - 2..].join("-")
    } else {
        pod_name.to_string()
    };
    format!("{}-{}", dataset_name, suffix)
}

/// Build the Data for `pod_name` from the DataSet's current template
pub fn new_data(dataset: &DataSet, pod_name: &str) -> Result<Data> {
    let owner = dataset
        .controller_owner_ref(&())
        .ok_or(KudaError::MissingMetadata("uid"))?;

    Ok(Data {
        metadata: ObjectMeta {
            name: Some(data_name_for_pod(&dataset.name_any(), pod_name)),
            namespace: dataset.namespace(),
            labels: Some(BTreeMap::from([
                (labels::DATASET.to_string(), dataset.name_any()),
                (labels::POD.to_string(), pod_name.to_string()),
            ])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: dataset.spec.template.clone(),
        status: None,
    })
}

impl DataSetReconciler {
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        Self { client, config }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let datasets: Api<DataSet> = Api::all(self.client.clone());
        let datas: Api<Data> = Api::all(self.client.clone());
        let pods: Api<Pod> = Api::all(self.client.clone());
        let context = Arc::new(self);

        Controller::new(datasets, WatcherConfig::default())
            .owns(datas, WatcherConfig::default())
            .reconcile_on(pod_triggers(pods))
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled dataset: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }

    /// Reconcile the DataSet `namespace/name`.
    #[instrument(skip(self))]
    pub async fn reconcile_dataset(&self, namespace: &str, name: &str) -> Result<()> {
        let datasets: Api<DataSet> = Api::namespaced(self.client.clone(), namespace);
        let Some(dataset) = datasets.get_opt(name).await? else {
            debug!("DataSet {}/{} not found, it has been deleted", namespace, name);
            return Ok(());
        };

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector = to_label_selector(&dataset.spec.workload_selector);
        let pod_params = if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(&selector)
        };
        let pods = pods.list(&pod_params).await?.items;

        let datas: Api<Data> = Api::namespaced(self.client.clone(), namespace);
        let owned = datas
            .list(&ListParams::default().labels(&format!("{}={}", labels::DATASET, name)))
            .await?
            .items;

        self.sync_dataset(&datasets, &datas, &dataset, &pods, owned)
            .await
    }

    async fn sync_dataset(
        &self,
        datasets: &Api<DataSet>,
        datas: &Api<Data>,
        dataset: &DataSet,
        pods: &[Pod],
        owned: Vec<Data>,
    ) -> Result<()> {
        let mut existing: HashMap<String, Data> = owned
            .into_iter()
            .map(|d| (d.name_any(), d))
            .collect();
        let mut current = Vec::with_capacity(pods.len());

        for pod in pods {
            let pod_name = pod.name_any();
            let data_name = data_name_for_pod(&dataset.name_any(), &pod_name);

            match existing.remove(&data_name) {
                Some(data) => current.push(update_data(datas, dataset, data).await?),
                None => current.push(create_data(datas, dataset, &pod_name).await?),
            }
        }

        // whatever is left belongs to pods that are gone or no longer match
        let live_pods: HashSet<String> = pods.iter().map(|p| p.name_any()).collect();
        for data in existing.into_values() {
            if data.pod_name().is_some_and(|p| live_pods.contains(p)) {
                current.push(data);
                continue;
            }
            prune_data(datas, &data).await?;
        }

        update_dataset_status(datasets, dataset, &current).await
    }
}

/// Create the Data for a pod. Losing a create race to another reconcile is fine.
async fn create_data(datas: &Api<Data>, dataset: &DataSet, pod_name: &str) -> Result<Data> {
    let data = new_data(dataset, pod_name)?;

    match datas.create(&PostParams::default(), &data).await {
        Ok(created) => {
            info!(
                "Created data {} for pod {}",
                created.name_any(),
                pod_name
            );
            Ok(created)
        }
        Err(e) if is_already_exists(&e) => {
            debug!("Data {} already exists", data.name_any());
            Ok(data)
        }
        Err(e) => {
            error!("Failed to create data {}: {}", data.name_any(), e);
            Err(e.into())
        }
    }
}

/// Bring an existing Data's spec back in line with the DataSet template
async fn update_data(datas: &Api<Data>, dataset: &DataSet, mut data: Data) -> Result<Data> {
    if data.spec == dataset.spec.template {
        return Ok(data);
    }

    data.spec = dataset.spec.template.clone();
    let updated = datas
        .replace(&data.name_any(), &PostParams::default(), &data)
        .await?;
    info!("Updated data {} to the current template", updated.name_any());
    Ok(updated)
}

async fn prune_data(datas: &Api<Data>, data: &Data) -> Result<()> {
    match datas.delete(&data.name_any(), &DeleteParams::default()).await {
        Ok(_) => {
            info!("Deleted data {} for vanished pod", data.name_any());
            Ok(())
        }
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => {
            error!("Failed to delete data {}: {}", data.name_any(), e);
            Err(e.into())
        }
    }
}

/// Replicas count as successful once every data item has downloaded
async fn update_dataset_status(
    datasets: &Api<DataSet>,
    dataset: &DataSet,
    replicas: &[Data],
) -> Result<()> {
    let status = DataSetStatus::from_replicas(dataset.data_item_count(), replicas);
    if dataset.status.as_ref() == Some(&status) {
        return Ok(());
    }

    let patch = json!({ "status": status });
    datasets
        .patch_status(&dataset.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    info!(
        "Updated status of dataset {}: ready {}",
        dataset.name_any(),
        status.ready
    );
    Ok(())
}

async fn reconcile(dataset: Arc<DataSet>, ctx: Arc<DataSetReconciler>) -> Result<Action> {
    let name = dataset.name_any();
    let namespace = dataset
        .namespace()
        .ok_or(KudaError::MissingMetadata("namespace"))?;

    ctx.reconcile_dataset(&namespace, &name).await?;

    // periodic resync picks up pod deletions the watch missed
    Ok(Action::requeue(ctx.config.resync_after()))
}

fn error_policy(_dataset: Arc<DataSet>, error: &KudaError, ctx: Arc<DataSetReconciler>) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(ctx.config.requeue_after())
}
