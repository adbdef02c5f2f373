// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Data reconciler - keeps each Data in step with the pod it provisions.
//!
//! The pod's digest annotation is the handshake with the runtime sidecar: a
//! new digest starts a new download epoch, so the Data status is reset to
//! all-waiting whenever the pod does not yet carry the current digest.

use crate::config::ControllerConfig;
use crate::constants::{annotations, rbac, DATA_FINALIZER};
use crate::error::{is_not_found, KudaError, Result};
use crate::kubernetes::ensure_runtime_role_binding;
use crate::types::{Data, DataStatus};
use crate::utils::fingerprint;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Patch, PatchParams, PostParams},
    runtime::{controller::Action, Controller},
    Api, Client, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub struct DataReconciler {
    client: Client,
    config: ControllerConfig,
}

impl DataReconciler {
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        Self { client, config }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let datas: Api<Data> = Api::all(self.client.clone());
        let context = Arc::new(self);

        Controller::new(datas, WatcherConfig::default())
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled data: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }

    /// Reconcile the Data `namespace/name` against its pod.
    #[instrument(skip(self))]
    pub async fn reconcile_data(&self, namespace: &str, name: &str) -> Result<()> {
        let datas: Api<Data> = Api::namespaced(self.client.clone(), namespace);
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let Some(mut data) = datas.get_opt(name).await? else {
            debug!("Data {}/{} not found, it has been deleted", namespace, name);
            return Ok(());
        };

        let pod = match data.pod_name() {
            Some(pod_name) => pods.get_opt(pod_name).await?,
            None => None,
        };

        let Some(pod) = pod else {
            if data.has_finalizer() {
                info!(
                    "Pod for data {}/{} is gone, releasing finalizer",
                    namespace, name
                );
                remove_finalizer(&datas, &mut data).await?;
            }
            return Ok(());
        };

        self.sync_data(&datas, &pods, data, pod).await
    }

    async fn sync_data(
        &self,
        datas: &Api<Data>,
        pods: &Api<Pod>,
        mut data: Data,
        mut pod: Pod,
    ) -> Result<()> {
        let digest = fingerprint(&data.spec)?;

        update_status(datas, &mut data, &pod, &digest).await?;

        let namespace = data
            .namespace()
            .ok_or(KudaError::MissingMetadata("namespace"))?;
        ensure_runtime_role_binding(&self.client, service_account(&pod), &namespace).await?;

        update_pod_digest(pods, &mut pod, &digest).await?;

        if data.is_deleting() {
            if data.has_finalizer() {
                clear_pod_digest(pods, &mut pod).await?;
                remove_finalizer(datas, &mut data).await?;
            }
            return Ok(());
        }

        if !data.has_finalizer() {
            data.finalizers_mut().push(DATA_FINALIZER.to_string());
            data = datas
                .replace(&data.name_any(), &PostParams::default(), &data)
                .await?;
            debug!("Added finalizer to data {}", data.name_any());
        }

        Ok(())
    }
}

/// Service account the runtime sidecar runs as
fn service_account(pod: &Pod) -> &str {
    pod.spec
        .as_ref()
        .and_then(|s| s.service_account_name.as_deref())
        .filter(|sa| !sa.is_empty())
        .unwrap_or(rbac::DEFAULT_SERVICE_ACCOUNT)
}

/// Reset the status when the pod has not seen `digest` yet, otherwise refresh
/// the rollup counts from the phases the sidecar reported.
async fn update_status(datas: &Api<Data>, data: &mut Data, pod: &Pod, digest: &str) -> Result<()> {
    let name = data.name_any();
    let pod_digest = pod.annotations().get(annotations::DIGEST);

    if pod_digest.map(String::as_str) != Some(digest) {
        let status = DataStatus::initial(&data.spec);
        let mut patch = json!({ "status": status });
        if let Some(rv) = data.resource_version() {
            // full overwrite, guarded against concurrent writers
            patch["metadata"] = json!({ "resourceVersion": rv });
        }
        *data = datas
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!("Reset status of data {} for digest {}", name, digest);
        return Ok(());
    }

    let status = DataStatus::recount(&data.spec, data.status.as_ref());
    if data.status.as_ref() != Some(&status) {
        // item phases belong to the sidecar, only the counters are ours
        let patch = json!({
            "status": {
                "dataItems": status.data_items,
                "success": status.success,
                "waiting": status.waiting,
                "downloading": status.downloading,
                "failed": status.failed,
                "ready": status.ready,
            }
        });
        *data = datas
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!("Updated status of data {}: ready {}", name, status.ready);
    }

    Ok(())
}

async fn update_pod_digest(pods: &Api<Pod>, pod: &mut Pod, digest: &str) -> Result<()> {
    if pod.annotations().get(annotations::DIGEST).map(String::as_str) == Some(digest) {
        return Ok(());
    }

    pod.annotations_mut()
        .insert(annotations::DIGEST.to_string(), digest.to_string());
    *pod = pods
        .replace(&pod.name_any(), &PostParams::default(), pod)
        .await?;
    info!("Annotated pod {} with digest {}", pod.name_any(), digest);
    Ok(())
}

/// Drop the digest annotation so the sidecar stops tracking the data. A pod
/// that disappeared meanwhile needs no cleanup.
async fn clear_pod_digest(pods: &Api<Pod>, pod: &mut Pod) -> Result<()> {
    if pod.annotations_mut().remove(annotations::DIGEST).is_none() {
        return Ok(());
    }

    match pods
        .replace(&pod.name_any(), &PostParams::default(), pod)
        .await
    {
        Ok(updated) => {
            *pod = updated;
            Ok(())
        }
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => {
            error!("Failed to clear digest on pod {}: {}", pod.name_any(), e);
            Err(e.into())
        }
    }
}

async fn remove_finalizer(datas: &Api<Data>, data: &mut Data) -> Result<()> {
    data.finalizers_mut().retain(|f| f != DATA_FINALIZER);
    match datas
        .replace(&data.name_any(), &PostParams::default(), data)
        .await
    {
        Ok(updated) => {
            *data = updated;
            Ok(())
        }
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn reconcile(data: Arc<Data>, ctx: Arc<DataReconciler>) -> Result<Action> {
    let name = data.name_any();
    let namespace = data
        .namespace()
        .ok_or(KudaError::MissingMetadata("namespace"))?;

    ctx.reconcile_data(&namespace, &name).await?;

    Ok(Action::await_change())
}

fn error_policy(_data: Arc<Data>, error: &KudaError, ctx: Arc<DataReconciler>) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(ctx.config.requeue_after())
}
