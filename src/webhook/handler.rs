// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Pod injection admission handler
//!
//! Decodes the pod from the AdmissionReview, lists the DataSets of its
//! namespace and answers with a JSON patch carrying the planned mutation.

use std::sync::Arc;

use axum::{extract::State, Json};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, DynamicObject, ListParams},
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    ResourceExt,
};
use tracing::{debug, error, info, warn};

use super::injector::decide;
use super::WebhookState;
use crate::error::{KudaError, Result};
use crate::types::DataSet;

/// POST /inject
pub async fn inject_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(admit(&state, &req).await.into_review())
}

/// Answer a single admission request
pub async fn admit(state: &WebhookState, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);

    let patch = match injection_patch(state, req).await {
        Ok(Some(patch)) => patch,
        Ok(None) => return response,
        Err(e) => {
            let code = match &e {
                KudaError::KubeError(_) => 500,
                _ => 400,
            };
            warn!(uid = %req.uid, error = %e, "Denying pod admission");
            let mut denied = response.deny(e.to_string());
            denied.result.code = code;
            return denied;
        }
    };

    match response.with_patch(patch) {
        Ok(patched) => patched,
        Err(e) => {
            error!(uid = %req.uid, error = %e, "Failed to serialize patch");
            let mut denied =
                AdmissionResponse::from(req).deny(format!("patch serialization error: {e}"));
            denied.result.code = 500;
            denied
        }
    }
}

/// The JSON patch to apply to the request's pod, if it gets injected
pub async fn injection_patch(
    state: &WebhookState,
    req: &AdmissionRequest<DynamicObject>,
) -> Result<Option<json_patch::Patch>> {
    let Some(obj) = &req.object else {
        debug!(uid = %req.uid, "No object in request, allowing unchanged");
        return Ok(None);
    };
    if req.kind.kind != "Pod" {
        debug!(uid = %req.uid, kind = %req.kind.kind, "Not a pod, allowing unchanged");
        return Ok(None);
    }

    let mut pod: Pod = serde_json::from_value(serde_json::to_value(obj)?)
        .map_err(|e| KudaError::InvalidPod(e.to_string()))?;
    let original = serde_json::to_value(&pod)?;

    let namespace = req
        .namespace
        .clone()
        .or_else(|| pod.namespace())
        .unwrap_or_else(|| "default".to_string());
    let datasets: Api<DataSet> = Api::namespaced(state.client.clone(), &namespace);
    let datasets = datasets.list(&ListParams::default()).await?.items;

    let Some(plan) = decide(&pod, &datasets, &state.config)? else {
        return Ok(None);
    };

    info!(
        uid = %req.uid,
        namespace = %namespace,
        pod = %pod.name_any(),
        dataset = %plan.dataset,
        "Injecting runtime sidecar"
    );
    plan.apply(&mut pod);

    let mutated = serde_json::to_value(&pod)?;
    Ok(Some(json_patch::diff(&original, &mutated)))
}
