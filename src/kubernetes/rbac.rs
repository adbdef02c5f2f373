// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! RoleBindings for the runtime sidecar's service account

use crate::constants::{labels, rbac, OPERATOR_NAME};
use crate::error::{is_already_exists, is_not_found, Result};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use kube::{
    api::{ObjectMeta, PostParams},
    Api, Client, ResourceExt,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Name of the RoleBinding granted to `service_account`
pub fn role_binding_name(service_account: &str) -> String {
    format!("{}-{}", service_account, rbac::RUNTIME_ROLE_BINDING_SUFFIX)
}

/// Build the RoleBinding binding the runtime ClusterRole to `service_account`
pub fn runtime_role_binding(service_account: &str, namespace: &str) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(role_binding_name(service_account)),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                labels::MANAGED_BY.to_string(),
                OPERATOR_NAME.to_string(),
            )])),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: rbac::RUNTIME_CLUSTER_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// Ensure the runtime RoleBinding for a service account exists, create it if it doesn't.
///
/// An existing RoleBinding is never updated. One that was not created by the
/// operator is left alone.
#[instrument(skip(client))]
pub async fn ensure_runtime_role_binding(
    client: &Client,
    service_account: &str,
    namespace: &str,
) -> Result<()> {
    let bindings: Api<RoleBinding> = Api::namespaced(client.clone(), namespace);
    let desired = runtime_role_binding(service_account, namespace);
    let name = desired.name_any();

    match bindings.get(&name).await {
        Ok(existing) => {
            let managed = existing
                .labels()
                .get(labels::MANAGED_BY)
                .is_some_and(|v| v == OPERATOR_NAME);
            if managed {
                debug!("RoleBinding {}/{} already exists", namespace, name);
            } else {
                warn!(
                    "RoleBinding {}/{} exists but is not managed by {}, not adopting it",
                    namespace, name, OPERATOR_NAME
                );
            }
            Ok(())
        }
        Err(e) if is_not_found(&e) => {
            info!("Creating RoleBinding {}/{}", namespace, name);
            match bindings.create(&PostParams::default(), &desired).await {
                Ok(_) => Ok(()),
                Err(e) if is_already_exists(&e) => {
                    debug!("RoleBinding {}/{} was created concurrently", namespace, name);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}
