// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking and manifest rendering

use crate::constants::crd::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::error::{KudaError, Result};
use crate::types::{Data, DataSet, GROUP, VERSION};
use kube::{discovery::Discovery, Client, CustomResourceExt};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Wait for the DataSet and Data CRDs to be served by the API server.
/// This uses exponential backoff starting at POLL_INTERVAL_SECS seconds.
pub async fn wait_for_data_crds(client: &Client) -> Result<()> {
    let mut interval = POLL_INTERVAL_SECS;

    loop {
        match check_data_crds_exist(client).await {
            Ok(true) => {
                info!("CRDs ({}/{}) are available", GROUP, VERSION);
                return Ok(());
            }
            Ok(false) => {
                info!(
                    "CRDs ({}/{}) not yet available, waiting {} seconds...",
                    GROUP, VERSION, interval
                );
            }
            Err(e) => {
                warn!(
                    "Error checking for CRDs: {}, retrying in {} seconds...",
                    e, interval
                );
            }
        }

        sleep(Duration::from_secs(interval)).await;

        // Exponential backoff with max cap
        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

/// Check if both kinds are discoverable in the data.kuda.io group.
async fn check_data_crds_exist(client: &Client) -> Result<bool> {
    let discovery = Discovery::new(client.clone())
        .filter(&[GROUP])
        .run()
        .await?;

    let mut found_dataset = false;
    let mut found_data = false;
    for group in discovery.groups() {
        if group.name() != GROUP {
            continue;
        }
        for (ar, _) in group.recommended_resources() {
            if ar.version != VERSION {
                continue;
            }
            match ar.kind.as_str() {
                "DataSet" => found_dataset = true,
                "Data" => found_data = true,
                _ => {}
            }
        }
    }

    Ok(found_dataset && found_data)
}

/// Render both CustomResourceDefinitions as a multi-document YAML stream
pub fn render_crds() -> Result<String> {
    let mut out = String::new();
    for crd in [DataSet::crd(), Data::crd()] {
        let doc = serde_yaml::to_string(&crd)
            .map_err(|e| KudaError::ConfigError(format!("Failed to render CRD: {}", e)))?;
        out.push_str("---\n");
        out.push_str(&doc);
    }
    Ok(out)
}
