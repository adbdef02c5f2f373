// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::error::{KudaError, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command line of the `kuda` binary. Every flag can also be set from the environment.
#[derive(Debug, Parser)]
#[command(name = "kuda", version, about = "Per-workload data provisioning for Kubernetes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the DataSet and Data controllers
    Controller(ControllerConfig),
    /// Serve the pod injection admission webhook
    Webhook(WebhookArgs),
    /// Print the CustomResourceDefinitions as YAML
    Crd,
}

/// Controller settings
#[derive(Debug, Clone, Args)]
pub struct ControllerConfig {
    /// Seconds before a failed reconcile is retried
    #[arg(long, env = "KUDA_REQUEUE_SECS", default_value_t = 60)]
    pub requeue_secs: u64,
    /// Seconds between periodic DataSet resyncs
    #[arg(long, env = "KUDA_RESYNC_SECS", default_value_t = 300)]
    pub resync_secs: u64,
}

impl ControllerConfig {
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }

    pub fn resync_after(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            requeue_secs: 60,
            resync_secs: 300,
        }
    }
}

/// Webhook server settings
#[derive(Debug, Clone, Args)]
pub struct WebhookArgs {
    /// Port the admission endpoint is served on
    #[arg(long, env = "KUDA_WEBHOOK_PORT", default_value_t = 8443)]
    pub port: u16,
    /// Directory holding tls.crt and tls.key
    #[arg(long, env = "KUDA_CERT_DIR", default_value = "/etc/webhook/certs")]
    pub cert_dir: PathBuf,
    /// Injector configuration file
    #[arg(long, env = "KUDA_WEBHOOK_CONFIG", default_value = "/etc/webhook/config.yaml")]
    pub config: PathBuf,
    /// Address the health probe endpoints bind to
    #[arg(long, env = "KUDA_HEALTH_PROBE_ADDR", default_value = "0.0.0.0:8081")]
    pub health_probe_bind_address: SocketAddr,
}

impl WebhookArgs {
    pub fn cert_path(&self) -> PathBuf {
        self.cert_dir.join("tls.crt")
    }

    pub fn key_path(&self) -> PathBuf {
        self.cert_dir.join("tls.key")
    }
}

/// What the injector adds to matched pods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectorConfig {
    /// Image of the runtime sidecar
    pub runtime_image: String,
    /// Host directory the runtime downloads into
    pub host_path: String,
    /// Directory where data appears inside application containers
    pub data_path_prefix: String,
    #[serde(default)]
    pub enable_affinity: bool,
    /// Port the runtime listens on for download notices
    pub runtime_server_port: u16,
}

impl InjectorConfig {
    /// Load the injector configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            KudaError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: InjectorConfig = serde_yaml::from_str(raw)
            .map_err(|e| KudaError::ConfigError(format!("Failed to parse config: {}", e)))?;

        if config.runtime_image.is_empty() {
            return Err(KudaError::ConfigError("runtimeImage must be set".to_string()));
        }
        if config.host_path.is_empty() || config.data_path_prefix.is_empty() {
            return Err(KudaError::ConfigError(
                "hostPath and dataPathPrefix must be set".to_string(),
            ));
        }
        Ok(config)
    }
}
