// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use clap::Parser;
use kube::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kuda::config::{Cli, Command, ControllerConfig, WebhookArgs};
use kuda::kubernetes::{render_crds, wait_for_data_crds};
use kuda::reconcilers::{DataReconciler, DataSetReconciler};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Controller(config) => run_controller(config).await,
        Command::Webhook(args) => run_webhook(args).await,
        Command::Crd => {
            print!("{}", render_crds()?);
            Ok(())
        }
    }
}

async fn run_controller(config: ControllerConfig) -> Result<()> {
    info!("Starting Kuda controller");

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Wait for the DataSet and Data CRDs before starting reconcilers
    info!("Waiting for Kuda CRDs to become available...");
    wait_for_data_crds(&client).await?;

    let data_reconciler = DataReconciler::new(client.clone(), config.clone());
    let dataset_reconciler = DataSetReconciler::new(client, config);

    info!("Starting reconcilers...");
    tokio::try_join!(data_reconciler.run(), dataset_reconciler.run())?;

    // This should never be reached as reconcilers run forever
    warn!("All reconcilers stopped unexpectedly");
    Ok(())
}

async fn run_webhook(args: WebhookArgs) -> Result<()> {
    info!("Starting Kuda pod injection webhook");

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let client = Client::try_default().await?;
    kuda::webhook::run(client, args).await
}
