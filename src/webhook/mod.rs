// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Mutating admission webhook injecting the data runtime into pods.

pub mod handler;
pub mod injector;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use kube::Client;
use tracing::info;

use crate::config::{InjectorConfig, WebhookArgs};

/// Shared state for webhook handlers
pub struct WebhookState {
    pub client: Client,
    pub config: InjectorConfig,
}

impl WebhookState {
    pub fn new(client: Client, config: InjectorConfig) -> Self {
        Self { client, config }
    }
}

/// Admission endpoints, served over TLS
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/inject", post(handler::inject_handler))
        .with_state(state)
}

/// Liveness and readiness probes, served over plain HTTP
pub fn health_router() -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
}

/// Serve the webhook and probe listeners until either fails
pub async fn run(client: Client, args: WebhookArgs) -> anyhow::Result<()> {
    let config = InjectorConfig::load(&args.config)?;
    info!(
        image = %config.runtime_image,
        affinity = config.enable_affinity,
        "Injector configuration loaded"
    );

    let tls_config = RustlsConfig::from_pem_file(args.cert_path(), args.key_path())
        .await
        .with_context(|| format!("loading TLS material from {}", args.cert_dir.display()))?;

    let probes = tokio::net::TcpListener::bind(args.health_probe_bind_address)
        .await
        .with_context(|| format!("binding probe listener {}", args.health_probe_bind_address))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let app = webhook_router(Arc::new(WebhookState::new(client, config)));

    info!(%addr, probes = %args.health_probe_bind_address, "Starting webhook server");

    tokio::try_join!(
        async {
            axum::serve(probes, health_router())
                .await
                .context("probe server failed")
        },
        async {
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
                .context("webhook server failed")
        },
    )?;

    Ok(())
}
