// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon HTTP server implementation

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use warden_core::{
    application::services::Services,
    domain::node_config::NodeConfigManifest,
    presentation::api,
};

pub async fn start_daemon(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    info!("Warden daemon starting (PID: {})", std::process::id());

    let config =
        NodeConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    info!(
        node = %config.metadata.name,
        executor = ?config.spec.executor.mode,
        storage = ?config.spec.storage.backend,
        "Configuration loaded"
    );

    if config.spec.observability.metrics_enabled {
        install_metrics_exporter(&config.spec.observability.metrics_listen)?;
    }

    let services = Services::build(&config)
        .await
        .context("Failed to initialize services")?;

    let timer = Arc::clone(&services.rollback_timer);
    let timer_shutdown = timer.shutdown_token();
    let timer_handle = timer.start();

    let app = api::app(services);

    let addr = format!(
        "{}:{}",
        host.unwrap_or_else(|| config.spec.api.host.clone()),
        port.unwrap_or(config.spec.api.port)
    );
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Daemon listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    timer_shutdown.cancel();
    if let Err(e) = timer_handle.await {
        warn!("Rollback timer did not stop cleanly: {}", e);
    }

    info!("Daemon shutting down");

    Ok(())
}

fn install_metrics_exporter(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("Invalid metrics listen address: {}", listen))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
