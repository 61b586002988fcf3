// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - Serving the guarded operation API
//! - Running the firewall rollback timer
//! - HTTP health checks
//! - Graceful shutdown

use anyhow::Result;
use std::time::Duration;

pub mod client;
pub mod server;

pub use client::DaemonClient;
pub use server::start_daemon;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8600;

#[derive(Debug, Clone)]
pub enum DaemonStatus {
    Running { uptime: Option<u64> },
    Stopped,
    Unhealthy { error: String },
}

/// Base URL for a host/port pair; a host that already carries a scheme is kept as is
pub fn base_url(host: &str, port: u16) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}:{}", host, port)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// Check if the daemon answers its health endpoint
pub async fn check_daemon_running(host: &str, port: u16) -> Result<DaemonStatus> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()?;

    let health_url = format!("{}/health", base_url(host, port));

    match client.get(&health_url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let uptime = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v["uptime_seconds"].as_u64());
            Ok(DaemonStatus::Running { uptime })
        }
        Ok(resp) => Ok(DaemonStatus::Unhealthy {
            error: format!("health check returned {}", resp.status()),
        }),
        Err(e) if e.is_connect() || e.is_timeout() => Ok(DaemonStatus::Stopped),
        Err(e) => Ok(DaemonStatus::Unhealthy {
            error: e.to_string(),
        }),
    }
}
