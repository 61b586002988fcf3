// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Rollback Timer - Background task enforcing firewall confirmation deadlines
//!
//! Ticks on a fixed interval, independent of any client, and asks the
//! [`FirewallGuard`] whether the pending change is overdue. The guard decides;
//! the timer only keeps asking.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Drive automatic firewall rollback

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::firewall_guard::FirewallGuard;

pub struct RollbackTimer {
    guard: Arc<FirewallGuard>,
    tick_interval: Duration,
    shutdown_token: CancellationToken,
}

impl RollbackTimer {
    pub fn new(guard: Arc<FirewallGuard>, tick_interval: Duration) -> Self {
        Self {
            guard,
            tick_interval,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            tick_interval_secs = self.tick_interval.as_secs(),
            "Starting firewall rollback timer"
        );

        let mut tick = interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!("Checking firewall confirmation deadline");
                    if let Some(id) = self.guard.tick().await {
                        warn!(transaction_id = %id, "Firewall change was not confirmed in time and has been rolled back");
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping rollback timer");
                    break;
                }
            }
        }

        info!("Rollback timer stopped");
    }
}
