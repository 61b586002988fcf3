// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Service wiring.
//!
//! Builds the planner, coordinator, firewall guard and mount option service
//! for a node from its [`NodeConfigManifest`].

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::application::coordinator::TransactionCoordinator;
use crate::application::firewall_guard::FirewallGuard;
use crate::application::journal::TransactionJournal;
use crate::application::mount_options::MountOptionsService;
use crate::application::planner::{PlanEngine, PlannerConfig};
use crate::application::repository_factory::{create_repositories, Repositories};
use crate::application::reservations::ReservationTable;
use crate::application::rollback_timer::RollbackTimer;
use crate::domain::firewall::FirewallRuleset;
use crate::domain::node_config::{ExecutorMode, NodeConfigManifest};
use crate::domain::runtime::{FirewallBackend, StepExecutor};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::executors::{DryRunStepExecutor, ShellStepExecutor};
use crate::infrastructure::firewall_backend::{FileFirewallBackend, InMemoryFirewallBackend};

#[derive(Clone)]
pub struct Services {
    pub planner: PlanEngine,
    pub coordinator: Arc<TransactionCoordinator>,
    pub firewall: Arc<FirewallGuard>,
    pub mount_options: MountOptionsService,
    pub event_bus: EventBus,
    pub rollback_timer: Arc<RollbackTimer>,
}

/// Optional replacements for the configured backends
#[derive(Default)]
pub struct Overrides {
    pub executor: Option<Arc<dyn StepExecutor>>,
    pub firewall_backend: Option<Arc<dyn FirewallBackend>>,
    pub repositories: Option<Repositories>,
}

impl Services {
    pub async fn build(config: &NodeConfigManifest) -> anyhow::Result<Self> {
        Self::build_with(config, Overrides::default()).await
    }

    pub async fn build_with(config: &NodeConfigManifest, overrides: Overrides) -> anyhow::Result<Self> {
        let spec = &config.spec;

        let repositories = match overrides.repositories {
            Some(repositories) => repositories,
            None => {
                let backend = spec.storage.backend()?;
                create_repositories(&backend).context("Failed to open transaction store")?
            }
        };

        let executor: Arc<dyn StepExecutor> = match overrides.executor {
            Some(executor) => executor,
            None => match spec.executor.mode {
                ExecutorMode::DryRun => Arc::new(DryRunStepExecutor::new()),
                ExecutorMode::Shell => Arc::new(ShellStepExecutor::new()),
            },
        };

        let firewall_backend: Arc<dyn FirewallBackend> = match overrides.firewall_backend {
            Some(backend) => backend,
            None => match &spec.firewall.ruleset_path {
                Some(path) => Arc::new(FileFirewallBackend::new(path.clone())),
                None => Arc::new(InMemoryFirewallBackend::new(FirewallRuleset::default())),
            },
        };

        let event_bus = EventBus::with_default_capacity();
        let journal = TransactionJournal::new(repositories.transactions.clone(), event_bus.clone());
        let reservations = ReservationTable::new();

        let firewall = Arc::new(FirewallGuard::new(
            firewall_backend,
            repositories.firewall.clone(),
            journal.clone(),
            reservations.clone(),
            spec.firewall.grace_period(),
        ));

        let mount_options = MountOptionsService::new(repositories.mount_options.clone());
        mount_options
            .seed_active(&spec.pools.mounted)
            .await
            .context("Failed to record mounted pool options")?;

        let coordinator = Arc::new(
            TransactionCoordinator::new(
                journal,
                reservations,
                executor,
                firewall.clone(),
                mount_options.clone(),
            )
            .await
            .context("Failed to initialise transaction coordinator")?,
        );

        let interrupted = coordinator
            .recover()
            .await
            .context("Failed to recover transactions from previous run")?;
        if interrupted > 0 {
            info!(interrupted, "Recovered transactions interrupted by a restart");
        }

        let planner = PlanEngine::new(PlannerConfig {
            mount_root: spec.pools.mount_root.clone(),
            admin_port: spec.firewall.admin_port,
            grace_period: spec.firewall.grace_period(),
        });

        let rollback_timer = Arc::new(RollbackTimer::new(firewall.clone(), spec.firewall.tick_interval()));

        Ok(Self {
            planner,
            coordinator,
            firewall,
            mount_options,
            event_bus,
            rollback_timer,
        })
    }
}
