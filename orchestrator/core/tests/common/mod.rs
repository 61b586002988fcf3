// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use warden_core::application::coordinator::TransactionCoordinator;
use warden_core::application::services::{Overrides, Services};
use warden_core::domain::firewall::{
    DefaultPolicy, FirewallRule, FirewallRuleset, Protocol, RuleAction, FIREWALL_RESOURCE,
};
use warden_core::domain::node_config::NodeConfigManifest;
use warden_core::domain::operation::{DeviceReplacement, FirewallChange, Operation, OperationRequest};
use warden_core::domain::plan::Step;
use warden_core::domain::runtime::{LogSink, StepError, StepExecutor};
use warden_core::domain::transaction::{TransactionId, TransactionStatus};
use warden_core::infrastructure::firewall_backend::InMemoryFirewallBackend;

/// Holds every step until the test hands out permits
pub struct GatedExecutor {
    permits: Arc<Semaphore>,
}

impl GatedExecutor {
    pub fn new() -> (Self, Arc<Semaphore>) {
        let permits = Arc::new(Semaphore::new(0));
        (
            Self {
                permits: permits.clone(),
            },
            permits,
        )
    }
}

#[async_trait]
impl StepExecutor for GatedExecutor {
    async fn execute(&self, step: &Step, output: &dyn LogSink) -> Result<(), StepError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| StepError::Failed(e.to_string()))?;
        permit.forget();
        output.line(format!("ran {}", step.id)).await;
        Ok(())
    }
}

/// Fails the step with the given id, succeeds otherwise
pub struct FailingExecutor {
    pub fail_step: &'static str,
}

#[async_trait]
impl StepExecutor for FailingExecutor {
    async fn execute(&self, step: &Step, output: &dyn LogSink) -> Result<(), StepError> {
        output.line(format!("ran {}", step.id)).await;
        if step.id == self.fail_step {
            Err(StepError::ExitStatus(1))
        } else {
            Ok(())
        }
    }
}

pub async fn services_with(overrides: Overrides) -> Services {
    Services::build_with(&NodeConfigManifest::default(), overrides)
        .await
        .unwrap()
}

pub async fn dry_run_services() -> Services {
    services_with(Overrides::default()).await
}

pub async fn firewall_services() -> (Services, InMemoryFirewallBackend) {
    let backend = InMemoryFirewallBackend::new(FirewallRuleset::default());
    let services = services_with(Overrides {
        firewall_backend: Some(Arc::new(backend.clone())),
        ..Default::default()
    })
    .await;
    (services, backend)
}

pub fn replace_request(pool: &str, old: &str, new: &str) -> OperationRequest {
    OperationRequest::new(
        pool,
        Operation::ReplaceDevice(DeviceReplacement {
            old_device: Some(old.to_string()),
            new_device: Some(new.to_string()),
            topology: None,
        }),
    )
}

pub fn lockdown_ruleset() -> FirewallRuleset {
    FirewallRuleset {
        default_policy: DefaultPolicy::Drop,
        rules: vec![FirewallRule {
            action: RuleAction::Allow,
            protocol: Protocol::Tcp,
            port: Some(22),
            source: Some("10.0.0.0/8".to_string()),
            comment: Some("ssh from the management network".to_string()),
        }],
    }
}

pub fn firewall_request(ruleset: FirewallRuleset) -> OperationRequest {
    OperationRequest::new(FIREWALL_RESOURCE, Operation::ApplyFirewall(FirewallChange { ruleset }))
}

pub async fn wait_for_terminal(coordinator: &TransactionCoordinator, id: &TransactionId) -> TransactionStatus {
    for _ in 0..500 {
        let status = coordinator.status(id).await.unwrap();
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transaction {} did not finish", id);
}

/// Wait until some log line of the transaction contains `needle`
pub async fn wait_for_log_line(coordinator: &TransactionCoordinator, id: &TransactionId, needle: &str) {
    for _ in 0..500 {
        let tx = coordinator.get(id).await.unwrap();
        if tx.log().iter().any(|line| line.contains(needle)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transaction {} never logged '{}'", id, needle);
}
