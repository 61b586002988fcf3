// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Runtime ports: where plan steps and firewall rulesets meet the machine.
//!
//! The engine never interprets a step's command. It hands the step to a
//! [`StepExecutor`] and records whatever output comes back.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::firewall::FirewallRuleset;
use crate::domain::plan::Step;

/// Receives output lines while a step runs
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn line(&self, line: String);
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("failed to start command: {0}")]
    Spawn(String),

    #[error("command exited with status {0}")]
    ExitStatus(i32),

    #[error("command terminated by signal")]
    Terminated,

    #[error("{0}")]
    Failed(String),
}

/// Executes plan steps, one at a time
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &Step, output: &dyn LogSink) -> Result<(), StepError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FirewallBackendError {
    #[error("failed to read current ruleset: {0}")]
    Read(String),

    #[error("failed to install ruleset: {0}")]
    Install(String),
}

/// Installs firewall rulesets
#[async_trait]
pub trait FirewallBackend: Send + Sync {
    async fn current(&self) -> Result<FirewallRuleset, FirewallBackendError>;

    async fn install(&self, ruleset: &FirewallRuleset) -> Result<(), FirewallBackendError>;
}
