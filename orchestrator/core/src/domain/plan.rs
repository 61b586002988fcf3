// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Plans and Risk Classes
//!
//! A [`Plan`] is the human-readable preview of what a guarded operation will
//! do, produced before anything is mutated. Each plan belongs to exactly one
//! [`RiskClass`], and every risk class has a fixed confirmation phrase the
//! operator must type verbatim before the plan may be applied.
//!
//! | Risk class | Phrase | Operations |
//! |------------|--------|------------|
//! | `Add` | `ADD` | add devices to a pool |
//! | `Remove` | `REMOVE` | remove devices from a pool |
//! | `Replace` | `REPLACE` | replace one pool device with another |
//! | `MountOptions` | `MOUNT` | change a pool's mount options |
//! | `FirewallApply` | `FIREWALL` | install a new firewall ruleset |

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::mount_options::ValidationError;
use crate::domain::operation::{OperationKind, OperationRequest, ResourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    Add,
    Remove,
    Replace,
    MountOptions,
    FirewallApply,
}

impl RiskClass {
    /// The phrase an operator must type to authorise this class of change
    pub fn confirmation_phrase(&self) -> &'static str {
        match self {
            RiskClass::Add => "ADD",
            RiskClass::Remove => "REMOVE",
            RiskClass::Replace => "REPLACE",
            RiskClass::MountOptions => "MOUNT",
            RiskClass::FirewallApply => "FIREWALL",
        }
    }

    pub fn for_kind(kind: OperationKind) -> Self {
        match kind {
            OperationKind::AddDevices => RiskClass::Add,
            OperationKind::RemoveDevices => RiskClass::Remove,
            OperationKind::ReplaceDevice => RiskClass::Replace,
            OperationKind::SetMountOptions => RiskClass::MountOptions,
            OperationKind::ApplyFirewall => RiskClass::FirewallApply,
        }
    }

    /// Risk of severing administrator access, which arms the rollback timer
    pub fn may_sever_access(&self) -> bool {
        matches!(self, RiskClass::FirewallApply)
    }
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskClass::Add => "add",
            RiskClass::Remove => "remove",
            RiskClass::Replace => "replace",
            RiskClass::MountOptions => "mount_options",
            RiskClass::FirewallApply => "firewall_apply",
        };
        f.write_str(name)
    }
}

/// One ordered step of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,

    /// Imperative sentence shown to the operator
    pub description: String,

    /// Opaque command handed to the executor
    pub command: String,
}

impl Step {
    pub fn new(id: impl Into<String>, description: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            command: command.into(),
        }
    }
}

/// Immutable preview of a guarded operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub request: OperationRequest,
    pub risk_class: RiskClass,
    pub steps: Vec<Step>,

    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Plan {
    pub fn resource_id(&self) -> &ResourceId {
        &self.request.resource_id
    }

    pub fn kind(&self) -> OperationKind {
        self.request.kind()
    }

    pub fn confirmation_phrase(&self) -> &'static str {
        self.risk_class.confirmation_phrase()
    }
}

/// Errors raised while planning. No mutation has happened when these occur.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrases_are_upper_case_literals() {
        assert_eq!(RiskClass::Add.confirmation_phrase(), "ADD");
        assert_eq!(RiskClass::Remove.confirmation_phrase(), "REMOVE");
        assert_eq!(RiskClass::Replace.confirmation_phrase(), "REPLACE");
        assert_eq!(RiskClass::MountOptions.confirmation_phrase(), "MOUNT");
        assert_eq!(RiskClass::FirewallApply.confirmation_phrase(), "FIREWALL");
    }

    #[test]
    fn test_only_firewall_may_sever_access() {
        assert!(RiskClass::FirewallApply.may_sever_access());
        assert!(!RiskClass::Remove.may_sever_access());
        assert_eq!(RiskClass::for_kind(OperationKind::ReplaceDevice), RiskClass::Replace);
    }
}
