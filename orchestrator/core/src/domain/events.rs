// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain events emitted while guarded operations run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::firewall::RollbackReason;
use crate::domain::operation::{OperationKind, ResourceId};
use crate::domain::transaction::{TransactionId, TransactionStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransactionEvent {
    TransactionStarted {
        transaction_id: TransactionId,
        resource_id: ResourceId,
        kind: OperationKind,
        started_at: DateTime<Utc>,
    },
    StepStarted {
        transaction_id: TransactionId,
        step_id: String,
        description: String,
    },
    StepCompleted {
        transaction_id: TransactionId,
        step_id: String,
    },
    LogAppended {
        transaction_id: TransactionId,
        cursor: usize,
        line: String,
    },
    TransactionFinished {
        transaction_id: TransactionId,
        status: TransactionStatus,
        finished_at: DateTime<Utc>,
    },
    FirewallPending {
        transaction_id: TransactionId,
        rollback_at: DateTime<Utc>,
    },
    FirewallConfirmed {
        transaction_id: TransactionId,
        confirmed_at: DateTime<Utc>,
    },
    FirewallRolledBack {
        transaction_id: TransactionId,
        reason: RollbackReason,
        rolled_back_at: DateTime<Utc>,
    },
}

impl TransactionEvent {
    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            TransactionEvent::TransactionStarted { transaction_id, .. }
            | TransactionEvent::StepStarted { transaction_id, .. }
            | TransactionEvent::StepCompleted { transaction_id, .. }
            | TransactionEvent::LogAppended { transaction_id, .. }
            | TransactionEvent::TransactionFinished { transaction_id, .. }
            | TransactionEvent::FirewallPending { transaction_id, .. }
            | TransactionEvent::FirewallConfirmed { transaction_id, .. }
            | TransactionEvent::FirewallRolledBack { transaction_id, .. } => transaction_id,
        }
    }
}
