// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Transaction journal.
//!
//! Single write path for transaction logs: every appended line is persisted
//! first and then published on the event bus with its cursor position.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::domain::events::TransactionEvent;
use crate::domain::repository::{RepositoryError, TransactionRepository};
use crate::domain::runtime::LogSink;
use crate::domain::transaction::{TransactionId, TransactionStatus};
use crate::infrastructure::event_bus::EventBus;

#[derive(Clone)]
pub struct TransactionJournal {
    repository: Arc<dyn TransactionRepository>,
    event_bus: EventBus,
}

impl TransactionJournal {
    pub fn new(repository: Arc<dyn TransactionRepository>, event_bus: EventBus) -> Self {
        Self {
            repository,
            event_bus,
        }
    }

    pub fn repository(&self) -> &Arc<dyn TransactionRepository> {
        &self.repository
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub async fn append(&self, id: &TransactionId, line: impl Into<String>) -> Result<(), RepositoryError> {
        let line = line.into();
        let len = self.repository.append_log(id, vec![line.clone()]).await?;
        self.event_bus.publish(TransactionEvent::LogAppended {
            transaction_id: id.clone(),
            cursor: len - 1,
            line,
        });
        Ok(())
    }

    /// Terminal transition. `final_line` becomes the last log line.
    pub async fn finish(
        &self,
        id: &TransactionId,
        status: TransactionStatus,
        final_line: impl Into<String>,
    ) -> Result<(), RepositoryError> {
        let line = final_line.into();
        self.repository.finish(id, status, Some(line.clone())).await?;

        if let Some(transaction) = self.repository.find_by_id(id).await? {
            self.event_bus.publish(TransactionEvent::LogAppended {
                transaction_id: id.clone(),
                cursor: transaction.log_len() - 1,
                line,
            });
        }
        self.event_bus.publish(TransactionEvent::TransactionFinished {
            transaction_id: id.clone(),
            status,
            finished_at: Utc::now(),
        });
        metrics::counter!("warden_transactions_finished_total", "status" => status.to_string()).increment(1);
        Ok(())
    }

    /// Log sink writing into the given transaction
    pub fn sink(&self, id: TransactionId) -> JournalSink {
        JournalSink {
            journal: self.clone(),
            id,
        }
    }
}

pub struct JournalSink {
    journal: TransactionJournal,
    id: TransactionId,
}

#[async_trait]
impl LogSink for JournalSink {
    async fn line(&self, line: String) {
        if let Err(e) = self.journal.append(&self.id, line).await {
            warn!(transaction_id = %self.id, "Failed to record step output: {}", e);
        }
    }
}
