// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Transaction aggregate: the tracked execution of a confirmed plan.
//!
//! The log is append-only and addressed by integer cursors. Terminal statuses
//! (`Succeeded`, `Failed`, `RolledBack`) are final; the aggregate refuses any
//! further status change once one is reached.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::operation::{OperationKind, ResourceId};
use crate::domain::plan::RiskClass;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn from_sequence(sequence: u64) -> Self {
        Self(format!("tx-{}", sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Running,
    Succeeded,
    Failed,
    RolledBack,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Running)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Running => "running",
            TransactionStatus::Succeeded => "succeeded",
            TransactionStatus::Failed => "failed",
            TransactionStatus::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("Transaction {id} already finished as {status}")]
    AlreadyFinished {
        id: TransactionId,
        status: TransactionStatus,
    },

    #[error("Transaction {0} cannot finish as running")]
    NotTerminal(TransactionId),
}

/// A slice of a transaction log starting at a cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPage {
    pub lines: Vec<String>,
    pub next_cursor: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub sequence: u64,
    pub resource_id: ResourceId,
    pub kind: OperationKind,
    pub risk_class: RiskClass,
    status: TransactionStatus,
    log: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn start(sequence: u64, resource_id: ResourceId, kind: OperationKind, risk_class: RiskClass) -> Self {
        Self {
            id: TransactionId::from_sequence(sequence),
            sequence,
            resource_id,
            kind,
            risk_class,
            status: TransactionStatus::Running,
            log: Vec::new(),
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    pub fn append(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    /// Detach the log, leaving only the header fields
    pub(crate) fn take_log(&mut self) -> Vec<String> {
        std::mem::take(&mut self.log)
    }

    /// Reattach a log previously taken with [`Transaction::take_log`]
    pub(crate) fn with_log(mut self, log: Vec<String>) -> Self {
        self.log = log;
        self
    }

    /// Lines at positions `cursor..cursor + max_lines`.
    ///
    /// A cursor at or past the end yields an empty page and the same cursor.
    pub fn page(&self, cursor: usize, max_lines: usize) -> LogPage {
        let lines: Vec<String> = self
            .log
            .iter()
            .skip(cursor)
            .take(max_lines)
            .cloned()
            .collect();
        let next_cursor = cursor + lines.len();
        LogPage { lines, next_cursor }
    }

    /// Move to a terminal status, optionally appending a final log line
    pub fn finish(&mut self, status: TransactionStatus, final_line: Option<String>) -> Result<(), TransactionError> {
        if !status.is_terminal() {
            return Err(TransactionError::NotTerminal(self.id.clone()));
        }
        if self.status.is_terminal() {
            return Err(TransactionError::AlreadyFinished {
                id: self.id.clone(),
                status: self.status,
            });
        }
        if let Some(line) = final_line {
            self.log.push(line);
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction() -> Transaction {
        Transaction::start(
            1,
            ResourceId::new("p1"),
            OperationKind::AddDevices,
            RiskClass::Add,
        )
    }

    #[test]
    fn test_ids_follow_sequence() {
        assert_eq!(transaction().id, TransactionId::from("tx-1"));
    }

    #[test]
    fn test_page_respects_cursor_and_limit() {
        let mut tx = transaction();
        for i in 0..5 {
            tx.append(format!("line {}", i));
        }

        let first = tx.page(0, 3);
        assert_eq!(first.lines, vec!["line 0", "line 1", "line 2"]);
        assert_eq!(first.next_cursor, 3);

        let second = tx.page(first.next_cursor, 100);
        assert_eq!(second.lines, vec!["line 3", "line 4"]);
        assert_eq!(second.next_cursor, 5);
    }

    #[test]
    fn test_page_past_end_is_idempotent() {
        let mut tx = transaction();
        tx.append("only line");

        let page = tx.page(5, 100);
        assert!(page.lines.is_empty());
        assert_eq!(page.next_cursor, 5);
        assert_eq!(tx.page(5, 100), page);
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut tx = transaction();
        tx.finish(TransactionStatus::Succeeded, Some("done".to_string())).unwrap();
        assert_eq!(tx.status(), TransactionStatus::Succeeded);
        assert!(tx.ended_at.is_some());

        let err = tx.finish(TransactionStatus::Failed, Some("late".to_string())).unwrap_err();
        assert!(matches!(err, TransactionError::AlreadyFinished { .. }));
        assert_eq!(tx.status(), TransactionStatus::Succeeded);
        assert_eq!(tx.log(), &["done".to_string()]);
    }

    #[test]
    fn test_cannot_finish_as_running() {
        let mut tx = transaction();
        assert!(matches!(
            tx.finish(TransactionStatus::Running, None),
            Err(TransactionError::NotTerminal(_))
        ));
    }
}
