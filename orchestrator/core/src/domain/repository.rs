// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the guarded-operation aggregates, one repository
//! per aggregate, implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `TransactionRepository` | `Transaction` | `InMemoryTransactionRepository`, `SledTransactionRepository` |
//! | `FirewallRepository` | `FirewallPendingChange` | `InMemoryFirewallRepository`, `SledFirewallRepository` |
//! | `MountOptionsRepository` | `PoolMountOptions` | `InMemoryMountOptionsRepository`, `SledMountOptionsRepository` |
//!
//! ## Storage Backend Abstraction
//!
//! Concrete implementations are selected at startup from the node
//! configuration (`spec.storage.backend`). In-memory implementations are used
//! for development and testing; sled gives durability across restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::firewall::FirewallPendingChange;
use crate::domain::mount_options::MountOptionsSpec;
use crate::domain::operation::ResourceId;
use crate::domain::transaction::{Transaction, TransactionError, TransactionId, TransactionStatus};

/// Storage backend selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    InMemory,
    Sled { path: std::path::PathBuf },
}

/// Repository interface for Transaction aggregates
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Persist a newly started transaction
    async fn insert(&self, transaction: &Transaction) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &TransactionId) -> Result<Option<Transaction>, RepositoryError>;

    /// Append lines to the log, returning the new log length
    async fn append_log(&self, id: &TransactionId, lines: Vec<String>) -> Result<usize, RepositoryError>;

    /// Move the transaction to a terminal status
    async fn finish(
        &self,
        id: &TransactionId,
        status: TransactionStatus,
        final_line: Option<String>,
    ) -> Result<(), RepositoryError>;

    /// Newest first, optionally restricted to one resource
    async fn list(&self, resource_id: Option<&ResourceId>, limit: usize) -> Result<Vec<Transaction>, RepositoryError>;

    async fn find_running(&self) -> Result<Vec<Transaction>, RepositoryError>;

    /// Delete finished transactions that ended before `cutoff`
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError>;

    /// Highest sequence number ever stored (0 when empty)
    async fn last_sequence(&self) -> Result<u64, RepositoryError>;
}

/// Repository for the single pending firewall change
#[async_trait]
pub trait FirewallRepository: Send + Sync {
    async fn load_pending(&self) -> Result<Option<FirewallPendingChange>, RepositoryError>;

    async fn save_pending(&self, change: &FirewallPendingChange) -> Result<(), RepositoryError>;

    /// Remove the pending change, returning it if one existed
    async fn take_pending(&self) -> Result<Option<FirewallPendingChange>, RepositoryError>;
}

/// Mount options known for a pool
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolMountOptions {
    /// Options the pool will be mounted with next time
    pub configured: Option<MountOptionsSpec>,

    /// Options the pool is mounted with right now
    pub active: Option<MountOptionsSpec>,
}

#[async_trait]
pub trait MountOptionsRepository: Send + Sync {
    async fn find(&self, resource_id: &ResourceId) -> Result<PoolMountOptions, RepositoryError>;

    async fn save(&self, resource_id: &ResourceId, options: &PoolMountOptions) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for RepositoryError {
    fn from(err: sled::Error) -> Self {
        RepositoryError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<TransactionError> for RepositoryError {
    fn from(err: TransactionError) -> Self {
        RepositoryError::InvalidState(err.to_string())
    }
}
