// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository traits defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## Sled Repositories
//!
//! Embedded, crash-safe storage for a single appliance:
//! - **SledTransactionRepository** - Transactions and their logs
//! - **SledFirewallRepository** - The pending firewall change
//! - **SledMountOptionsRepository** - Configured/active mount options per pool
//!
//! ## In-Memory Repositories
//!
//! Lightweight implementations for testing and development. State is lost
//! on restart.

pub mod sled_store;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::firewall::FirewallPendingChange;
use crate::domain::operation::ResourceId;
use crate::domain::repository::{
    FirewallRepository, MountOptionsRepository, PoolMountOptions, RepositoryError, TransactionRepository,
};
use crate::domain::transaction::{Transaction, TransactionId, TransactionStatus};

pub use sled_store::{SledFirewallRepository, SledMountOptionsRepository, SledTransactionRepository};

#[derive(Default)]
struct TransactionTable {
    transactions: HashMap<TransactionId, Transaction>,
    last_sequence: u64,
}

#[derive(Clone, Default)]
pub struct InMemoryTransactionRepository {
    table: Arc<RwLock<TransactionTable>>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert(&self, transaction: &Transaction) -> Result<(), RepositoryError> {
        let mut table = self.table.write();
        table.last_sequence = table.last_sequence.max(transaction.sequence);
        table.transactions.insert(transaction.id.clone(), transaction.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &TransactionId) -> Result<Option<Transaction>, RepositoryError> {
        Ok(self.table.read().transactions.get(id).cloned())
    }

    async fn append_log(&self, id: &TransactionId, lines: Vec<String>) -> Result<usize, RepositoryError> {
        let mut table = self.table.write();
        let transaction = table
            .transactions
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        for line in lines {
            transaction.append(line);
        }
        Ok(transaction.log_len())
    }

    async fn finish(
        &self,
        id: &TransactionId,
        status: TransactionStatus,
        final_line: Option<String>,
    ) -> Result<(), RepositoryError> {
        let mut table = self.table.write();
        let transaction = table
            .transactions
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        transaction.finish(status, final_line)?;
        Ok(())
    }

    async fn list(&self, resource_id: Option<&ResourceId>, limit: usize) -> Result<Vec<Transaction>, RepositoryError> {
        let table = self.table.read();
        let mut list: Vec<Transaction> = table
            .transactions
            .values()
            .filter(|t| resource_id.map_or(true, |r| &t.resource_id == r))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        list.truncate(limit);
        Ok(list)
    }

    async fn find_running(&self) -> Result<Vec<Transaction>, RepositoryError> {
        let table = self.table.read();
        let mut running: Vec<Transaction> = table
            .transactions
            .values()
            .filter(|t| t.status() == TransactionStatus::Running)
            .cloned()
            .collect();
        running.sort_by_key(|t| t.sequence);
        Ok(running)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut table = self.table.write();
        let before = table.transactions.len();
        table
            .transactions
            .retain(|_, t| !(t.status().is_terminal() && t.ended_at.is_some_and(|ended| ended < cutoff)));
        Ok(before - table.transactions.len())
    }

    async fn last_sequence(&self) -> Result<u64, RepositoryError> {
        Ok(self.table.read().last_sequence)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryFirewallRepository {
    pending: Arc<RwLock<Option<FirewallPendingChange>>>,
}

impl InMemoryFirewallRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FirewallRepository for InMemoryFirewallRepository {
    async fn load_pending(&self) -> Result<Option<FirewallPendingChange>, RepositoryError> {
        Ok(self.pending.read().clone())
    }

    async fn save_pending(&self, change: &FirewallPendingChange) -> Result<(), RepositoryError> {
        *self.pending.write() = Some(change.clone());
        Ok(())
    }

    async fn take_pending(&self) -> Result<Option<FirewallPendingChange>, RepositoryError> {
        Ok(self.pending.write().take())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryMountOptionsRepository {
    pools: Arc<RwLock<HashMap<ResourceId, PoolMountOptions>>>,
}

impl InMemoryMountOptionsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MountOptionsRepository for InMemoryMountOptionsRepository {
    async fn find(&self, resource_id: &ResourceId) -> Result<PoolMountOptions, RepositoryError> {
        Ok(self.pools.read().get(resource_id).cloned().unwrap_or_default())
    }

    async fn save(&self, resource_id: &ResourceId, options: &PoolMountOptions) -> Result<(), RepositoryError> {
        self.pools.write().insert(resource_id.clone(), options.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operation::OperationKind;
    use crate::domain::plan::RiskClass;
    use chrono::Duration;

    fn transaction(sequence: u64, pool: &str) -> Transaction {
        Transaction::start(
            sequence,
            ResourceId::from(pool),
            OperationKind::AddDevices,
            RiskClass::Add,
        )
    }

    #[tokio::test]
    async fn test_append_and_finish() {
        let repo = InMemoryTransactionRepository::new();
        let tx = transaction(1, "p1");
        repo.insert(&tx).await.unwrap();

        let len = repo
            .append_log(&tx.id, vec!["one".to_string(), "two".to_string()])
            .await
            .unwrap();
        assert_eq!(len, 2);

        repo.finish(&tx.id, TransactionStatus::Succeeded, Some("done".to_string()))
            .await
            .unwrap();
        let stored = repo.find_by_id(&tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), TransactionStatus::Succeeded);
        assert_eq!(stored.log_len(), 3);

        let again = repo.finish(&tx.id, TransactionStatus::Failed, None).await;
        assert!(matches!(again, Err(RepositoryError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_list_newest_first_and_filtered() {
        let repo = InMemoryTransactionRepository::new();
        for (seq, pool) in [(1, "p1"), (2, "p2"), (3, "p1")] {
            repo.insert(&transaction(seq, pool)).await.unwrap();
        }

        let all = repo.list(None, 10).await.unwrap();
        assert_eq!(all.iter().map(|t| t.sequence).collect::<Vec<_>>(), vec![3, 2, 1]);

        let p1 = repo.list(Some(&ResourceId::from("p1")), 1).await.unwrap();
        assert_eq!(p1.len(), 1);
        assert_eq!(p1[0].sequence, 3);
    }

    #[tokio::test]
    async fn test_prune_keeps_sequence() {
        let repo = InMemoryTransactionRepository::new();
        let tx = transaction(7, "p1");
        repo.insert(&tx).await.unwrap();
        repo.insert(&transaction(8, "p1")).await.unwrap();
        repo.finish(&tx.id, TransactionStatus::Failed, None).await.unwrap();

        let removed = repo
            .delete_finished_before(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(repo.find_running().await.unwrap().len(), 1);
        assert_eq!(repo.last_sequence().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_take_pending_is_single_shot() {
        let repo = InMemoryFirewallRepository::new();
        let change = FirewallPendingChange {
            transaction_id: TransactionId::from("tx-1"),
            applied_at: Utc::now(),
            rollback_at: Utc::now(),
            previous_config: Default::default(),
            new_config: Default::default(),
        };
        repo.save_pending(&change).await.unwrap();

        assert_eq!(repo.take_pending().await.unwrap(), Some(change));
        assert_eq!(repo.take_pending().await.unwrap(), None);
    }
}
