// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sled-backed repositories.
//!
//! One database per appliance, one tree per aggregate. Values are JSON.
//! Transactions are keyed by their big-endian sequence number so iteration
//! order matches creation order. Log lines live in their own tree under
//! `(sequence, index)`, so appending a line is a single insert.
//!
//! Inserts and status changes are flushed before returning. Log lines ride on
//! sled's background flush.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::domain::firewall::FirewallPendingChange;
use crate::domain::operation::ResourceId;
use crate::domain::repository::{
    FirewallRepository, MountOptionsRepository, PoolMountOptions, RepositoryError, TransactionRepository,
};
use crate::domain::transaction::{Transaction, TransactionId, TransactionStatus};

const TRANSACTIONS_TREE: &str = "transactions";
const TRANSACTION_LOGS_TREE: &str = "transaction_logs";
const META_TREE: &str = "meta";
const FIREWALL_TREE: &str = "firewall";
const MOUNT_OPTIONS_TREE: &str = "mount_options";

const LAST_SEQUENCE_KEY: &[u8] = b"last_sequence";
const PENDING_KEY: &[u8] = b"pending";

/// Open (or create) the database at `path`
pub fn open_database(path: &Path) -> Result<sled::Db, RepositoryError> {
    debug!(path = %path.display(), "Opening sled database");
    Ok(sled::open(path)?)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RepositoryError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RepositoryError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn sequence_of(id: &TransactionId) -> Option<u64> {
    id.as_str().strip_prefix("tx-")?.parse().ok()
}

fn log_key(sequence: u64, index: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&sequence.to_be_bytes());
    key[8..].copy_from_slice(&index.to_be_bytes());
    key
}

fn log_index(key: &[u8]) -> Result<u64, RepositoryError> {
    key.get(8..16)
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| RepositoryError::Serialization("malformed log key".to_string()))
}

#[derive(Clone)]
pub struct SledTransactionRepository {
    transactions: sled::Tree,
    logs: sled::Tree,
    meta: sled::Tree,
    // serialises header rewrites and log index allocation
    write_lock: Arc<Mutex<()>>,
}

impl SledTransactionRepository {
    pub fn new(db: &sled::Db) -> Result<Self, RepositoryError> {
        Ok(Self {
            transactions: db.open_tree(TRANSACTIONS_TREE)?,
            logs: db.open_tree(TRANSACTION_LOGS_TREE)?,
            meta: db.open_tree(META_TREE)?,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// The stored record without its log
    fn load_header(&self, sequence: u64) -> Result<Option<Transaction>, RepositoryError> {
        match self.transactions.get(sequence.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store_header(&self, transaction: &Transaction) -> Result<(), RepositoryError> {
        let mut header = transaction.clone();
        header.take_log();
        self.transactions
            .insert(transaction.sequence.to_be_bytes(), encode(&header)?)?;
        Ok(())
    }

    fn lines(&self, sequence: u64) -> Result<Vec<String>, RepositoryError> {
        self.logs
            .scan_prefix(sequence.to_be_bytes())
            .values()
            .map(|value| {
                let value = value?;
                String::from_utf8(value.to_vec()).map_err(|e| RepositoryError::Serialization(e.to_string()))
            })
            .collect()
    }

    fn log_len(&self, sequence: u64) -> Result<u64, RepositoryError> {
        match self.logs.scan_prefix(sequence.to_be_bytes()).keys().next_back() {
            Some(key) => Ok(log_index(&key?)? + 1),
            None => Ok(0),
        }
    }

    /// Append after the last stored line. Callers hold `write_lock`.
    fn push_lines(&self, sequence: u64, lines: Vec<String>) -> Result<usize, RepositoryError> {
        let mut next = self.log_len(sequence)?;
        for line in lines {
            self.logs.insert(log_key(sequence, next), line.into_bytes())?;
            next += 1;
        }
        Ok(next as usize)
    }

    fn with_lines(&self, header: Transaction) -> Result<Transaction, RepositoryError> {
        let lines = self.lines(header.sequence)?;
        Ok(header.with_log(lines))
    }

    fn headers(&self) -> impl DoubleEndedIterator<Item = Result<Transaction, RepositoryError>> + '_ {
        self.transactions.iter().map(|entry| {
            let (_, bytes) = entry?;
            decode::<Transaction>(&bytes)
        })
    }

    async fn flush(&self) -> Result<(), RepositoryError> {
        self.logs.flush_async().await?;
        self.transactions.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl TransactionRepository for SledTransactionRepository {
    async fn insert(&self, transaction: &Transaction) -> Result<(), RepositoryError> {
        {
            let _guard = self.write_lock.lock();
            self.store_header(transaction)?;
            self.push_lines(transaction.sequence, transaction.log().to_vec())?;

            let last = match self.meta.get(LAST_SEQUENCE_KEY)? {
                Some(bytes) => decode::<u64>(&bytes)?,
                None => 0,
            };
            if transaction.sequence > last {
                self.meta.insert(LAST_SEQUENCE_KEY, encode(&transaction.sequence)?)?;
            }
        }
        self.flush().await?;
        self.meta.flush_async().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &TransactionId) -> Result<Option<Transaction>, RepositoryError> {
        let Some(sequence) = sequence_of(id) else {
            return Ok(None);
        };
        match self.load_header(sequence)? {
            Some(header) => Ok(Some(self.with_lines(header)?)),
            None => Ok(None),
        }
    }

    async fn append_log(&self, id: &TransactionId, lines: Vec<String>) -> Result<usize, RepositoryError> {
        let sequence = sequence_of(id).ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        let _guard = self.write_lock.lock();
        if !self.transactions.contains_key(sequence.to_be_bytes())? {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        self.push_lines(sequence, lines)
    }

    async fn finish(
        &self,
        id: &TransactionId,
        status: TransactionStatus,
        final_line: Option<String>,
    ) -> Result<(), RepositoryError> {
        let sequence = sequence_of(id).ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        {
            let _guard = self.write_lock.lock();
            let mut header = self
                .load_header(sequence)?
                .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
            header.finish(status, None)?;
            // the final line lands before the terminal status becomes visible
            if let Some(line) = final_line {
                self.push_lines(sequence, vec![line])?;
            }
            self.store_header(&header)?;
        }
        self.flush().await
    }

    async fn list(&self, resource_id: Option<&ResourceId>, limit: usize) -> Result<Vec<Transaction>, RepositoryError> {
        let mut list = Vec::new();
        for header in self.headers().rev() {
            let header = header?;
            if resource_id.map_or(true, |r| &header.resource_id == r) {
                list.push(self.with_lines(header)?);
                if list.len() == limit {
                    break;
                }
            }
        }
        Ok(list)
    }

    async fn find_running(&self) -> Result<Vec<Transaction>, RepositoryError> {
        let mut running = Vec::new();
        for header in self.headers() {
            let header = header?;
            if header.status() == TransactionStatus::Running {
                running.push(self.with_lines(header)?);
            }
        }
        Ok(running)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let removed = {
            let _guard = self.write_lock.lock();
            let mut expired = Vec::new();
            for header in self.headers() {
                let header = header?;
                if header.status().is_terminal() && header.ended_at.is_some_and(|ended| ended < cutoff) {
                    expired.push(header.sequence);
                }
            }
            for sequence in &expired {
                self.transactions.remove(sequence.to_be_bytes())?;
                for key in self.logs.scan_prefix(sequence.to_be_bytes()).keys() {
                    self.logs.remove(key?)?;
                }
            }
            expired.len()
        };
        self.flush().await?;
        Ok(removed)
    }

    async fn last_sequence(&self) -> Result<u64, RepositoryError> {
        match self.meta.get(LAST_SEQUENCE_KEY)? {
            Some(bytes) => decode(&bytes),
            None => Ok(0),
        }
    }
}

#[derive(Clone)]
pub struct SledFirewallRepository {
    tree: sled::Tree,
}

impl SledFirewallRepository {
    pub fn new(db: &sled::Db) -> Result<Self, RepositoryError> {
        Ok(Self {
            tree: db.open_tree(FIREWALL_TREE)?,
        })
    }
}

#[async_trait]
impl FirewallRepository for SledFirewallRepository {
    async fn load_pending(&self) -> Result<Option<FirewallPendingChange>, RepositoryError> {
        match self.tree.get(PENDING_KEY)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_pending(&self, change: &FirewallPendingChange) -> Result<(), RepositoryError> {
        self.tree.insert(PENDING_KEY, encode(change)?)?;
        self.tree.flush_async().await?;
        Ok(())
    }

    async fn take_pending(&self) -> Result<Option<FirewallPendingChange>, RepositoryError> {
        let removed = self.tree.remove(PENDING_KEY)?;
        self.tree.flush_async().await?;
        match removed {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[derive(Clone)]
pub struct SledMountOptionsRepository {
    tree: sled::Tree,
}

impl SledMountOptionsRepository {
    pub fn new(db: &sled::Db) -> Result<Self, RepositoryError> {
        Ok(Self {
            tree: db.open_tree(MOUNT_OPTIONS_TREE)?,
        })
    }
}

#[async_trait]
impl MountOptionsRepository for SledMountOptionsRepository {
    async fn find(&self, resource_id: &ResourceId) -> Result<PoolMountOptions, RepositoryError> {
        match self.tree.get(resource_id.as_str().as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Ok(PoolMountOptions::default()),
        }
    }

    async fn save(&self, resource_id: &ResourceId, options: &PoolMountOptions) -> Result<(), RepositoryError> {
        self.tree.insert(resource_id.as_str().as_bytes(), encode(options)?)?;
        self.tree.flush_async().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mount_options::MountOptionsSpec;
    use crate::domain::operation::OperationKind;
    use crate::domain::plan::RiskClass;

    #[tokio::test]
    async fn test_transactions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let tx = Transaction::start(1, ResourceId::from("p1"), OperationKind::ReplaceDevice, RiskClass::Replace);
        {
            let db = open_database(dir.path()).unwrap();
            let repo = SledTransactionRepository::new(&db).unwrap();
            repo.insert(&tx).await.unwrap();
            repo.append_log(&tx.id, vec!["started".to_string()]).await.unwrap();
        }

        let db = open_database(dir.path()).unwrap();
        let repo = SledTransactionRepository::new(&db).unwrap();
        let stored = repo.find_by_id(&tx.id).await.unwrap().unwrap();
        assert_eq!(stored.log(), ["started".to_string()]);
        assert_eq!(repo.last_sequence().await.unwrap(), 1);
        assert_eq!(repo.find_running().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_log_lines_keep_order_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(dir.path()).unwrap();
        let repo = SledTransactionRepository::new(&db).unwrap();

        let mut tx = Transaction::start(7, ResourceId::from("p1"), OperationKind::AddDevices, RiskClass::Add);
        tx.append("Transaction tx-7 started");
        repo.insert(&tx).await.unwrap();

        // past 255 so byte-wise key order has to match numeric order
        for i in 0..300 {
            let len = repo.append_log(&tx.id, vec![format!("line {}", i)]).await.unwrap();
            assert_eq!(len, i + 2);
        }
        repo.finish(&tx.id, TransactionStatus::Succeeded, Some("done".to_string()))
            .await
            .unwrap();

        let stored = repo.find_by_id(&tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), TransactionStatus::Succeeded);
        assert_eq!(stored.log_len(), 302);
        assert_eq!(stored.log()[0], "Transaction tx-7 started");
        assert_eq!(stored.log()[256], "line 255");
        assert_eq!(stored.log().last().unwrap(), "done");

        let err = repo
            .finish(&tx.id, TransactionStatus::Failed, Some("late".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidState(_)));
        assert_eq!(repo.find_by_id(&tx.id).await.unwrap().unwrap().log_len(), 302);
    }

    #[tokio::test]
    async fn test_prune_removes_log_lines() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(dir.path()).unwrap();
        let repo = SledTransactionRepository::new(&db).unwrap();

        let old = Transaction::start(1, ResourceId::from("p1"), OperationKind::AddDevices, RiskClass::Add);
        let live = Transaction::start(2, ResourceId::from("p1"), OperationKind::AddDevices, RiskClass::Add);
        repo.insert(&old).await.unwrap();
        repo.insert(&live).await.unwrap();
        repo.append_log(&old.id, vec!["a".to_string(), "b".to_string()]).await.unwrap();
        repo.append_log(&live.id, vec!["c".to_string()]).await.unwrap();
        repo.finish(&old.id, TransactionStatus::Failed, None).await.unwrap();

        let removed = repo.delete_finished_before(Utc::now() + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.find_by_id(&old.id).await.unwrap().is_none());
        assert!(repo.lines(1).unwrap().is_empty());
        assert_eq!(repo.find_by_id(&live.id).await.unwrap().unwrap().log(), ["c".to_string()]);
        assert_eq!(repo.last_sequence().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_append_to_unknown_transaction_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(dir.path()).unwrap();
        let repo = SledTransactionRepository::new(&db).unwrap();
        let err = repo
            .append_log(&TransactionId::from("tx-3"), vec!["x".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_id_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(dir.path()).unwrap();
        let repo = SledTransactionRepository::new(&db).unwrap();
        assert!(repo.find_by_id(&TransactionId::from("nope")).await.unwrap().is_none());
        assert!(repo.find_by_id(&TransactionId::from("tx-4")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mount_options_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(dir.path()).unwrap();
        let repo = SledMountOptionsRepository::new(&db).unwrap();
        let pool = ResourceId::from("p1");

        assert_eq!(repo.find(&pool).await.unwrap(), PoolMountOptions::default());

        let options = PoolMountOptions {
            configured: Some(MountOptionsSpec::parse("ssd,noatime").unwrap()),
            active: None,
        };
        repo.save(&pool, &options).await.unwrap();
        assert_eq!(repo.find(&pool).await.unwrap(), options);
    }
}
