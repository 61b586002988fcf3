// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Firewall Guard
//!
//! Owns the firewall's Active / PendingConfirm state machine. Applying a
//! ruleset snapshots the running one, installs the new one and arms a
//! deadline. Unless the operator confirms before the deadline, the snapshot is
//! restored.
//!
//! The deadline is held as a monotonic [`Instant`]; the UTC `rollback_at`
//! stored with the pending change is only used to re-arm after a restart.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Provisional firewall changes with automatic rollback

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::application::journal::TransactionJournal;
use crate::application::reservations::ReservationTable;
use crate::domain::events::TransactionEvent;
use crate::domain::firewall::{
    DefaultPolicy, FirewallPendingChange, FirewallRuleset, FirewallState, FirewallStatus, RollbackReason,
    FIREWALL_RESOURCE, MAX_GRACE_PERIOD,
};
use crate::domain::operation::ResourceId;
use crate::domain::repository::{FirewallRepository, RepositoryError};
use crate::domain::runtime::{FirewallBackend, FirewallBackendError};
use crate::domain::transaction::{TransactionId, TransactionStatus};

#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("no firewall change is pending confirmation")]
    NotPending,

    #[error(transparent)]
    Backend(#[from] FirewallBackendError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct FirewallGuard {
    backend: Arc<dyn FirewallBackend>,
    repository: Arc<dyn FirewallRepository>,
    journal: TransactionJournal,
    reservations: ReservationTable,
    grace_period: Duration,
    deadline: Mutex<Option<Instant>>,
}

fn describe(ruleset: &FirewallRuleset) -> String {
    let policy = match ruleset.default_policy {
        DefaultPolicy::Accept => "accept",
        DefaultPolicy::Drop => "drop",
    };
    format!("{} rule(s), default policy {}", ruleset.rules.len(), policy)
}

impl FirewallGuard {
    pub fn new(
        backend: Arc<dyn FirewallBackend>,
        repository: Arc<dyn FirewallRepository>,
        journal: TransactionJournal,
        reservations: ReservationTable,
        grace_period: Duration,
    ) -> Self {
        Self {
            backend,
            repository,
            journal,
            reservations,
            grace_period: grace_period.min(MAX_GRACE_PERIOD),
            deadline: Mutex::new(None),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    fn resource() -> ResourceId {
        ResourceId::from(FIREWALL_RESOURCE)
    }

    /// Snapshot the running ruleset, install `new_config` and arm the rollback
    /// deadline. The transaction stays Running until confirm or rollback.
    ///
    /// The snapshot is persisted before anything is installed. Once the new
    /// ruleset is in place the change is armed, and log writes can no longer
    /// fail the call.
    pub async fn arm(
        &self,
        transaction_id: &TransactionId,
        new_config: FirewallRuleset,
    ) -> Result<DateTime<Utc>, FirewallError> {
        let mut deadline = self.deadline.lock().await;

        let previous = self.backend.current().await?;
        self.journal
            .append(transaction_id, format!("Snapshot taken: {}", describe(&previous)))
            .await?;

        let applied_at = Utc::now();
        let rollback_at = applied_at
            + chrono::Duration::from_std(self.grace_period).unwrap_or(chrono::Duration::zero());
        let change = FirewallPendingChange {
            transaction_id: transaction_id.clone(),
            applied_at,
            rollback_at,
            previous_config: previous,
            new_config: new_config.clone(),
        };
        self.repository.save_pending(&change).await?;

        if let Err(e) = self.backend.install(&new_config).await {
            match self.repository.take_pending().await {
                Ok(_) => return Err(e.into()),
                Err(discard) => {
                    // the record cannot be cleared, so let it roll back like any other
                    warn!(transaction_id = %transaction_id, "Failed to discard pending firewall change: {}", discard);
                    *deadline = Some(Instant::now());
                    self.note(transaction_id, format!("Install failed: {}", e)).await;
                    return Ok(applied_at);
                }
            }
        }
        *deadline = Some(Instant::now() + self.grace_period);

        self.note(transaction_id, format!("Installed new ruleset: {}", describe(&new_config)))
            .await;
        for rule in &new_config.rules {
            self.note(transaction_id, format!("  {}", rule)).await;
        }
        self.note(
            transaction_id,
            format!(
                "Awaiting confirmation: the previous ruleset is restored at {} unless confirmed",
                rollback_at.to_rfc3339()
            ),
        )
        .await;
        self.journal.event_bus().publish(TransactionEvent::FirewallPending {
            transaction_id: transaction_id.clone(),
            rollback_at,
        });
        info!(transaction_id = %transaction_id, rollback_at = %rollback_at, "Firewall change pending confirmation");

        Ok(rollback_at)
    }

    async fn note(&self, id: &TransactionId, line: impl Into<String>) {
        if let Err(e) = self.journal.append(id, line).await {
            warn!(transaction_id = %id, "Failed to append log line: {}", e);
        }
    }

    async fn finish(&self, id: &TransactionId, status: TransactionStatus, line: impl Into<String>) {
        if let Err(e) = self.journal.finish(id, status, line).await {
            warn!(transaction_id = %id, status = %status, "Failed to record firewall outcome: {}", e);
        }
    }

    /// Keep the pending ruleset permanently
    pub async fn confirm(&self) -> Result<TransactionId, FirewallError> {
        let mut deadline = self.deadline.lock().await;

        if deadline.is_some_and(|d| Instant::now() >= d) {
            // the tick has not caught up yet; the deadline still wins
            self.rollback_locked(&mut deadline, RollbackReason::Timeout).await?;
            return Err(FirewallError::NotPending);
        }

        let change = self.repository.take_pending().await?.ok_or(FirewallError::NotPending)?;
        *deadline = None;

        let id = change.transaction_id;
        self.finish(&id, TransactionStatus::Succeeded, "Confirmed by operator; new ruleset is now permanent")
            .await;
        self.reservations.release(&Self::resource(), &id);
        self.journal.event_bus().publish(TransactionEvent::FirewallConfirmed {
            transaction_id: id.clone(),
            confirmed_at: Utc::now(),
        });
        info!(transaction_id = %id, "Firewall change confirmed");
        Ok(id)
    }

    /// Restore the snapshot on operator request
    pub async fn rollback(&self) -> Result<TransactionId, FirewallError> {
        let mut deadline = self.deadline.lock().await;
        self.rollback_locked(&mut deadline, RollbackReason::Manual).await
    }

    /// Deadline check. Rolls back at most once per pending change, however
    /// late or often it runs.
    pub async fn tick(&self) -> Option<TransactionId> {
        let mut deadline = self.deadline.lock().await;
        match *deadline {
            Some(d) if Instant::now() >= d => {}
            _ => return None,
        }

        match self.rollback_locked(&mut deadline, RollbackReason::Timeout).await {
            Ok(id) => Some(id),
            Err(FirewallError::NotPending) => {
                *deadline = None;
                None
            }
            Err(e) => {
                warn!("Automatic firewall rollback failed, retrying on next tick: {}", e);
                None
            }
        }
    }

    async fn rollback_locked(
        &self,
        deadline: &mut Option<Instant>,
        reason: RollbackReason,
    ) -> Result<TransactionId, FirewallError> {
        let change = self.repository.take_pending().await?.ok_or(FirewallError::NotPending)?;

        if let Err(e) = self.backend.install(&change.previous_config).await {
            // keep the record so the next tick tries again
            self.repository.save_pending(&change).await?;
            return Err(e.into());
        }
        *deadline = None;

        let id = change.transaction_id;
        self.note(&id, format!("Restored previous ruleset: {}", describe(&change.previous_config)))
            .await;
        let final_line = match reason {
            RollbackReason::Timeout => format!(
                "Rolled back automatically: not confirmed within {} seconds",
                self.grace_period.as_secs()
            ),
            RollbackReason::Manual => "Rolled back by operator".to_string(),
        };
        self.finish(&id, TransactionStatus::RolledBack, final_line).await;
        self.reservations.release(&Self::resource(), &id);

        self.journal.event_bus().publish(TransactionEvent::FirewallRolledBack {
            transaction_id: id.clone(),
            reason,
            rolled_back_at: Utc::now(),
        });
        metrics::counter!("warden_firewall_rollbacks_total", "reason" => reason.to_string()).increment(1);
        info!(transaction_id = %id, reason = %reason, "Firewall change rolled back");
        Ok(id)
    }

    pub async fn state(&self) -> Result<FirewallState, FirewallError> {
        let _deadline = self.deadline.lock().await;
        let current = self.backend.current().await?;
        let pending = self.repository.load_pending().await?;

        Ok(match pending {
            Some(change) => FirewallState {
                status: FirewallStatus::PendingConfirm,
                rollback_at: Some(change.rollback_at),
                transaction_id: Some(change.transaction_id),
                default_policy: current.default_policy,
                rules: current.rules,
            },
            None => FirewallState {
                status: FirewallStatus::Active,
                rollback_at: None,
                transaction_id: None,
                default_policy: current.default_policy,
                rules: current.rules,
            },
        })
    }

    /// Re-arm a pending change persisted before a restart.
    ///
    /// The remaining time is taken from the stored `rollback_at`; an overdue
    /// change fires on the next tick.
    pub async fn resume(&self) -> Result<Option<TransactionId>, FirewallError> {
        let mut deadline = self.deadline.lock().await;
        let Some(change) = self.repository.load_pending().await? else {
            return Ok(None);
        };

        let remaining = (change.rollback_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(MAX_GRACE_PERIOD);
        *deadline = Some(Instant::now() + remaining);
        self.reservations.restore(&Self::resource(), &change.transaction_id);
        info!(
            transaction_id = %change.transaction_id,
            remaining_secs = remaining.as_secs(),
            "Resumed pending firewall change"
        );
        Ok(Some(change.transaction_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::domain::firewall::{FirewallRule, Protocol, RuleAction};
    use crate::domain::operation::OperationKind;
    use crate::domain::plan::RiskClass;
    use crate::domain::repository::TransactionRepository;
    use crate::domain::transaction::Transaction;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::firewall_backend::InMemoryFirewallBackend;
    use crate::infrastructure::repositories::{InMemoryFirewallRepository, InMemoryTransactionRepository};

    /// Transaction store that starts failing writes on demand
    struct FlakyTransactions {
        inner: InMemoryTransactionRepository,
        appends_left: AtomicUsize,
        fail_finish: AtomicBool,
    }

    impl FlakyTransactions {
        fn new() -> Self {
            Self {
                inner: InMemoryTransactionRepository::new(),
                appends_left: AtomicUsize::new(usize::MAX),
                fail_finish: AtomicBool::new(false),
            }
        }

        fn fail_appends_after(&self, count: usize) {
            self.appends_left.store(count, Ordering::SeqCst);
        }
    }

    fn disk_full() -> RepositoryError {
        RepositoryError::Database("disk full".to_string())
    }

    #[async_trait]
    impl TransactionRepository for FlakyTransactions {
        async fn insert(&self, transaction: &Transaction) -> Result<(), RepositoryError> {
            self.inner.insert(transaction).await
        }

        async fn find_by_id(&self, id: &TransactionId) -> Result<Option<Transaction>, RepositoryError> {
            self.inner.find_by_id(id).await
        }

        async fn append_log(&self, id: &TransactionId, lines: Vec<String>) -> Result<usize, RepositoryError> {
            self.appends_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .map_err(|_| disk_full())?;
            self.inner.append_log(id, lines).await
        }

        async fn finish(
            &self,
            id: &TransactionId,
            status: TransactionStatus,
            final_line: Option<String>,
        ) -> Result<(), RepositoryError> {
            if self.fail_finish.load(Ordering::SeqCst) {
                return Err(disk_full());
            }
            self.inner.finish(id, status, final_line).await
        }

        async fn list(&self, resource_id: Option<&ResourceId>, limit: usize) -> Result<Vec<Transaction>, RepositoryError> {
            self.inner.list(resource_id, limit).await
        }

        async fn find_running(&self) -> Result<Vec<Transaction>, RepositoryError> {
            self.inner.find_running().await
        }

        async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
            self.inner.delete_finished_before(cutoff).await
        }

        async fn last_sequence(&self) -> Result<u64, RepositoryError> {
            self.inner.last_sequence().await
        }
    }

    /// Backend whose installs can be refused
    struct RefusingBackend {
        inner: InMemoryFirewallBackend,
        refuse: AtomicBool,
    }

    #[async_trait]
    impl FirewallBackend for RefusingBackend {
        async fn current(&self) -> Result<FirewallRuleset, FirewallBackendError> {
            self.inner.current().await
        }

        async fn install(&self, ruleset: &FirewallRuleset) -> Result<(), FirewallBackendError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(FirewallBackendError::Install("netlink busy".to_string()));
            }
            self.inner.install(ruleset).await
        }
    }

    struct Fixture {
        guard: FirewallGuard,
        backend: InMemoryFirewallBackend,
        refusing: Arc<RefusingBackend>,
        firewall: Arc<InMemoryFirewallRepository>,
        transactions: Arc<FlakyTransactions>,
        reservations: ReservationTable,
        id: TransactionId,
    }

    fn ssh_only() -> FirewallRuleset {
        FirewallRuleset {
            default_policy: DefaultPolicy::Drop,
            rules: vec![FirewallRule {
                action: RuleAction::Allow,
                protocol: Protocol::Tcp,
                port: Some(22),
                source: None,
                comment: None,
            }],
        }
    }

    async fn fixture() -> Fixture {
        let backend = InMemoryFirewallBackend::default();
        let refusing = Arc::new(RefusingBackend {
            inner: backend.clone(),
            refuse: AtomicBool::new(false),
        });
        let firewall = Arc::new(InMemoryFirewallRepository::new());
        let transactions = Arc::new(FlakyTransactions::new());
        let reservations = ReservationTable::new();
        let journal = TransactionJournal::new(transactions.clone(), EventBus::new(64));
        let guard = FirewallGuard::new(
            refusing.clone(),
            firewall.clone(),
            journal,
            reservations.clone(),
            Duration::from_secs(60),
        );

        let tx = Transaction::start(
            1,
            ResourceId::from(FIREWALL_RESOURCE),
            OperationKind::ApplyFirewall,
            RiskClass::FirewallApply,
        );
        transactions.insert(&tx).await.unwrap();
        reservations.restore(&ResourceId::from(FIREWALL_RESOURCE), &tx.id);

        Fixture {
            guard,
            backend,
            refusing,
            firewall,
            transactions,
            reservations,
            id: tx.id,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_keeps_new_ruleset() {
        let f = fixture().await;
        f.guard.arm(&f.id, ssh_only()).await.unwrap();
        assert_eq!(f.guard.state().await.unwrap().status, FirewallStatus::PendingConfirm);

        assert_eq!(f.guard.confirm().await.unwrap(), f.id);
        assert_eq!(f.backend.snapshot(), ssh_only());
        assert_eq!(f.guard.state().await.unwrap().status, FirewallStatus::Active);

        let tx = f.transactions.find_by_id(&f.id).await.unwrap().unwrap();
        assert_eq!(tx.status(), TransactionStatus::Succeeded);
        assert!(f.reservations.holder(&ResourceId::from(FIREWALL_RESOURCE)).is_none());

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(f.guard.tick().await.is_none());
        assert!(matches!(f.guard.confirm().await, Err(FirewallError::NotPending)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_rollback_restores_snapshot() {
        let f = fixture().await;
        f.guard.arm(&f.id, ssh_only()).await.unwrap();

        f.guard.rollback().await.unwrap();
        assert_eq!(f.backend.snapshot(), FirewallRuleset::default());

        let tx = f.transactions.find_by_id(&f.id).await.unwrap().unwrap();
        assert_eq!(tx.status(), TransactionStatus::RolledBack);
        assert_eq!(tx.log().last().unwrap(), "Rolled back by operator");
        assert!(matches!(f.guard.rollback().await, Err(FirewallError::NotPending)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_before_deadline_does_nothing() {
        let f = fixture().await;
        f.guard.arm(&f.id, ssh_only()).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(f.guard.tick().await.is_none());
        assert_eq!(f.backend.snapshot(), ssh_only());
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_after_deadline_is_rejected() {
        let f = fixture().await;
        f.guard.arm(&f.id, ssh_only()).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(matches!(f.guard.confirm().await, Err(FirewallError::NotPending)));
        assert_eq!(f.backend.snapshot(), FirewallRuleset::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_failures_after_install_keep_change_armed() {
        let f = fixture().await;
        // the snapshot line is written, everything after it fails
        f.transactions.fail_appends_after(1);

        f.guard.arm(&f.id, ssh_only()).await.unwrap();
        assert_eq!(f.backend.snapshot(), ssh_only());
        assert_eq!(f.guard.state().await.unwrap().status, FirewallStatus::PendingConfirm);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(f.guard.tick().await, Some(f.id.clone()));
        assert_eq!(f.backend.snapshot(), FirewallRuleset::default());
        assert!(f.reservations.holder(&ResourceId::from(FIREWALL_RESOURCE)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_releases_firewall_when_journal_fails() {
        let f = fixture().await;
        f.guard.arm(&f.id, ssh_only()).await.unwrap();

        f.transactions.fail_appends_after(0);
        f.transactions.fail_finish.store(true, Ordering::SeqCst);

        assert_eq!(f.guard.rollback().await.unwrap(), f.id);
        assert_eq!(f.backend.snapshot(), FirewallRuleset::default());
        assert!(f.reservations.holder(&ResourceId::from(FIREWALL_RESOURCE)).is_none());
        assert!(f.firewall.load_pending().await.unwrap().is_none());
        assert!(matches!(f.guard.rollback().await, Err(FirewallError::NotPending)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_install_leaves_nothing_pending() {
        let f = fixture().await;
        f.refusing.refuse.store(true, Ordering::SeqCst);

        assert!(matches!(
            f.guard.arm(&f.id, ssh_only()).await,
            Err(FirewallError::Backend(_))
        ));
        assert_eq!(f.backend.snapshot(), FirewallRuleset::default());
        assert!(f.firewall.load_pending().await.unwrap().is_none());
        assert_eq!(f.guard.state().await.unwrap().status, FirewallStatus::Active);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(f.guard.tick().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_restore_is_retried_on_next_tick() {
        let f = fixture().await;
        f.guard.arm(&f.id, ssh_only()).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        f.refusing.refuse.store(true, Ordering::SeqCst);
        assert!(f.guard.tick().await.is_none());
        assert_eq!(f.backend.snapshot(), ssh_only());
        assert!(f.firewall.load_pending().await.unwrap().is_some());

        f.refusing.refuse.store(false, Ordering::SeqCst);
        assert_eq!(f.guard.tick().await, Some(f.id.clone()));
        assert_eq!(f.backend.snapshot(), FirewallRuleset::default());
    }

    #[test]
    fn test_grace_period_is_capped() {
        let guard = FirewallGuard::new(
            Arc::new(InMemoryFirewallBackend::default()),
            Arc::new(InMemoryFirewallRepository::new()),
            TransactionJournal::new(Arc::new(InMemoryTransactionRepository::new()), EventBus::new(8)),
            ReservationTable::new(),
            Duration::from_secs(u64::MAX),
        );
        assert_eq!(guard.grace_period(), MAX_GRACE_PERIOD);
    }
}
