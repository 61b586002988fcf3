// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Transaction Coordinator
//!
//! Applies confirmed plans. Each accepted plan becomes a transaction that runs
//! on its own task while callers poll its append-only log by cursor.
//!
//! # Lifecycle
//!
//! 1. The confirmation phrase is checked; a mismatch changes nothing.
//! 2. The plan's resource is reserved. A resource already held by a running
//!    transaction yields [`ApplyError::Busy`] with the holder's id.
//! 3. Steps run strictly in order. The first failure ends the transaction as
//!    Failed; completed steps are not undone.
//! 4. The reservation is released when the transaction reaches a terminal
//!    status. Firewall transactions stay Running until the change is confirmed
//!    or rolled back by [`FirewallGuard`].
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrate guarded operations end to end

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::application::confirmation::ConfirmationGate;
use crate::application::firewall_guard::{FirewallError, FirewallGuard};
use crate::application::journal::TransactionJournal;
use crate::application::mount_options::MountOptionsService;
use crate::application::reservations::ReservationTable;
use crate::domain::events::TransactionEvent;
use crate::domain::firewall::FirewallRuleset;
use crate::domain::mount_options::MountOptionsSpec;
use crate::domain::operation::{Operation, ResourceId};
use crate::domain::plan::{Plan, RiskClass};
use crate::domain::repository::RepositoryError;
use crate::domain::runtime::StepExecutor;
use crate::domain::transaction::{LogPage, Transaction, TransactionId, TransactionStatus};

/// Default page size for log polling
pub const DEFAULT_POLL_LINES: usize = 500;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("resource is busy with transaction {0}")]
    Busy(TransactionId),

    #[error("confirmation code does not match")]
    ConfirmationMismatch,

    #[error("risk class {provided} does not match the plan's risk class {expected}")]
    RiskClassMismatch { expected: RiskClass, provided: RiskClass },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("transaction {0} not found")]
    NotFound(TransactionId),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Firewall(#[from] FirewallError),
}

pub struct TransactionCoordinator {
    gate: ConfirmationGate,
    reservations: ReservationTable,
    sequence: AtomicU64,
    journal: TransactionJournal,
    executor: Arc<dyn StepExecutor>,
    firewall: Arc<FirewallGuard>,
    mount_options: MountOptionsService,
}

impl TransactionCoordinator {
    /// Sequence numbering continues after the highest id already stored.
    pub async fn new(
        journal: TransactionJournal,
        reservations: ReservationTable,
        executor: Arc<dyn StepExecutor>,
        firewall: Arc<FirewallGuard>,
        mount_options: MountOptionsService,
    ) -> Result<Self, RepositoryError> {
        let last_sequence = journal.repository().last_sequence().await?;
        Ok(Self {
            gate: ConfirmationGate::new(),
            reservations,
            sequence: AtomicU64::new(last_sequence),
            journal,
            executor,
            firewall,
            mount_options,
        })
    }

    /// Start executing `plan` once `confirmation` matches the phrase for
    /// `risk_class`. Returns as soon as the transaction exists.
    pub async fn apply(
        self: &Arc<Self>,
        plan: Plan,
        risk_class: RiskClass,
        confirmation: &str,
    ) -> Result<TransactionId, ApplyError> {
        if risk_class != plan.risk_class {
            metrics::counter!("warden_apply_rejected_total", "reason" => "risk_class").increment(1);
            return Err(ApplyError::RiskClassMismatch {
                expected: plan.risk_class,
                provided: risk_class,
            });
        }
        if !self.gate.confirm(plan.risk_class, confirmation) {
            metrics::counter!("warden_apply_rejected_total", "reason" => "confirmation").increment(1);
            warn!(resource_id = %plan.resource_id(), risk_class = %plan.risk_class, "Confirmation code rejected");
            return Err(ApplyError::ConfirmationMismatch);
        }

        let resource = plan.resource_id().clone();
        let mut sequence = 0;
        let id = self
            .reservations
            .try_reserve(&resource, || {
                sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                TransactionId::from_sequence(sequence)
            })
            .map_err(|holder| {
                metrics::counter!("warden_apply_rejected_total", "reason" => "busy").increment(1);
                info!(resource_id = %resource, holder = %holder, "Resource busy");
                ApplyError::Busy(holder)
            })?;

        let mut transaction = Transaction::start(sequence, resource.clone(), plan.kind(), plan.risk_class);
        transaction.append(format!(
            "Transaction {} started: {} on {}",
            id,
            plan.kind(),
            resource
        ));
        transaction.append(format!(
            "Confirmed by operator (risk class {}), {} step(s) planned",
            plan.risk_class,
            plan.steps.len()
        ));
        for warning in &plan.warnings {
            transaction.append(format!("Warning: {}", warning));
        }

        if let Err(e) = self.journal.repository().insert(&transaction).await {
            self.reservations.release(&resource, &id);
            return Err(e.into());
        }

        self.journal.event_bus().publish(TransactionEvent::TransactionStarted {
            transaction_id: id.clone(),
            resource_id: resource.clone(),
            kind: plan.kind(),
            started_at: transaction.created_at,
        });
        metrics::counter!("warden_transactions_started_total", "kind" => plan.kind().to_string()).increment(1);
        info!(
            transaction_id = %id,
            resource_id = %resource,
            risk_class = %plan.risk_class,
            "Transaction started"
        );

        let coordinator = Arc::clone(self);
        let run_id = id.clone();
        tokio::spawn(async move {
            coordinator.run(run_id, plan).await;
        });

        Ok(id)
    }

    async fn run(&self, id: TransactionId, plan: Plan) {
        let resource = plan.resource_id().clone();

        let outcome = match &plan.request.operation {
            Operation::ApplyFirewall(change) => self.run_firewall(&id, change.ruleset.clone()).await,
            _ => self.run_steps(&id, &plan).await,
        };

        let (status, final_line) = match outcome {
            Outcome::Pending => return,
            Outcome::Succeeded => match self.after_success(&plan).await {
                Ok(Some(note)) => {
                    self.append(&id, note).await;
                    (TransactionStatus::Succeeded, "Transaction completed successfully".to_string())
                }
                Ok(None) => (TransactionStatus::Succeeded, "Transaction completed successfully".to_string()),
                Err(e) => (TransactionStatus::Failed, format!("Failed to record result: {}", e)),
            },
            Outcome::Failed(line) => (TransactionStatus::Failed, line),
        };

        if let Err(e) = self.journal.finish(&id, status, final_line).await {
            error!(transaction_id = %id, "Failed to finish transaction: {}", e);
        }
        self.reservations.release(&resource, &id);
        info!(transaction_id = %id, resource_id = %resource, status = %status, "Transaction finished");
    }

    async fn run_steps(&self, id: &TransactionId, plan: &Plan) -> Outcome {
        let total = plan.steps.len();
        let sink = self.journal.sink(id.clone());

        for (index, step) in plan.steps.iter().enumerate() {
            let number = index + 1;
            self.append(id, format!("Step {}/{}: {}", number, total, step.description)).await;
            self.append(id, format!("$ {}", step.command)).await;
            self.journal.event_bus().publish(TransactionEvent::StepStarted {
                transaction_id: id.clone(),
                step_id: step.id.clone(),
                description: step.description.clone(),
            });

            if let Err(e) = self.executor.execute(step, &sink).await {
                warn!(transaction_id = %id, step_id = %step.id, "Step failed: {}", e);
                return Outcome::Failed(format!("Step {} failed: {}", number, e));
            }

            self.journal.event_bus().publish(TransactionEvent::StepCompleted {
                transaction_id: id.clone(),
                step_id: step.id.clone(),
            });
        }

        Outcome::Succeeded
    }

    async fn run_firewall(&self, id: &TransactionId, ruleset: FirewallRuleset) -> Outcome {
        match self.firewall.arm(id, ruleset).await {
            Ok(_) => Outcome::Pending,
            Err(e) => Outcome::Failed(format!("Firewall apply failed: {}", e)),
        }
    }

    async fn after_success(&self, plan: &Plan) -> Result<Option<String>, RepositoryError> {
        let Operation::SetMountOptions(change) = &plan.request.operation else {
            return Ok(None);
        };
        // already validated while planning
        let Ok(spec) = MountOptionsSpec::parse(&change.options) else {
            return Ok(None);
        };
        let update = self.mount_options.record(plan.resource_id(), spec).await?;
        Ok(Some(if update.reboot_required {
            format!("Mount options recorded: {} (reboot required)", update.accepted)
        } else {
            format!("Mount options recorded: {}", update.accepted)
        }))
    }

    async fn append(&self, id: &TransactionId, line: impl Into<String>) {
        if let Err(e) = self.journal.append(id, line).await {
            warn!(transaction_id = %id, "Failed to append log line: {}", e);
        }
    }

    /// Lines from `cursor` on. Safe to repeat; the log only grows.
    pub async fn poll_log(
        &self,
        id: &TransactionId,
        cursor: usize,
        max_lines: usize,
    ) -> Result<LogPage, CoordinatorError> {
        Ok(self.get(id).await?.page(cursor, max_lines))
    }

    pub async fn status(&self, id: &TransactionId) -> Result<TransactionStatus, CoordinatorError> {
        Ok(self.get(id).await?.status())
    }

    pub async fn get(&self, id: &TransactionId) -> Result<Transaction, CoordinatorError> {
        self.journal
            .repository()
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound(id.clone()))
    }

    pub async fn list(
        &self,
        resource_id: Option<&ResourceId>,
        limit: usize,
    ) -> Result<Vec<Transaction>, CoordinatorError> {
        Ok(self.journal.repository().list(resource_id, limit).await?)
    }

    /// Delete finished transactions that ended more than `older_than` ago
    pub async fn prune(&self, older_than: chrono::Duration) -> Result<usize, CoordinatorError> {
        // A retention reaching past the representable range prunes nothing
        let cutoff = Utc::now()
            .checked_sub_signed(older_than)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.journal.repository().delete_finished_before(cutoff).await?;
        info!(removed, cutoff = %cutoff, "Pruned finished transactions");
        Ok(removed)
    }

    /// Reconcile transactions left Running by a previous process.
    ///
    /// A firewall transaction whose pending change survived is resumed with
    /// its deadline re-armed. Anything else was cut off mid-step and is marked
    /// Failed.
    pub async fn recover(&self) -> Result<usize, CoordinatorError> {
        let resumed = self.firewall.resume().await?;

        let mut failed = 0;
        for transaction in self.journal.repository().find_running().await? {
            if resumed.as_ref() == Some(&transaction.id) {
                continue;
            }
            self.journal
                .finish(
                    &transaction.id,
                    TransactionStatus::Failed,
                    "Interrupted: the service restarted before this transaction completed",
                )
                .await?;
            warn!(transaction_id = %transaction.id, resource_id = %transaction.resource_id, "Marked interrupted transaction as failed");
            failed += 1;
        }
        Ok(failed)
    }

    pub fn firewall(&self) -> &Arc<FirewallGuard> {
        &self.firewall
    }
}

enum Outcome {
    Succeeded,
    Failed(String),
    /// Awaiting firewall confirmation
    Pending,
}
