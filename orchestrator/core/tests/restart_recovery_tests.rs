// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Durable state across restarts, using the sled store.

mod common;

use std::path::Path;
use std::sync::Arc;

use common::*;
use warden_core::application::services::{Overrides, Services};
use warden_core::domain::firewall::FirewallStatus;
use warden_core::domain::node_config::{NodeConfigManifest, StorageKind};
use warden_core::domain::operation::{OperationKind, ResourceId};
use warden_core::domain::plan::RiskClass;
use warden_core::domain::repository::TransactionRepository;
use warden_core::domain::transaction::{Transaction, TransactionId, TransactionStatus};
use warden_core::infrastructure::firewall_backend::InMemoryFirewallBackend;
use warden_core::infrastructure::repositories::sled_store::{open_database, SledTransactionRepository};

fn sled_config(path: &Path) -> NodeConfigManifest {
    let mut config = NodeConfigManifest::default();
    config.spec.storage.backend = StorageKind::Sled;
    config.spec.storage.path = Some(path.to_path_buf());
    config
}

#[tokio::test]
async fn test_interrupted_transaction_marked_failed() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open_database(dir.path()).unwrap();
        let repo = SledTransactionRepository::new(&db).unwrap();
        let mut tx = Transaction::start(
            1,
            ResourceId::from("p1"),
            OperationKind::RemoveDevices,
            RiskClass::Remove,
        );
        tx.append("Step 1/2: Move data off /dev/sdb and remove it from pool p1");
        repo.insert(&tx).await.unwrap();
    }

    let services = Services::build(&sled_config(dir.path())).await.unwrap();
    let tx = services
        .coordinator
        .get(&TransactionId::from("tx-1"))
        .await
        .unwrap();
    assert_eq!(tx.status(), TransactionStatus::Failed);
    assert!(tx.log().last().unwrap().starts_with("Interrupted"));

    // numbering continues and the pool is not left reserved
    let plan = services
        .planner
        .plan(&replace_request("p1", "/dev/sdb", "/dev/sdc"))
        .unwrap();
    let id = services
        .coordinator
        .apply(plan, RiskClass::Replace, "REPLACE")
        .await
        .unwrap();
    assert_eq!(id.as_str(), "tx-2");
    assert_eq!(
        wait_for_terminal(&services.coordinator, &id).await,
        TransactionStatus::Succeeded
    );
}

#[tokio::test]
async fn test_pending_firewall_change_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let backend = InMemoryFirewallBackend::default();

    let id = {
        let services = Services::build_with(
            &sled_config(dir.path()),
            Overrides {
                firewall_backend: Some(Arc::new(backend.clone())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let plan = services
            .planner
            .plan(&firewall_request(lockdown_ruleset()))
            .unwrap();
        let id = services
            .coordinator
            .apply(plan, RiskClass::FirewallApply, "FIREWALL")
            .await
            .unwrap();
        wait_for_log_line(&services.coordinator, &id, "Awaiting confirmation").await;
        id
    };
    // let the finished apply task drop its handle on the database
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let services = Services::build_with(
        &sled_config(dir.path()),
        Overrides {
            firewall_backend: Some(Arc::new(backend.clone())),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let state = services.firewall.state().await.unwrap();
    assert_eq!(state.status, FirewallStatus::PendingConfirm);
    assert_eq!(state.transaction_id.as_ref(), Some(&id));
    assert_eq!(
        services.coordinator.status(&id).await.unwrap(),
        TransactionStatus::Running
    );

    assert_eq!(services.firewall.confirm().await.unwrap(), id);
    assert_eq!(
        services.coordinator.status(&id).await.unwrap(),
        TransactionStatus::Succeeded
    );
    assert_eq!(backend.snapshot(), lockdown_ruleset());
}
