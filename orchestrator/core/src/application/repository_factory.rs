// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations based on storage backend
//! configuration, keeping the domain layer free of infrastructure types.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Select repository implementations for the configured backend

use std::sync::Arc;

use crate::domain::repository::{
    FirewallRepository, MountOptionsRepository, RepositoryError, StorageBackend, TransactionRepository,
};
use crate::infrastructure::repositories::sled_store::open_database;
use crate::infrastructure::repositories::{
    InMemoryFirewallRepository, InMemoryMountOptionsRepository, InMemoryTransactionRepository,
    SledFirewallRepository, SledMountOptionsRepository, SledTransactionRepository,
};

/// All repositories for one node, sharing a single database
#[derive(Clone)]
pub struct Repositories {
    pub transactions: Arc<dyn TransactionRepository>,
    pub firewall: Arc<dyn FirewallRepository>,
    pub mount_options: Arc<dyn MountOptionsRepository>,
}

/// Creates the repository set for the configured backend.
///
/// A sled database may only be opened once per process, so all repositories
/// are created together.
pub fn create_repositories(backend: &StorageBackend) -> Result<Repositories, RepositoryError> {
    match backend {
        StorageBackend::InMemory => Ok(Repositories {
            transactions: Arc::new(InMemoryTransactionRepository::new()),
            firewall: Arc::new(InMemoryFirewallRepository::new()),
            mount_options: Arc::new(InMemoryMountOptionsRepository::new()),
        }),
        StorageBackend::Sled { path } => {
            let db = open_database(path)?;
            Ok(Repositories {
                transactions: Arc::new(SledTransactionRepository::new(&db)?),
                firewall: Arc::new(SledFirewallRepository::new(&db)?),
                mount_options: Arc::new(SledMountOptionsRepository::new(&db)?),
            })
        }
    }
}
