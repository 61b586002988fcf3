// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mount option service.
//!
//! Records the options a pool should be mounted with. Options only take
//! effect when the pool is next mounted, so every update reports whether the
//! accepted set differs from what the pool is mounted with now.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::mount_options::{MountOptionsSpec, ValidationError};
use crate::domain::operation::ResourceId;
use crate::domain::repository::{MountOptionsRepository, PoolMountOptions, RepositoryError};

#[derive(Debug, Error)]
pub enum MountOptionsError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result of a successful `set`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountOptionsUpdate {
    pub accepted: String,
    pub reboot_required: bool,
}

#[derive(Clone)]
pub struct MountOptionsService {
    repository: Arc<dyn MountOptionsRepository>,
}

fn reboot_required(options: &PoolMountOptions) -> bool {
    match (&options.configured, &options.active) {
        (Some(configured), Some(active)) => configured.token_set() != active.token_set(),
        (Some(_), None) => true,
        (None, _) => false,
    }
}

impl MountOptionsService {
    pub fn new(repository: Arc<dyn MountOptionsRepository>) -> Self {
        Self { repository }
    }

    /// Record the options pools are mounted with at startup.
    ///
    /// Pools that already have active options stored keep them.
    pub async fn seed_active(&self, mounted: &BTreeMap<String, String>) -> Result<(), RepositoryError> {
        for (pool, options) in mounted {
            let spec = match MountOptionsSpec::parse(options) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(resource_id = %pool, "Ignoring mounted options from config: {}", e);
                    continue;
                }
            };
            let resource = ResourceId::new(pool.as_str());
            let mut stored = self.repository.find(&resource).await?;
            if stored.active.is_none() {
                stored.active = Some(spec);
                self.repository.save(&resource, &stored).await?;
            }
        }
        Ok(())
    }

    /// Configured options, or an empty string when none were ever set
    pub async fn get(&self, resource_id: &ResourceId) -> Result<String, RepositoryError> {
        let stored = self.repository.find(resource_id).await?;
        Ok(stored.configured.map(|spec| spec.to_string()).unwrap_or_default())
    }

    pub async fn details(&self, resource_id: &ResourceId) -> Result<PoolMountOptions, RepositoryError> {
        self.repository.find(resource_id).await
    }

    pub async fn reboot_required(&self, resource_id: &ResourceId) -> Result<bool, RepositoryError> {
        Ok(reboot_required(&self.repository.find(resource_id).await?))
    }

    /// Validate, normalise and store `value` as the configured options
    pub async fn set(&self, resource_id: &ResourceId, value: &str) -> Result<MountOptionsUpdate, MountOptionsError> {
        let spec = MountOptionsSpec::parse(value)?;
        Ok(self.record(resource_id, spec).await?)
    }

    pub async fn record(
        &self,
        resource_id: &ResourceId,
        spec: MountOptionsSpec,
    ) -> Result<MountOptionsUpdate, RepositoryError> {
        let mut stored = self.repository.find(resource_id).await?;
        stored.configured = Some(spec.clone());
        self.repository.save(resource_id, &stored).await?;

        let update = MountOptionsUpdate {
            accepted: spec.to_string(),
            reboot_required: reboot_required(&stored),
        };
        info!(
            resource_id = %resource_id,
            options = %update.accepted,
            reboot_required = update.reboot_required,
            "Mount options recorded"
        );
        Ok(update)
    }
}
