// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Firewall backends.
//!
//! The appliance's packet filter is driven from a JSON ruleset file that the
//! host's firewall unit loads. [`FileFirewallBackend`] reads and replaces that
//! file; [`InMemoryFirewallBackend`] keeps the ruleset in process.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use crate::domain::firewall::FirewallRuleset;
use crate::domain::runtime::{FirewallBackend, FirewallBackendError};

#[derive(Debug, Clone, Default)]
pub struct InMemoryFirewallBackend {
    current: Arc<RwLock<FirewallRuleset>>,
    installs: Arc<AtomicUsize>,
}

impl InMemoryFirewallBackend {
    pub fn new(initial: FirewallRuleset) -> Self {
        Self {
            current: Arc::new(RwLock::new(initial)),
            installs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of rulesets installed so far
    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> FirewallRuleset {
        self.current.read().clone()
    }
}

#[async_trait]
impl FirewallBackend for InMemoryFirewallBackend {
    async fn current(&self) -> Result<FirewallRuleset, FirewallBackendError> {
        Ok(self.current.read().clone())
    }

    async fn install(&self, ruleset: &FirewallRuleset) -> Result<(), FirewallBackendError> {
        *self.current.write() = ruleset.clone();
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileFirewallBackend {
    path: PathBuf,
}

impl FileFirewallBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FirewallBackend for FileFirewallBackend {
    async fn current(&self) -> Result<FirewallRuleset, FirewallBackendError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| FirewallBackendError::Read(e.to_string())),
            // nothing installed yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FirewallRuleset::default()),
            Err(e) => Err(FirewallBackendError::Read(e.to_string())),
        }
    }

    async fn install(&self, ruleset: &FirewallRuleset) -> Result<(), FirewallBackendError> {
        let body = serde_json::to_vec_pretty(ruleset).map_err(|e| FirewallBackendError::Install(e.to_string()))?;
        let staging = self.path.with_extension("json.new");

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FirewallBackendError::Install(e.to_string()))?;
        }
        tokio::fs::write(&staging, body)
            .await
            .map_err(|e| FirewallBackendError::Install(e.to_string()))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| FirewallBackendError::Install(e.to_string()))?;

        info!(path = %self.path.display(), rules = ruleset.rules.len(), "Installed firewall ruleset");
        Ok(())
    }
}
