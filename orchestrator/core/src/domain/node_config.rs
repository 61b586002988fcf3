// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for a Warden appliance node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - HTTP API binding
// - Storage backend for transactions and pending firewall changes
// - Step executor mode
// - Pool and firewall guard settings
// - Observability settings

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::repository::StorageBackend;

pub const API_VERSION: &str = "warden/v1";
pub const KIND: &str = "NodeConfig";

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigManifest {
    /// API version (must be "warden/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NodeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: NodeConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfigSpec {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub pools: PoolsConfig,

    #[serde(default)]
    pub firewall: FirewallGuardConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_bind_address(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Sled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageKind,

    /// Database directory (required for sled)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn backend(&self) -> anyhow::Result<StorageBackend> {
        match self.backend {
            StorageKind::Memory => Ok(StorageBackend::InMemory),
            StorageKind::Sled => {
                let path = self
                    .path
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("spec.storage.path is required for the sled backend"))?;
                Ok(StorageBackend::Sled { path })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorMode {
    /// Record commands in the log without running them
    #[default]
    DryRun,
    /// Run commands through `sh -c`
    Shell,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub mode: ExecutorMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsConfig {
    /// Directory pools are mounted under when a request gives no mount point
    #[serde(default = "default_mount_root")]
    pub mount_root: String,

    /// Mount options each pool is currently mounted with, keyed by pool name
    #[serde(default)]
    pub mounted: BTreeMap<String, String>,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            mount_root: default_mount_root(),
            mounted: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallGuardConfig {
    /// Seconds an applied ruleset stays provisional before automatic rollback
    #[serde(default = "default_grace_period")]
    pub grace_period_seconds: u64,

    /// How often the rollback deadline is checked
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: u64,

    /// TCP port the console is served on; rulesets that block it get a warning
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// File holding the installed ruleset; in-memory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ruleset_path: Option<PathBuf>,
}

impl FirewallGuardConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }
}

impl Default for FirewallGuardConfig {
    fn default() -> Self {
        Self {
            grace_period_seconds: default_grace_period(),
            tick_interval_seconds: default_tick_interval(),
            admin_port: default_admin_port(),
            ruleset_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Expose Prometheus metrics
    #[serde(default)]
    pub metrics_enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub metrics_listen: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_listen: default_metrics_listen(),
        }
    }
}

// Default value functions
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8600
}

fn default_mount_root() -> String {
    "/mnt".to_string()
}

fn default_grace_period() -> u64 {
    60
}

fn default_tick_interval() -> u64 {
    5
}

fn default_admin_port() -> u16 {
    443
}

fn default_metrics_listen() -> String {
    "127.0.0.1:9600".to_string()
}

impl Default for NodeConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "warden-node".to_string(),
                labels: None,
            },
            spec: NodeConfigSpec::default(),
        }
    }
}

impl NodeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. WARDEN_CONFIG_PATH environment variable
    /// 2. ./warden-config.yaml (working directory)
    /// 3. ~/.warden/config.yaml (user home)
    /// 4. /etc/warden/config.yaml
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("WARDEN_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./warden-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".warden").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/warden/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("WARDEN_EXECUTOR_MODE") {
            match val.to_lowercase().as_str() {
                "dry-run" | "dry_run" | "dryrun" => {
                    tracing::info!("Environment override: WARDEN_EXECUTOR_MODE=dry-run");
                    self.spec.executor.mode = ExecutorMode::DryRun;
                }
                "shell" => {
                    tracing::info!("Environment override: WARDEN_EXECUTOR_MODE=shell");
                    self.spec.executor.mode = ExecutorMode::Shell;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for WARDEN_EXECUTOR_MODE: '{}'. Expected dry-run/shell. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("WARDEN_FIREWALL_GRACE_SECONDS") {
            match val.parse::<u64>() {
                Ok(seconds) => {
                    tracing::info!("Environment override: WARDEN_FIREWALL_GRACE_SECONDS={}", seconds);
                    self.spec.firewall.grace_period_seconds = seconds;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for WARDEN_FIREWALL_GRACE_SECONDS: '{}'. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("WARDEN_STORAGE_PATH") {
            tracing::info!("Environment override: WARDEN_STORAGE_PATH={}", val);
            self.spec.storage.backend = StorageKind::Sled;
            self.spec.storage.path = Some(PathBuf::from(val));
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let max_seconds = crate::domain::firewall::MAX_GRACE_PERIOD.as_secs();
        if self.spec.firewall.grace_period_seconds == 0 {
            anyhow::bail!("spec.firewall.grace_period_seconds must be greater than zero");
        }
        if self.spec.firewall.grace_period_seconds > max_seconds {
            anyhow::bail!("spec.firewall.grace_period_seconds must be at most {}", max_seconds);
        }

        if self.spec.firewall.tick_interval_seconds == 0 {
            anyhow::bail!("spec.firewall.tick_interval_seconds must be greater than zero");
        }
        if self.spec.firewall.tick_interval_seconds > max_seconds {
            anyhow::bail!("spec.firewall.tick_interval_seconds must be at most {}", max_seconds);
        }

        self.spec.storage.backend()?;

        for (pool, options) in &self.spec.pools.mounted {
            crate::domain::mount_options::MountOptionsSpec::parse(options)
                .map_err(|e| anyhow::anyhow!("spec.pools.mounted.{}: {}", pool, e))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfigManifest::default();
        config.validate().unwrap();
        assert_eq!(config.spec.firewall.grace_period(), Duration::from_secs(60));
        assert_eq!(config.spec.executor.mode, ExecutorMode::DryRun);
    }

    #[test]
    fn test_parse_full_manifest() {
        let yaml = r#"
apiVersion: warden/v1
kind: NodeConfig
metadata:
  name: nas-01
spec:
  api:
    port: 9000
  storage:
    backend: sled
    path: /var/lib/warden
  executor:
    mode: shell
  pools:
    mount_root: /srv
    mounted:
      tank: "compress=zstd:3,noatime"
  firewall:
    grace_period_seconds: 120
    admin_port: 8443
"#;
        let config = NodeConfigManifest::from_yaml_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.spec.api.port, 9000);
        assert_eq!(config.spec.api.host, "127.0.0.1");
        assert_eq!(config.spec.executor.mode, ExecutorMode::Shell);
        assert_eq!(config.spec.pools.mount_root, "/srv");
        assert_eq!(config.spec.firewall.admin_port, 8443);
        assert_eq!(config.spec.firewall.tick_interval_seconds, 5);
        assert_eq!(
            config.spec.storage.backend().unwrap(),
            StorageBackend::Sled { path: PathBuf::from("/var/lib/warden") }
        );
    }

    #[test]
    fn test_rejects_wrong_api_version() {
        let mut config = NodeConfigManifest::default();
        config.api_version = "v0".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_firewall_timings() {
        let mut config = NodeConfigManifest::default();
        config.spec.firewall.grace_period_seconds = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = NodeConfigManifest::default();
        config.spec.firewall.tick_interval_seconds = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = NodeConfigManifest::default();
        config.spec.firewall.grace_period_seconds = 24 * 60 * 60;
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_sled_without_path() {
        let mut config = NodeConfigManifest::default();
        config.spec.storage.backend = StorageKind::Sled;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_invalid_mounted_options() {
        let mut config = NodeConfigManifest::default();
        config
            .spec
            .pools
            .mounted
            .insert("tank".to_string(), "nodatacow".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("nodatacow is not allowed"));
    }

    #[test]
    fn test_zero_grace_period_rejected() {
        let mut config = NodeConfigManifest::default();
        config.spec.firewall.grace_period_seconds = 0;
        assert!(config.validate().is_err());
    }
}
