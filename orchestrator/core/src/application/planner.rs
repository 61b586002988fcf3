// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Plan Engine
//!
//! Turns an [`OperationRequest`] into an ordered, human-readable [`Plan`].
//! Planning is pure: it never touches the system, and the same request always
//! produces a structurally equal plan.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Validate operation shape, derive steps, warnings and risk class

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use crate::domain::firewall::{FirewallRuleset, Protocol, FIREWALL_RESOURCE};
use crate::domain::mount_options::MountOptionsSpec;
use crate::domain::operation::{
    DeviceChange, DeviceReplacement, MountOptionsChange, Operation, OperationRequest, PoolTopology,
};
use crate::domain::plan::{Plan, PlanError, RiskClass, Step};

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Pools without an explicit mount point live at `<mount_root>/<pool>`
    pub mount_root: String,

    /// Console port checked when planning firewall changes
    pub admin_port: u16,

    /// Firewall confirmation window quoted in firewall plans
    pub grace_period: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            mount_root: "/mnt".to_string(),
            admin_port: 443,
            grace_period: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanEngine {
    config: PlannerConfig,
}

/// Accumulates numbered steps
struct StepList(Vec<Step>);

impl StepList {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn push(&mut self, description: String, command: String) {
        let id = format!("step-{}", self.0.len() + 1);
        self.0.push(Step::new(id, description, command));
    }
}

impl PlanEngine {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn plan(&self, request: &OperationRequest) -> Result<Plan, PlanError> {
        if request.resource_id.as_str().trim().is_empty() {
            return Err(PlanError::InvalidInput("resource_id is required".to_string()));
        }
        check_resource_id(request.resource_id.as_str())?;

        let (steps, warnings) = match &request.operation {
            Operation::AddDevices(change) => self.plan_add(request, change)?,
            Operation::RemoveDevices(change) => self.plan_remove(request, change)?,
            Operation::ReplaceDevice(replacement) => self.plan_replace(request, replacement)?,
            Operation::SetMountOptions(change) => self.plan_mount_options(request, change)?,
            Operation::ApplyFirewall(change) => self.plan_firewall(request, &change.ruleset)?,
        };

        Ok(Plan {
            request: request.clone(),
            risk_class: RiskClass::for_kind(request.kind()),
            steps: steps.0,
            warnings,
        })
    }

    fn mount_point(
        &self,
        request: &OperationRequest,
        topology: Option<&PoolTopology>,
    ) -> Result<String, PlanError> {
        let mount_point = topology
            .and_then(|t| t.mount_point.clone())
            .unwrap_or_else(|| {
                format!(
                    "{}/{}",
                    self.config.mount_root.trim_end_matches('/'),
                    request.resource_id
                )
            });
        check_mount_point(&mount_point)?;
        Ok(mount_point)
    }

    fn plan_add(
        &self,
        request: &OperationRequest,
        change: &DeviceChange,
    ) -> Result<(StepList, Vec<String>), PlanError> {
        let pool = &request.resource_id;
        check_device_list(&change.devices, "add")?;

        let mut warnings = Vec::new();
        match &change.topology {
            Some(topology) => {
                if let Some(member) = change.devices.iter().find(|d| topology.devices.contains(d)) {
                    return Err(PlanError::InvalidInput(format!(
                        "{} is already a member of pool {}",
                        member, pool
                    )));
                }
            }
            None => warnings.push(topology_unknown_warning()),
        }
        warnings.push(format!(
            "Existing data stays on the current devices until pool {} is balanced",
            pool
        ));

        let mount_point = self.mount_point(request, change.topology.as_ref())?;
        let mut steps = StepList::new();
        for device in &change.devices {
            steps.push(
                format!("Add {} to pool {}", device, pool),
                format!("btrfs device add {} {}", device, mount_point),
            );
        }
        steps.push(
            format!("Verify that pool {} lists the new devices", pool),
            format!("btrfs filesystem show {}", mount_point),
        );

        Ok((steps, warnings))
    }

    fn plan_remove(
        &self,
        request: &OperationRequest,
        change: &DeviceChange,
    ) -> Result<(StepList, Vec<String>), PlanError> {
        let pool = &request.resource_id;
        check_device_list(&change.devices, "remove")?;

        let mut warnings = Vec::new();
        match &change.topology {
            Some(topology) => {
                if let Some(stranger) = change.devices.iter().find(|d| !topology.devices.contains(d)) {
                    return Err(PlanError::InvalidInput(format!(
                        "{} is not a member of pool {}",
                        stranger, pool
                    )));
                }
                let remaining = topology.devices.len() - change.devices.len();
                if remaining == 0 {
                    return Err(PlanError::InvalidInput(format!(
                        "cannot remove every device from pool {}",
                        pool
                    )));
                }
                if remaining < topology.profile.min_devices() {
                    warnings.push(format!(
                        "Removing {} device(s) leaves {}, below the minimum of {} for {}; pool {} loses redundancy",
                        change.devices.len(),
                        remaining,
                        topology.profile.min_devices(),
                        topology.profile,
                        pool
                    ));
                }
            }
            None => warnings.push(topology_unknown_warning()),
        }
        warnings.push(
            "Data on the removed devices is relocated to the remaining devices; this needs enough free space and can take hours"
                .to_string(),
        );

        let mount_point = self.mount_point(request, change.topology.as_ref())?;
        let mut steps = StepList::new();
        for device in &change.devices {
            steps.push(
                format!("Move data off {} and remove it from pool {}", device, pool),
                format!("btrfs device remove {} {}", device, mount_point),
            );
        }
        steps.push(
            format!("Verify that pool {} no longer lists the removed devices", pool),
            format!("btrfs filesystem show {}", mount_point),
        );

        Ok((steps, warnings))
    }

    fn plan_replace(
        &self,
        request: &OperationRequest,
        replacement: &DeviceReplacement,
    ) -> Result<(StepList, Vec<String>), PlanError> {
        let pool = &request.resource_id;
        let (old, new) = match (non_blank(&replacement.old_device), non_blank(&replacement.new_device)) {
            (Some(old), Some(new)) => (old, new),
            _ => {
                return Err(PlanError::InvalidInput(
                    "replace requires both old_device and new_device".to_string(),
                ))
            }
        };
        check_device_path(old)?;
        check_device_path(new)?;
        if old == new {
            return Err(PlanError::InvalidInput(
                "old_device and new_device must differ".to_string(),
            ));
        }

        let mut warnings = Vec::new();
        match &replacement.topology {
            Some(topology) => {
                if !topology.devices.iter().any(|d| d == old) {
                    return Err(PlanError::InvalidInput(format!(
                        "{} is not a member of pool {}",
                        old, pool
                    )));
                }
                if topology.devices.iter().any(|d| d == new) {
                    return Err(PlanError::InvalidInput(format!(
                        "{} is already a member of pool {}",
                        new, pool
                    )));
                }
                if !topology.profile.is_redundant() {
                    warnings.push(format!(
                        "Pool {} uses {}, which has no redundancy; a read error on {} during the replace cannot be repaired",
                        pool, topology.profile, old
                    ));
                }
            }
            None => warnings.push(topology_unknown_warning()),
        }
        warnings.push(format!(
            "Pool {} runs with reduced performance while data is rebuilt onto {}",
            pool, new
        ));

        let mount_point = self.mount_point(request, replacement.topology.as_ref())?;
        let mut steps = StepList::new();
        steps.push(
            format!("Replace {} with {} in pool {}, rebuilding its data onto {}", old, new, pool, new),
            format!("btrfs replace start -B -f {} {} {}", old, new, mount_point),
        );
        steps.push(
            format!("Verify that pool {} lists {}", pool, new),
            format!("btrfs filesystem show {}", mount_point),
        );

        Ok((steps, warnings))
    }

    fn plan_mount_options(
        &self,
        request: &OperationRequest,
        change: &MountOptionsChange,
    ) -> Result<(StepList, Vec<String>), PlanError> {
        let pool = &request.resource_id;
        let options = MountOptionsSpec::parse(&change.options)?;
        if !is_plain(&options.to_string(), &['=', ':', ',']) {
            return Err(PlanError::InvalidInput(format!(
                "mount options '{}' contain characters mount cannot be given",
                options
            )));
        }
        let mount_point = self.mount_point(request, None)?;

        let mut steps = StepList::new();
        steps.push(
            format!("Check that pool {} has an fstab entry", pool),
            format!("findmnt --fstab --target {}", mount_point),
        );
        steps.push(
            format!("Remount pool {} with options {}", pool, options),
            format!("mount -o remount,{} {}", options, mount_point),
        );

        let warnings = vec![format!(
            "Options the kernel cannot change on remount take effect only after pool {} is next mounted; a reboot may be required",
            pool
        )];

        Ok((steps, warnings))
    }

    fn plan_firewall(
        &self,
        request: &OperationRequest,
        ruleset: &FirewallRuleset,
    ) -> Result<(StepList, Vec<String>), PlanError> {
        if request.resource_id.as_str() != FIREWALL_RESOURCE {
            return Err(PlanError::InvalidInput(format!(
                "firewall changes must target resource '{}'",
                FIREWALL_RESOURCE
            )));
        }

        for (index, rule) in ruleset.rules.iter().enumerate() {
            let position = index + 1;
            if let Some(port) = rule.port {
                if port == 0 {
                    return Err(PlanError::InvalidInput(format!("rule {}: port 0 is not valid", position)));
                }
                if rule.protocol == Protocol::Any {
                    return Err(PlanError::InvalidInput(format!(
                        "rule {}: a port requires protocol tcp or udp",
                        position
                    )));
                }
            }
            if let Some(source) = &rule.source {
                if !is_valid_source(source) {
                    return Err(PlanError::InvalidInput(format!(
                        "rule {}: invalid source address '{}'",
                        position, source
                    )));
                }
            }
        }

        let grace = self.config.grace_period.as_secs();
        let mut warnings = vec![format!(
            "The new ruleset is provisional: confirm within {} seconds or it is rolled back automatically",
            grace
        )];
        if !ruleset.admits_admin_port(self.config.admin_port) {
            warnings.push(format!(
                "The ruleset does not allow TCP port {}; you may lose access to this console",
                self.config.admin_port
            ));
        }

        let policy = match ruleset.default_policy {
            crate::domain::firewall::DefaultPolicy::Accept => "accept",
            crate::domain::firewall::DefaultPolicy::Drop => "drop",
        };
        let mut steps = StepList::new();
        steps.push(
            "Snapshot the current firewall ruleset".to_string(),
            "firewall snapshot".to_string(),
        );
        steps.push(
            format!(
                "Install the new ruleset ({} rule(s), default policy {})",
                ruleset.rules.len(),
                policy
            ),
            format!("firewall install --rules {} --policy {}", ruleset.rules.len(), policy),
        );
        steps.push(
            format!("Roll back automatically unless confirmed within {} seconds", grace),
            format!("firewall arm-rollback {}", grace),
        );

        Ok((steps, warnings))
    }
}

fn topology_unknown_warning() -> String {
    "Pool topology was not supplied; membership and redundancy checks were skipped".to_string()
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn check_device_list(devices: &[String], verb: &str) -> Result<(), PlanError> {
    if devices.is_empty() {
        return Err(PlanError::InvalidInput(format!(
            "at least one device is required to {}",
            verb
        )));
    }

    let mut seen = HashSet::new();
    for device in devices {
        check_device_path(device)?;
        if !seen.insert(device.as_str()) {
            return Err(PlanError::InvalidInput(format!("{} is listed more than once", device)));
        }
    }
    Ok(())
}

/// Step commands are run through a shell, so every value spliced into them
/// is limited to characters the shell passes through literally.
fn is_plain(value: &str, extra: &[char]) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') || extra.contains(&c))
}

fn check_resource_id(id: &str) -> Result<(), PlanError> {
    if is_plain(id, &[]) && id != "." && id != ".." {
        Ok(())
    } else {
        Err(PlanError::InvalidInput(format!(
            "resource_id '{}' may only contain letters, digits, '.', '_' and '-'",
            id
        )))
    }
}

fn check_device_path(device: &str) -> Result<(), PlanError> {
    let valid = device
        .strip_prefix("/dev/")
        .is_some_and(|name| is_plain(name, &['/', ':']) && !name.contains(".."));
    if valid {
        Ok(())
    } else {
        Err(PlanError::InvalidInput(format!("'{}' is not a device path under /dev", device)))
    }
}

fn check_mount_point(path: &str) -> Result<(), PlanError> {
    if path.starts_with('/') && is_plain(path, &['/']) && !path.contains("..") {
        Ok(())
    } else {
        Err(PlanError::InvalidInput(format!("'{}' is not a valid mount point", path)))
    }
}

fn is_valid_source(source: &str) -> bool {
    match source.split_once('/') {
        Some((address, prefix)) => match (address.parse::<IpAddr>(), prefix.parse::<u8>()) {
            (Ok(IpAddr::V4(_)), Ok(prefix)) => prefix <= 32,
            (Ok(IpAddr::V6(_)), Ok(prefix)) => prefix <= 128,
            _ => false,
        },
        None => source.parse::<IpAddr>().is_ok(),
    }
}
