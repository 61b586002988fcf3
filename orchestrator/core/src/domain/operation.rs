// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Operation requests submitted for planning.
//!
//! A request names the resource it targets and carries a kind-specific
//! payload. Requests are immutable once submitted; the planner only reads them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::firewall::FirewallRuleset;

/// Identifier of the resource an operation targets (a pool name, or the
/// firewall singleton)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    AddDevices,
    RemoveDevices,
    ReplaceDevice,
    SetMountOptions,
    ApplyFirewall,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::AddDevices => "add_devices",
            OperationKind::RemoveDevices => "remove_devices",
            OperationKind::ReplaceDevice => "replace_device",
            OperationKind::SetMountOptions => "set_mount_options",
            OperationKind::ApplyFirewall => "apply_firewall",
        };
        f.write_str(name)
    }
}

/// A request for a guarded change against one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub resource_id: ResourceId,
    #[serde(flatten)]
    pub operation: Operation,
}

impl OperationRequest {
    pub fn new(resource_id: impl Into<ResourceId>, operation: Operation) -> Self {
        Self {
            resource_id: resource_id.into(),
            operation,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }
}

/// Kind-specific payload, serialized as `{"kind": ..., "payload": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    AddDevices(DeviceChange),
    RemoveDevices(DeviceChange),
    ReplaceDevice(DeviceReplacement),
    SetMountOptions(MountOptionsChange),
    ApplyFirewall(FirewallChange),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::AddDevices(_) => OperationKind::AddDevices,
            Operation::RemoveDevices(_) => OperationKind::RemoveDevices,
            Operation::ReplaceDevice(_) => OperationKind::ReplaceDevice,
            Operation::SetMountOptions(_) => OperationKind::SetMountOptions,
            Operation::ApplyFirewall(_) => OperationKind::ApplyFirewall,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceChange {
    #[serde(default)]
    pub devices: Vec<String>,

    /// Current pool layout, when the caller knows it. Enables membership
    /// checks and redundancy warnings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<PoolTopology>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceReplacement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_device: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_device: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<PoolTopology>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountOptionsChange {
    pub options: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallChange {
    pub ruleset: FirewallRuleset,
}

/// Layout of a pool at planning time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTopology {
    pub profile: RaidProfile,
    pub devices: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaidProfile {
    Single,
    Dup,
    Raid0,
    Raid1,
    Raid1c3,
    Raid1c4,
    Raid10,
    Raid5,
    Raid6,
}

impl RaidProfile {
    /// Fewest member devices the profile can be kept on
    pub fn min_devices(&self) -> usize {
        match self {
            RaidProfile::Single | RaidProfile::Dup => 1,
            RaidProfile::Raid0 | RaidProfile::Raid1 | RaidProfile::Raid5 => 2,
            RaidProfile::Raid1c3 | RaidProfile::Raid6 => 3,
            RaidProfile::Raid1c4 | RaidProfile::Raid10 => 4,
        }
    }

    /// Whether the profile survives the loss of one device
    pub fn is_redundant(&self) -> bool {
        !matches!(self, RaidProfile::Single | RaidProfile::Dup | RaidProfile::Raid0)
    }
}

impl fmt::Display for RaidProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RaidProfile::Single => "single",
            RaidProfile::Dup => "dup",
            RaidProfile::Raid0 => "raid0",
            RaidProfile::Raid1 => "raid1",
            RaidProfile::Raid1c3 => "raid1c3",
            RaidProfile::Raid1c4 => "raid1c4",
            RaidProfile::Raid10 => "raid10",
            RaidProfile::Raid5 => "raid5",
            RaidProfile::Raid6 => "raid6",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = OperationRequest::new(
            "p1",
            Operation::ReplaceDevice(DeviceReplacement {
                old_device: Some("/dev/sdb".to_string()),
                new_device: Some("/dev/sdc".to_string()),
                topology: None,
            }),
        );

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "resource_id": "p1",
                "kind": "replace_device",
                "payload": { "old_device": "/dev/sdb", "new_device": "/dev/sdc" }
            })
        );

        let decoded: OperationRequest = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.kind(), OperationKind::ReplaceDevice);
    }

    #[test]
    fn test_missing_devices_default_to_empty() {
        let decoded: OperationRequest = serde_json::from_value(json!({
            "resource_id": "p1",
            "kind": "add_devices",
            "payload": {}
        }))
        .unwrap();

        match decoded.operation {
            Operation::AddDevices(change) => assert!(change.devices.is_empty()),
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn test_profile_redundancy() {
        assert!(RaidProfile::Raid1.is_redundant());
        assert!(!RaidProfile::Raid0.is_redundant());
        assert_eq!(RaidProfile::Raid1c3.min_devices(), 3);
    }
}
