// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Pool device commands
//!
//! Commands: add, remove, replace

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};

use warden_core::domain::operation::{
    DeviceChange, DeviceReplacement, Operation, OperationRequest, PoolTopology, RaidProfile,
};

use super::{run_guarded, GuardedArgs};
use crate::daemon::DaemonClient;

#[derive(Subcommand)]
pub enum PoolCommand {
    /// Add devices to a pool and rebalance
    Add {
        /// Pool name
        #[arg(value_name = "POOL")]
        pool: String,

        /// Devices to add (e.g. /dev/sdc)
        #[arg(value_name = "DEVICE", required = true)]
        devices: Vec<String>,

        #[command(flatten)]
        topology: TopologyArgs,

        #[command(flatten)]
        guarded: GuardedArgs,
    },

    /// Move data off devices and remove them from a pool
    Remove {
        #[arg(value_name = "POOL")]
        pool: String,

        #[arg(value_name = "DEVICE", required = true)]
        devices: Vec<String>,

        #[command(flatten)]
        topology: TopologyArgs,

        #[command(flatten)]
        guarded: GuardedArgs,
    },

    /// Replace one pool device with another
    Replace {
        #[arg(value_name = "POOL")]
        pool: String,

        /// Device leaving the pool
        #[arg(value_name = "OLD")]
        old_device: String,

        /// Device taking its place
        #[arg(value_name = "NEW")]
        new_device: String,

        #[command(flatten)]
        topology: TopologyArgs,

        #[command(flatten)]
        guarded: GuardedArgs,
    },
}

/// Current pool layout. Optional; enables membership checks and redundancy warnings.
#[derive(Debug, Clone, Args)]
pub struct TopologyArgs {
    /// RAID profile the pool uses
    #[arg(long, value_enum, requires = "members")]
    pub profile: Option<Profile>,

    /// Current member devices (repeatable)
    #[arg(long = "member", value_name = "DEVICE")]
    pub members: Vec<String>,

    /// Mount point when it is not the default under the mount root
    #[arg(long, requires = "profile")]
    pub mount_point: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Profile {
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

impl From<Profile> for RaidProfile {
    fn from(profile: Profile) -> Self {
        match profile {
            Profile::Single => RaidProfile::Single,
            Profile::Dup => RaidProfile::Dup,
            Profile::Raid0 => RaidProfile::Raid0,
            Profile::Raid1 => RaidProfile::Raid1,
            Profile::Raid1c3 => RaidProfile::Raid1c3,
            Profile::Raid1c4 => RaidProfile::Raid1c4,
            Profile::Raid10 => RaidProfile::Raid10,
            Profile::Raid5 => RaidProfile::Raid5,
            Profile::Raid6 => RaidProfile::Raid6,
        }
    }
}

impl TopologyArgs {
    fn into_topology(self) -> Option<PoolTopology> {
        self.profile.map(|profile| PoolTopology {
            profile: profile.into(),
            devices: self.members,
            mount_point: self.mount_point,
        })
    }
}

pub async fn handle_command(command: PoolCommand, client: DaemonClient) -> Result<()> {
    let (request, guarded) = build_request(command);
    run_guarded(&client, request, &guarded).await?;
    Ok(())
}

fn build_request(command: PoolCommand) -> (OperationRequest, GuardedArgs) {
    match command {
        PoolCommand::Add {
            pool,
            devices,
            topology,
            guarded,
        } => (
            OperationRequest::new(
                pool.as_str(),
                Operation::AddDevices(DeviceChange {
                    devices,
                    topology: topology.into_topology(),
                }),
            ),
            guarded,
        ),
        PoolCommand::Remove {
            pool,
            devices,
            topology,
            guarded,
        } => (
            OperationRequest::new(
                pool.as_str(),
                Operation::RemoveDevices(DeviceChange {
                    devices,
                    topology: topology.into_topology(),
                }),
            ),
            guarded,
        ),
        PoolCommand::Replace {
            pool,
            old_device,
            new_device,
            topology,
            guarded,
        } => (
            OperationRequest::new(
                pool.as_str(),
                Operation::ReplaceDevice(DeviceReplacement {
                    old_device: Some(old_device),
                    new_device: Some(new_device),
                    topology: topology.into_topology(),
                }),
            ),
            guarded,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: PoolCommand,
    }

    #[test]
    fn test_replace_with_topology() {
        let cli = TestCli::parse_from([
            "warden",
            "replace",
            "tank",
            "/dev/sdb",
            "/dev/sdd",
            "--profile",
            "raid1",
            "--member",
            "/dev/sdb",
            "--member",
            "/dev/sdc",
            "--confirm",
            "REPLACE",
        ]);
        let (request, guarded) = build_request(cli.command);

        assert_eq!(request.resource_id.as_str(), "tank");
        assert_eq!(guarded.confirm.as_deref(), Some("REPLACE"));
        match request.operation {
            Operation::ReplaceDevice(replacement) => {
                assert_eq!(replacement.old_device.as_deref(), Some("/dev/sdb"));
                assert_eq!(replacement.new_device.as_deref(), Some("/dev/sdd"));
                let topology = replacement.topology.unwrap();
                assert_eq!(topology.profile, RaidProfile::Raid1);
                assert_eq!(topology.devices, vec!["/dev/sdb", "/dev/sdc"]);
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_add_without_topology() {
        let cli = TestCli::parse_from(["warden", "add", "tank", "/dev/sde", "/dev/sdf", "--dry-run"]);
        let (request, guarded) = build_request(cli.command);

        assert!(guarded.dry_run);
        match request.operation {
            Operation::AddDevices(change) => {
                assert_eq!(change.devices.len(), 2);
                assert!(change.topology.is_none());
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_add_requires_a_device() {
        assert!(TestCli::try_parse_from(["warden", "add", "tank"]).is_err());
    }
}
