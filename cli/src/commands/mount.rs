// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mount option commands
//!
//! Commands: get, set, apply

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use warden_core::domain::operation::{MountOptionsChange, Operation, OperationRequest};

use super::{run_guarded, GuardedArgs};
use crate::daemon::DaemonClient;

#[derive(Subcommand)]
pub enum MountCommand {
    /// Show configured and active mount options
    Get {
        #[arg(value_name = "POOL")]
        pool: String,
    },

    /// Store mount options for the next mount without touching the live mount
    Set {
        #[arg(value_name = "POOL")]
        pool: String,

        /// Comma-separated options, e.g. compress=zstd:3,noatime
        #[arg(value_name = "OPTIONS")]
        options: String,
    },

    /// Apply mount options to the live mount as a guarded transaction
    Apply {
        #[arg(value_name = "POOL")]
        pool: String,

        #[arg(value_name = "OPTIONS")]
        options: String,

        #[command(flatten)]
        guarded: GuardedArgs,
    },
}

pub async fn handle_command(command: MountCommand, client: DaemonClient) -> Result<()> {
    match command {
        MountCommand::Get { pool } => get(&client, &pool).await,
        MountCommand::Set { pool, options } => set(&client, &pool, &options).await,
        MountCommand::Apply {
            pool,
            options,
            guarded,
        } => {
            let request = OperationRequest::new(
                pool.as_str(),
                Operation::SetMountOptions(MountOptionsChange { options }),
            );
            run_guarded(&client, request, &guarded).await?;
            Ok(())
        }
    }
}

async fn get(client: &DaemonClient, pool: &str) -> Result<()> {
    let response = client.mount_options(pool).await?;

    println!("{}", format!("Mount options for {}:", response.resource_id).bold());
    println!("  Configured: {}", empty_as_none(&response.options));
    println!(
        "  Active:     {}",
        response.active.as_deref().map(empty_as_none).unwrap_or_else(|| "(unknown)".dimmed().to_string())
    );
    if response.reboot_required {
        println!("  {}", "Reboot required for the configured options to take effect".yellow());
    }

    Ok(())
}

async fn set(client: &DaemonClient, pool: &str, options: &str) -> Result<()> {
    let update = client.set_mount_options(pool, options).await?;

    println!("{}", format!("✓ Mount options stored: {}", empty_as_none(&update.accepted)).green());
    if update.reboot_required {
        println!("{}", "Reboot required for the new options to take effect".yellow());
    }

    Ok(())
}

fn empty_as_none(options: &str) -> String {
    if options.is_empty() {
        "(none)".dimmed().to_string()
    } else {
        options.to_string()
    }
}
