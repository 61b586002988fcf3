// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for Warden CLI

use anyhow::{Context, Result};
use colored::Colorize;
use dialoguer::Input;
use std::time::Duration;

use warden_core::domain::operation::OperationRequest;
use warden_core::domain::transaction::{TransactionId, TransactionStatus};
use warden_core::presentation::api::PlanResponse;

use crate::daemon::DaemonClient;

pub mod config;
pub mod firewall;
pub mod mount;
pub mod pool;
pub mod tx;

pub use self::config::ConfigCommand;
pub use self::firewall::FirewallCommand;
pub use self::mount::MountCommand;
pub use self::pool::PoolCommand;
pub use self::tx::TxCommand;

const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(500);
const FOLLOW_PAGE_SIZE: usize = 500;

/// Flags shared by every command that applies a guarded operation
#[derive(Debug, Clone, clap::Args)]
pub struct GuardedArgs {
    /// Confirmation phrase; prompts for it when omitted
    #[arg(long, value_name = "PHRASE")]
    pub confirm: Option<String>,

    /// Show the plan and exit without applying it
    #[arg(long)]
    pub dry_run: bool,

    /// Return once the transaction is accepted instead of following its log
    #[arg(long)]
    pub no_follow: bool,

    #[arg(skip)]
    pub follow_until: Option<&'static str>,
}

/// Plan, show, confirm and apply a request, then follow the transaction log
pub async fn run_guarded(
    client: &DaemonClient,
    request: OperationRequest,
    args: &GuardedArgs,
) -> Result<Option<TransactionId>> {
    let planned = client.plan(&request).await?;
    print_plan(&planned);

    if args.dry_run {
        return Ok(None);
    }

    let phrase = match &args.confirm {
        Some(phrase) => phrase.clone(),
        None => Input::<String>::new()
            .with_prompt(format!(
                "Type {} to proceed",
                planned.confirmation_phrase.bold()
            ))
            .interact_text()
            .context("Failed to read confirmation")?,
    };

    let risk_class = planned.plan.risk_class;
    let id = client.apply(planned.plan, risk_class, &phrase).await?;
    println!("{} {}", "Transaction started:".green(), id.to_string().bold());

    if !args.no_follow {
        follow_log(client, &id, 0, args.follow_until).await?;
    }

    Ok(Some(id))
}

pub fn print_plan(planned: &PlanResponse) {
    let plan = &planned.plan;
    println!(
        "{} {} on {} (risk class {})",
        "Plan:".bold(),
        plan.kind(),
        plan.resource_id().to_string().bold(),
        plan.risk_class
    );
    for (i, step) in plan.steps.iter().enumerate() {
        println!("  {}. {}", i + 1, step.description);
        println!("     {}", format!("$ {}", step.command).dimmed());
    }
    for warning in &plan.warnings {
        println!("  {} {}", "Warning:".yellow().bold(), warning);
    }
}

/// Print log lines from `cursor` until the transaction reaches a terminal
/// status, or until a line starting with `until` is printed.
pub async fn follow_log(
    client: &DaemonClient,
    id: &TransactionId,
    mut cursor: usize,
    until: Option<&str>,
) -> Result<TransactionStatus> {
    loop {
        let page = client.poll_log(id, cursor, FOLLOW_PAGE_SIZE).await?;
        for line in &page.lines {
            println!("{}", line);
            if until.is_some_and(|marker| line.starts_with(marker)) {
                return Ok(page.status);
            }
        }
        cursor = page.next_cursor;

        // drain whatever was appended before the terminal status was observed
        if page.status.is_terminal() && page.lines.is_empty() {
            print_status(page.status);
            return Ok(page.status);
        }
        if !page.status.is_terminal() && page.lines.is_empty() {
            tokio::time::sleep(FOLLOW_POLL_INTERVAL).await;
        }
    }
}

pub fn print_status(status: TransactionStatus) {
    let label = status.to_string();
    let label = match status {
        TransactionStatus::Running => label.cyan(),
        TransactionStatus::Succeeded => label.green(),
        TransactionStatus::Failed => label.red(),
        TransactionStatus::RolledBack => label.yellow(),
    };
    println!("Status: {}", label.bold());
}
