// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Transaction commands
//!
//! Commands: status, logs, list, prune

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use warden_core::domain::transaction::TransactionId;

use super::{follow_log, print_status};
use crate::daemon::DaemonClient;

#[derive(Subcommand)]
pub enum TxCommand {
    /// Show a transaction's status
    Status {
        #[arg(value_name = "TRANSACTION_ID")]
        id: String,
    },

    /// Print a transaction's log
    Logs {
        #[arg(value_name = "TRANSACTION_ID")]
        id: String,

        /// Keep printing until the transaction finishes
        #[arg(short, long)]
        follow: bool,

        /// First line to print (0-based)
        #[arg(long, default_value = "0")]
        cursor: usize,
    },

    /// List recent transactions, newest first
    List {
        /// Only transactions on this resource
        #[arg(long)]
        resource: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Delete finished transactions older than the given age
    Prune {
        #[arg(long, value_name = "DAYS")]
        older_than_days: i64,
    },
}

pub async fn handle_command(command: TxCommand, client: DaemonClient) -> Result<()> {
    match command {
        TxCommand::Status { id } => status(&client, TransactionId::from(id.as_str())).await,
        TxCommand::Logs { id, follow, cursor } => {
            logs(&client, TransactionId::from(id.as_str()), follow, cursor).await
        }
        TxCommand::List { resource, limit } => list(&client, resource.as_deref(), limit).await,
        TxCommand::Prune { older_than_days } => {
            let removed = client.prune(older_than_days).await?;
            println!("{}", format!("✓ Removed {} transaction(s)", removed).green());
            Ok(())
        }
    }
}

async fn status(client: &DaemonClient, id: TransactionId) -> Result<()> {
    let tx = client.transaction(&id).await?;

    println!("{}", format!("Transaction {}", tx.id).bold());
    println!("  Resource:   {}", tx.resource_id);
    println!("  Operation:  {}", tx.kind);
    println!("  Risk class: {}", tx.risk_class);
    println!("  Started:    {}", tx.created_at.to_rfc3339());
    if let Some(ended_at) = tx.ended_at {
        println!("  Ended:      {}", ended_at.to_rfc3339());
    }
    println!("  Log lines:  {}", tx.log_lines);
    print_status(tx.status);

    Ok(())
}

async fn logs(client: &DaemonClient, id: TransactionId, follow: bool, cursor: usize) -> Result<()> {
    if follow {
        follow_log(client, &id, cursor, None).await?;
        return Ok(());
    }

    let mut cursor = cursor;
    loop {
        let page = client.poll_log(&id, cursor, 500).await?;
        if page.lines.is_empty() {
            return Ok(());
        }
        for line in &page.lines {
            println!("{}", line);
        }
        cursor = page.next_cursor;
    }
}

async fn list(client: &DaemonClient, resource: Option<&str>, limit: usize) -> Result<()> {
    let transactions = client.list_transactions(resource, limit).await?;

    if transactions.is_empty() {
        println!("{}", "No transactions".dimmed());
        return Ok(());
    }

    println!(
        "{:<10} {:<12} {:<18} {:<12} {}",
        "ID".bold(),
        "RESOURCE".bold(),
        "OPERATION".bold(),
        "STATUS".bold(),
        "STARTED".bold()
    );
    for tx in transactions {
        println!(
            "{:<10} {:<12} {:<18} {:<12} {}",
            tx.id.to_string(),
            tx.resource_id.to_string(),
            tx.kind.to_string(),
            tx.status.to_string(),
            tx.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}
