// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Firewall commands
//!
//! Commands: show, apply, confirm, rollback

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use warden_core::domain::firewall::{FirewallRule, FirewallRuleset, FirewallStatus, FIREWALL_RESOURCE};
use warden_core::domain::operation::{FirewallChange, Operation, OperationRequest};

use super::{run_guarded, GuardedArgs};
use crate::daemon::DaemonClient;

const AWAITING_CONFIRMATION: &str = "Awaiting confirmation";

#[derive(Subcommand)]
pub enum FirewallCommand {
    /// Show the installed ruleset and any pending change
    Show,

    /// Install a ruleset provisionally; it reverts unless confirmed in time
    Apply {
        /// Ruleset file (YAML or JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        guarded: GuardedArgs,
    },

    /// Keep the pending ruleset
    Confirm,

    /// Restore the ruleset that was active before the pending change
    Rollback,
}

pub async fn handle_command(command: FirewallCommand, client: DaemonClient) -> Result<()> {
    match command {
        FirewallCommand::Show => show(&client).await,
        FirewallCommand::Apply { file, guarded } => apply(&client, &file, guarded).await,
        FirewallCommand::Confirm => {
            let id = client.confirm_firewall().await?;
            println!("{}", format!("✓ Firewall change {} confirmed", id).green());
            Ok(())
        }
        FirewallCommand::Rollback => {
            let id = client.rollback_firewall().await?;
            println!("{}", format!("✓ Firewall change {} rolled back", id).yellow());
            Ok(())
        }
    }
}

pub fn load_ruleset(path: &Path) -> Result<FirewallRuleset> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ruleset {:?}", path))?;
    // YAML is a superset of JSON
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse ruleset {:?}", path))
}

async fn apply(client: &DaemonClient, file: &Path, mut guarded: GuardedArgs) -> Result<()> {
    let ruleset = load_ruleset(file)?;
    let request = OperationRequest::new(
        FIREWALL_RESOURCE,
        Operation::ApplyFirewall(FirewallChange { ruleset }),
    );

    guarded.follow_until = Some(AWAITING_CONFIRMATION);
    if run_guarded(client, request, &guarded).await?.is_none() {
        return Ok(());
    }

    let state = client.firewall_state().await?;
    if state.status == FirewallStatus::PendingConfirm {
        println!();
        println!(
            "{}",
            "Check that you can still reach the console, then run `warden firewall confirm`.".yellow()
        );
        if let Some(rollback_at) = state.rollback_at {
            println!(
                "Without confirmation the previous ruleset is restored at {}.",
                rollback_at.to_rfc3339().bold()
            );
        }
    }

    Ok(())
}

async fn show(client: &DaemonClient) -> Result<()> {
    let state = client.firewall_state().await?;

    match state.status {
        FirewallStatus::Active => println!("Status: {}", "active".green().bold()),
        FirewallStatus::PendingConfirm => {
            println!("Status: {}", "pending confirmation".yellow().bold());
            if let Some(id) = &state.transaction_id {
                println!("  Transaction: {}", id);
            }
            if let Some(rollback_at) = state.rollback_at {
                println!("  Rolls back at: {}", rollback_at.to_rfc3339());
            }
        }
    }

    println!("Default policy: {:?}", state.default_policy);
    if state.rules.is_empty() {
        println!("{}", "No rules".dimmed());
    }
    for (i, rule) in state.rules.iter().enumerate() {
        println!("  {}. {}", i + 1, describe_rule(rule));
    }

    Ok(())
}

fn describe_rule(rule: &FirewallRule) -> String {
    let mut text = format!("{:?} {:?}", rule.action, rule.protocol).to_lowercase();
    if let Some(port) = rule.port {
        text.push_str(&format!(" port {}", port));
    }
    if let Some(source) = &rule.source {
        text.push_str(&format!(" from {}", source));
    }
    if let Some(comment) = &rule.comment {
        text.push_str(&format!(" ({})", comment));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use warden_core::domain::firewall::{DefaultPolicy, Protocol, RuleAction};

    #[test]
    fn test_load_yaml_ruleset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "default_policy: drop\nrules:\n  - action: allow\n    protocol: tcp\n    port: 443\n    comment: console"
        )
        .unwrap();

        let ruleset = load_ruleset(file.path()).unwrap();
        assert_eq!(ruleset.default_policy, DefaultPolicy::Drop);
        assert_eq!(ruleset.rules.len(), 1);
        assert_eq!(ruleset.rules[0].action, RuleAction::Allow);
        assert_eq!(ruleset.rules[0].protocol, Protocol::Tcp);
        assert_eq!(describe_rule(&ruleset.rules[0]), "allow tcp port 443 (console)");
    }

    #[test]
    fn test_load_json_ruleset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"default_policy": "accept", "rules": []}}"#).unwrap();

        let ruleset = load_ruleset(file.path()).unwrap();
        assert_eq!(ruleset, FirewallRuleset::default());
    }
}
