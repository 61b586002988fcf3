// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Warden CLI
//!
//! The `warden` binary runs the appliance daemon and drives guarded
//! operations against it.
//!
//! ## Architecture
//!
//! - **Daemon mode**: `warden --daemon` serves the HTTP API and runs the
//!   firewall rollback timer
//! - **CLI mode**: every other command talks to a running daemon over HTTP
//!
//! ## Commands
//!
//! - `warden pool add|remove|replace` - Device changes on a pool
//! - `warden mount get|set|apply` - Pool mount options
//! - `warden firewall show|apply|confirm|rollback` - Provisional firewall changes
//! - `warden tx status|logs|list|prune` - Transaction history
//! - `warden config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use warden::commands::{self, ConfigCommand, FirewallCommand, MountCommand, PoolCommand, TxCommand};
use warden::daemon::{self, DaemonClient};

/// Warden - guarded storage and firewall changes for the appliance
#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Run the daemon in the foreground
    #[arg(long, global = true)]
    daemon: bool,

    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "WARDEN_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP API port (default: spec.api.port, 8600)
    #[arg(long, global = true, env = "WARDEN_PORT")]
    port: Option<u16>,

    /// HTTP API host (default: spec.api.host, 127.0.0.1)
    #[arg(long, global = true, env = "WARDEN_HOST")]
    host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "WARDEN_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "WARDEN_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add, remove or replace pool devices
    #[command(name = "pool")]
    Pool {
        #[command(subcommand)]
        command: PoolCommand,
    },

    /// Pool mount options
    #[command(name = "mount")]
    Mount {
        #[command(subcommand)]
        command: MountCommand,
    },

    /// Provisional firewall changes
    #[command(name = "firewall")]
    Firewall {
        #[command(subcommand)]
        command: FirewallCommand,
    },

    /// Transaction status and logs
    #[command(name = "tx")]
    Tx {
        #[command(subcommand)]
        command: TxCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_json)?;

    if cli.daemon {
        info!("Starting Warden in daemon mode");
        return daemon::start_daemon(cli.config, cli.host, cli.port).await;
    }

    let client = || DaemonClient::new(cli.host.as_deref(), cli.port);

    match cli.command {
        Some(Commands::Pool { command }) => commands::pool::handle_command(command, client()?).await,
        Some(Commands::Mount { command }) => commands::mount::handle_command(command, client()?).await,
        Some(Commands::Firewall { command }) => {
            commands::firewall::handle_command(command, client()?).await
        }
        Some(Commands::Tx { command }) => commands::tx::handle_command(command, client()?).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
