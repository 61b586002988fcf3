// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use warden_core::domain::node_config::NodeConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./warden-config.yaml)
        #[arg(short, long, default_value = "./warden-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = NodeConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. WARDEN_CONFIG_PATH: {}",
            std::env::var("WARDEN_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./warden-config.yaml");
        println!("  4. ~/.warden/config.yaml");
        println!("  5. /etc/warden/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let spec = &config.spec;
    println!("{}", "API:".bold());
    println!("  Listen: {}:{}", spec.api.host, spec.api.port);
    println!();

    println!("{}", "Storage:".bold());
    println!("  Backend: {:?}", spec.storage.backend);
    if let Some(path) = &spec.storage.path {
        println!("  Path: {}", path.display());
    }
    println!("  Executor: {:?}", spec.executor.mode);
    println!();

    println!("{}", "Pools:".bold());
    println!("  Mount root: {}", spec.pools.mount_root);
    for (pool, options) in &spec.pools.mounted {
        println!("  {} mounted with {}", pool.bold(), options);
    }
    println!();

    println!("{}", "Firewall guard:".bold());
    println!("  Grace period: {}s", spec.firewall.grace_period_seconds);
    println!("  Check interval: {}s", spec.firewall.tick_interval_seconds);
    println!("  Admin port: {}", spec.firewall.admin_port);
    match &spec.firewall.ruleset_path {
        Some(path) => println!("  Ruleset file: {}", path.display()),
        None => println!("  Ruleset file: {}", "(in memory)".dimmed()),
    }
    println!();

    println!("{}", "Observability:".bold());
    if spec.observability.metrics_enabled {
        println!("  Metrics: {}", spec.observability.metrics_listen);
    } else {
        println!("  Metrics: {}", "disabled".dimmed());
    }

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = NodeConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    if with_examples {
        std::fs::write(&output, include_str!("../../templates/config-with-examples.yaml"))
            .with_context(|| format!("Failed to write config to {:?}", output))?;
    } else {
        NodeConfigManifest::default()
            .to_yaml_file(&output)
            .with_context(|| format!("Failed to write config to {:?}", output))?;
    }

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
