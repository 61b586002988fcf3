// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mount Option Validation Domain Service
//!
//! Validates the comma-separated mount option strings an operator may apply to
//! a pool. Only a fixed allow-list is accepted; `nodatacow` is denied outright
//! and compression is restricted to zstd with an explicit level range.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure validation of mount option tokens (no I/O)

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Options accepted verbatim (compared case-insensitively).
pub const ALLOWED_OPTIONS: &[&str] = &[
    "ssd",
    "noatime",
    "nodiratime",
    "autodefrag",
    "discard",
    "discard=async",
];

const DENIED_NODATACOW: &str = "nodatacow";
const COMPRESS_PREFIX: &str = "compress=";
const ZSTD_MIN_LEVEL: i64 = 1;
const ZSTD_MAX_LEVEL: i64 = 15;

/// Outcome of validating an option string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

/// Input validation errors surfaced verbatim to callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0}")]
    InvalidOptions(String),

    #[error("{0} is required")]
    MissingField(&'static str),
}

/// Validate a comma-separated mount option string.
///
/// Validation is fail-fast: the first offending token determines the reason.
///
/// ```
/// use warden_core::domain::mount_options::{validate, ValidationResult};
///
/// assert_eq!(validate("compress=zstd:3,ssd,discard=async,noatime"), ValidationResult::Valid);
/// assert_eq!(
///     validate("compress=lz4"),
///     ValidationResult::Invalid("compress must be zstd".to_string())
/// );
/// ```
pub fn validate(input: &str) -> ValidationResult {
    match check_tokens(input) {
        Ok(_) => ValidationResult::Valid,
        Err(reason) => ValidationResult::Invalid(reason),
    }
}

fn split_tokens(input: &str) -> Vec<&str> {
    input
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect()
}

fn check_tokens(input: &str) -> Result<Vec<&str>, String> {
    if input.trim().is_empty() {
        return Err("required".to_string());
    }

    let tokens = split_tokens(input);
    if tokens.is_empty() {
        return Err("required".to_string());
    }

    for token in &tokens {
        check_token(token)?;
    }

    Ok(tokens)
}

fn check_token(token: &str) -> Result<(), String> {
    let lowered = token.to_ascii_lowercase();

    if lowered == DENIED_NODATACOW {
        return Err("nodatacow is not allowed".to_string());
    }

    if let Some(algorithm) = lowered.strip_prefix(COMPRESS_PREFIX) {
        if !algorithm.starts_with("zstd") {
            return Err("compress must be zstd".to_string());
        }
        if let Some((_, level)) = algorithm.split_once(':') {
            let in_range = level
                .trim()
                .parse::<i64>()
                .map(|level| (ZSTD_MIN_LEVEL..=ZSTD_MAX_LEVEL).contains(&level))
                .unwrap_or(false);
            if !in_range {
                return Err("compress level must be 1..15".to_string());
            }
        }
        return Ok(());
    }

    if ALLOWED_OPTIONS.contains(&lowered.as_str()) {
        Ok(())
    } else {
        Err(format!("Unknown option: {}", token))
    }
}

/// A validated, normalised mount option string.
///
/// Tokens are trimmed and lowercased; order is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MountOptionsSpec {
    tokens: Vec<String>,
}

impl MountOptionsSpec {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let tokens = check_tokens(input).map_err(ValidationError::InvalidOptions)?;
        Ok(Self {
            tokens: tokens.iter().map(|t| t.to_ascii_lowercase()).collect(),
        })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Token set used to compare two specs regardless of ordering
    pub fn token_set(&self) -> BTreeSet<&str> {
        self.tokens.iter().map(String::as_str).collect()
    }
}

impl fmt::Display for MountOptionsSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(","))
    }
}

impl FromStr for MountOptionsSpec {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MountOptionsSpec {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MountOptionsSpec> for String {
    fn from(spec: MountOptionsSpec) -> Self {
        spec.to_string()
    }
}
