// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Warden Core
//!
//! Guarded operations for a storage appliance: plan a risky change, confirm it
//! with a typed phrase, apply it as a transaction with a pollable log, and
//! roll firewall changes back automatically unless they are confirmed.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, application services, adapters and HTTP API

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;
