// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: guarded-operation entities, value objects and ports.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure rules for planning, confirming and tracking changes

pub mod events;
pub mod firewall;
pub mod mount_options;
pub mod node_config;
pub mod operation;
pub mod plan;
pub mod repository;
pub mod runtime;
pub mod transaction;
