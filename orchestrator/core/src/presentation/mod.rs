// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`warden-core`)
//!
//! HTTP surface that translates external requests into application service
//! calls. Business rules live in `crate::application`.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP/SSE (Axum) | Plans, transactions, mount options, firewall confirmation |

pub mod api;
