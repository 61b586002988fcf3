// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod executors;
pub mod firewall_backend;
pub mod repositories;

pub use event_bus::{EventBus, EventBusError};
pub use executors::{DryRunStepExecutor, ShellStepExecutor};
pub use firewall_backend::{FileFirewallBackend, InMemoryFirewallBackend};
