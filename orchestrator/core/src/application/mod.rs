// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod confirmation;
pub mod coordinator;
pub mod firewall_guard;
pub mod journal;
pub mod mount_options;
pub mod planner;
pub mod repository_factory;
pub mod reservations;
pub mod rollback_timer;
pub mod services;

pub use confirmation::ConfirmationGate;
pub use coordinator::{ApplyError, CoordinatorError, TransactionCoordinator};
pub use firewall_guard::{FirewallError, FirewallGuard};
pub use mount_options::{MountOptionsError, MountOptionsService, MountOptionsUpdate};
pub use planner::{PlanEngine, PlannerConfig};
pub use rollback_timer::RollbackTimer;
pub use services::{Overrides, Services};
