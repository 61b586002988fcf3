// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Confirmation Gate
//!
//! Operators authorise a guarded operation by typing the phrase for its risk
//! class. Comparison is exact: case and surrounding whitespace matter.

use crate::domain::plan::RiskClass;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfirmationGate;

impl ConfirmationGate {
    pub fn new() -> Self {
        Self
    }

    /// The phrase shown to the operator before they confirm
    pub fn phrase(&self, risk_class: RiskClass) -> &'static str {
        risk_class.confirmation_phrase()
    }

    pub fn confirm(&self, risk_class: RiskClass, entered: &str) -> bool {
        entered == risk_class.confirmation_phrase()
    }
}
