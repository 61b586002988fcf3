// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-resource reservations.
//!
//! At most one running transaction may hold a resource. Check and insert
//! happen under a single lock so two concurrent applies cannot both win.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::operation::ResourceId;
use crate::domain::transaction::TransactionId;

#[derive(Debug, Clone, Default)]
pub struct ReservationTable {
    held: Arc<Mutex<HashMap<ResourceId, TransactionId>>>,
}

impl ReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `resource` for the id produced by `allocate`.
    ///
    /// `allocate` only runs when the resource is free. On conflict the holder
    /// is returned.
    pub fn try_reserve<F>(&self, resource: &ResourceId, allocate: F) -> Result<TransactionId, TransactionId>
    where
        F: FnOnce() -> TransactionId,
    {
        let mut held = self.held.lock();
        if let Some(holder) = held.get(resource) {
            return Err(holder.clone());
        }
        let id = allocate();
        held.insert(resource.clone(), id.clone());
        Ok(id)
    }

    /// Reserve on behalf of an existing transaction (used when resuming)
    pub fn restore(&self, resource: &ResourceId, id: &TransactionId) {
        self.held.lock().insert(resource.clone(), id.clone());
    }

    /// Release `resource` if `id` still holds it
    pub fn release(&self, resource: &ResourceId, id: &TransactionId) -> bool {
        let mut held = self.held.lock();
        match held.get(resource) {
            Some(holder) if holder == id => {
                held.remove(resource);
                true
            }
            _ => false,
        }
    }

    pub fn holder(&self, resource: &ResourceId) -> Option<TransactionId> {
        self.held.lock().get(resource).cloned()
    }
}
