// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus Implementation - Pub/Sub for Transaction Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Feeds the SSE endpoint and any in-process observers. Events are not
// persisted; the transaction log is the durable record.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::TransactionEvent;
use crate::domain::transaction::TransactionId;

/// Event bus for publishing and subscribing to transaction events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<TransactionEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity.
    /// Slow receivers lose the oldest events once the buffer is full.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, event: TransactionEvent) {
        debug!(transaction_id = %event.transaction_id(), "Publishing event");

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all transaction events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of one transaction
    pub fn subscribe_transaction(&self, transaction_id: TransactionId) -> TransactionEventReceiver {
        TransactionEventReceiver {
            receiver: self.sender.subscribe(),
            transaction_id,
        }
    }

    /// Raw broadcast receiver, for adapting into a stream
    pub fn raw_receiver(&self) -> broadcast::Receiver<TransactionEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all transaction events
pub struct EventReceiver {
    receiver: broadcast::Receiver<TransactionEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<TransactionEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<TransactionEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to a single transaction
pub struct TransactionEventReceiver {
    receiver: broadcast::Receiver<TransactionEvent>,
    transaction_id: TransactionId,
}

impl TransactionEventReceiver {
    pub async fn recv(&mut self) -> Result<TransactionEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.transaction_id() == &self.transaction_id {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
