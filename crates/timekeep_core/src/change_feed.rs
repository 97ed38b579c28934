//! Change feed for observing store mutations.
//!
//! Each data source owns a feed that emits an event after every committed
//! mutation, letting downstream consumers (UI aggregation, badge counts)
//! react without polling. Events carry ids only; subscribers re-read the
//! store for current field values.

use crate::types::EntityId;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Type of store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Entity was created.
    Created,
    /// Entity was updated (including sync-status changes).
    Updated,
    /// Entity was removed from the local store.
    Deleted,
}

/// A single change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The entity that changed.
    pub id: EntityId,
    /// What happened to it.
    pub kind: ChangeKind,
}

/// Distributes change events to subscribers.
///
/// Thread-safe, multi-subscriber, preserves mutation order. Disconnected
/// subscribers are dropped on the next emit.
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
}

impl ChangeFeed {
    /// Creates an empty feed.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to all future change events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to every live subscriber.
    pub fn emit(&self, event: ChangeEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event).is_ok());
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
