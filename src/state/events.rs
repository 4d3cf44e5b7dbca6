//! Local event bus for state lifecycle events
//!
//! Synchronous fan-out with exception isolation: a panicking subscriber is
//! caught and logged, never propagated. Handlers run in the publisher's task
//! context and must not call back into mutating state-manager operations for
//! the same execution.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::warn;

use super::ExecutionStatus;

/// Handle returned by [`EventBus::on`], used to unsubscribe.
pub type SubscriptionId = u64;

/// Lifecycle events emitted by the state manager.
#[derive(Debug, Clone)]
pub enum StateEvent {
    StatusChanged {
        execution_id: String,
        previous: ExecutionStatus,
        new: ExecutionStatus,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: String,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: String,
        node_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: String,
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    CheckpointCreated {
        execution_id: String,
        checkpoint_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl StateEvent {
    /// Event name used for subscription routing.
    pub fn name(&self) -> &'static str {
        match self {
            StateEvent::StatusChanged { .. } => "statusChanged",
            StateEvent::NodeStarted { .. } => "nodeStarted",
            StateEvent::NodeCompleted { .. } => "nodeCompleted",
            StateEvent::NodeFailed { .. } => "nodeFailed",
            StateEvent::CheckpointCreated { .. } => "checkpointCreated",
        }
    }

    /// The execution this event belongs to.
    pub fn execution_id(&self) -> &str {
        match self {
            StateEvent::StatusChanged { execution_id, .. }
            | StateEvent::NodeStarted { execution_id, .. }
            | StateEvent::NodeCompleted { execution_id, .. }
            | StateEvent::NodeFailed { execution_id, .. }
            | StateEvent::CheckpointCreated { execution_id, .. } => execution_id,
        }
    }
}

type Handler = Arc<dyn Fn(&StateEvent) + Send + Sync>;

/// Synchronous event bus keyed by event name.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events with the given name. Returns an id for
    /// [`off`](Self::off).
    pub fn on<F>(&self, event_name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(event_name.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription. Returns false when it was not found.
    pub fn off(&self, event_name: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        if let Some(list) = handlers.get_mut(event_name) {
            let before = list.len();
            list.retain(|(hid, _)| *hid != id);
            return list.len() != before;
        }
        false
    }

    /// Publish an event to every subscriber of its name. Subscriber panics
    /// are caught and logged at warn level.
    pub fn emit(&self, event: &StateEvent) {
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.read();
            handlers
                .get(event.name())
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(
                    event = event.name(),
                    execution_id = event.execution_id(),
                    "event subscriber panicked; continuing"
                );
            }
        }
    }

    /// Number of live subscriptions, across all event names.
    pub fn subscription_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }
}
