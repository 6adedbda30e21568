//! EventBus - broadcast-based progress events for fan-outs.
//!
//! The coordinator publishes one event per lifecycle step so a UI or log
//! sink can follow a fan-out while it runs. Publishing never blocks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted while a fan-out runs.
///
/// Result payloads are not included; subscribers that need them read the
/// final report.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FanoutEvent {
    /// Units were selected and scheduling begins
    FanoutStarted {
        /// Fan-out identifier
        execution_id: Uuid,
        /// Number of execution units
        unit_count: usize,
        /// When scheduling began
        started_at: DateTime<Utc>,
    },
    /// A child session was started for a unit
    UnitStarted {
        /// Fan-out identifier
        execution_id: Uuid,
        /// Selection index of the unit
        index: usize,
        /// Unit name
        unit: String,
        /// Child session id
        session_id: String,
    },
    /// The reminder message was sent to a child
    ReminderSent {
        /// Fan-out identifier
        execution_id: Uuid,
        /// Selection index of the unit
        index: usize,
    },
    /// A unit reached its terminal result
    UnitCompleted {
        /// Fan-out identifier
        execution_id: Uuid,
        /// Selection index of the unit
        index: usize,
        /// Unit name
        unit: String,
        /// Whether the child reported success
        success: bool,
        /// Time from slot acquisition to result, in milliseconds
        duration_ms: u64,
    },
    /// The fan-out finished (all units, or a WaitForAny winner)
    FanoutCompleted {
        /// Fan-out identifier
        execution_id: Uuid,
        /// Overall success
        success: bool,
        /// Wall-clock duration in milliseconds
        duration_ms: u64,
    },
    /// The fan-out was cancelled
    FanoutCancelled {
        /// Fan-out identifier
        execution_id: Uuid,
    },
}

impl FanoutEvent {
    /// Get the execution_id from any event variant.
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::FanoutStarted { execution_id, .. }
            | Self::UnitStarted { execution_id, .. }
            | Self::ReminderSent { execution_id, .. }
            | Self::UnitCompleted { execution_id, .. }
            | Self::FanoutCompleted { execution_id, .. }
            | Self::FanoutCancelled { execution_id } => *execution_id,
        }
    }
}

/// Broadcast-based event bus for fan-out progress.
///
/// Slow subscribers receive `RecvError::Lagged` instead of blocking the
/// publisher.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FanoutEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FanoutEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; returns the number of subscribers reached.
    pub fn publish(&self, event: FanoutEvent) -> usize {
        // send() returns Err if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the current number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
