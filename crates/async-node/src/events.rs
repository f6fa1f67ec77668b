//! Event types for observing a node's execution
//!
//! Events are emitted by the state manager and the node as the state
//! machine advances. They are informational: the host display is driven
//! through [`Host`](crate::Host), not through events.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::state::ComponentState;
use crate::task_manager::AttemptId;

/// Trait for receiving node events
///
/// This abstracts over the transport mechanism (channel, log, test buffer)
/// so the state machine does not care who listens.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: NodeEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

/// How an attempt ended, as seen by observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AttemptResult {
    Completed,
    Cancelled,
    Failed { error: String },
}

/// Events emitted during a node's lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeEvent {
    /// The component state changed
    #[serde(rename_all = "camelCase")]
    StateChanged {
        node: String,
        from: ComponentState,
        to: ComponentState,
    },

    /// A worker was handed to the task manager
    #[serde(rename_all = "camelCase")]
    AttemptStarted { node: String, attempt: AttemptId },

    /// A terminal report for the current attempt was applied
    #[serde(rename_all = "camelCase")]
    AttemptFinished {
        node: String,
        attempt: AttemptId,
        result: AttemptResult,
    },

    /// A report arrived for an attempt that is no longer current
    #[serde(rename_all = "camelCase")]
    StaleReportDiscarded { node: String, attempt: AttemptId },

    /// Progress update from a running worker
    #[serde(rename_all = "camelCase")]
    Progress {
        node: String,
        attempt: AttemptId,
        current: u64,
        total: u64,
    },
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: NodeEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: Mutex<Vec<NodeEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<NodeEvent> {
        self.events.lock().clone()
    }

    /// The `to` side of every collected state change, in order
    pub fn state_sequence(&self) -> Vec<ComponentState> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                NodeEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: NodeEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}
