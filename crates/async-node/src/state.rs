//! Component lifecycle state and the state manager
//!
//! The state values coordinate the host display and callback re-entrancy.
//! They do not forbid application-level sequences: the only rule enforced
//! here is that a self-transition is a no-op.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::{EventSink, NodeEvent};
use crate::host::MessageLevel;
use crate::messaging::Messaging;

/// Lifecycle phase of a node instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentState {
    /// Never run; waiting for the run input
    NeedsRun,
    /// A worker is in flight
    Processing,
    /// The worker finished; output not yet collected
    Completed,
    /// Output delivered; idle
    Waiting,
    /// The last attempt or an external report failed
    Error,
    /// The last attempt was cancelled
    Cancelled,
    /// Inputs changed after a run; waiting for the run input
    NeedsRerun,
}

impl ComponentState {
    /// States in which an external trigger may request a re-run
    pub fn is_idle(self) -> bool {
        matches!(
            self,
            Self::Waiting | Self::NeedsRerun | Self::NeedsRun | Self::Error | Self::Cancelled
        )
    }
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NeedsRun => "NeedsRun",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Waiting => "Waiting",
            Self::Error => "Error",
            Self::Cancelled => "Cancelled",
            Self::NeedsRerun => "NeedsRerun",
        };
        f.write_str(name)
    }
}

/// Owns the current state and performs transitions
pub struct StateManager {
    node: String,
    state: ComponentState,
    messaging: Messaging,
    listeners: Vec<Arc<dyn EventSink>>,
}

impl StateManager {
    /// Create a manager in `initial`, publishing its status text
    pub fn new(node: impl Into<String>, initial: ComponentState, mut messaging: Messaging) -> Self {
        messaging.update_message(initial);
        Self {
            node: node.into(),
            state: initial,
            messaging,
            listeners: Vec::new(),
        }
    }

    /// Register a listener for state changes
    pub fn subscribe(&mut self, listener: Arc<dyn EventSink>) {
        self.listeners.push(listener);
    }

    /// Listeners registered so far
    pub fn listeners(&self) -> &[Arc<dyn EventSink>] {
        &self.listeners
    }

    pub fn current_state(&self) -> ComponentState {
        self.state
    }

    pub fn messaging(&self) -> &Messaging {
        &self.messaging
    }

    pub fn messaging_mut(&mut self) -> &mut Messaging {
        &mut self.messaging
    }

    /// Move to `new_state`
    ///
    /// Returns `false` (and does nothing) when already in `new_state`.
    pub fn transition_to(&mut self, new_state: ComponentState) -> bool {
        if new_state == self.state {
            return false;
        }

        self.messaging.update_message(new_state);
        let from = std::mem::replace(&mut self.state, new_state);
        log::debug!("Node {}: {} -> {}", self.node, from, new_state);

        self.emit(NodeEvent::StateChanged {
            node: self.node.clone(),
            from,
            to: new_state,
        });
        true
    }

    /// Force the `Error` state, whatever the current phase
    pub fn handle_runtime_error(&mut self) {
        self.transition_to(ComponentState::Error);
    }

    /// Report a diagnostic; error severity forces the `Error` state
    pub fn report(&mut self, level: MessageLevel, text: &str) {
        self.messaging.report(level, text);
        if level.escalates() {
            self.handle_runtime_error();
        }
    }

    pub fn report_error(&mut self, text: &str) {
        self.report(MessageLevel::Error, text);
    }

    pub fn report_warning(&mut self, text: &str) {
        self.report(MessageLevel::Warning, text);
    }

    pub fn report_remark(&mut self, text: &str) {
        self.report(MessageLevel::Remark, text);
    }

    /// Deliver an event to every listener
    pub fn emit(&self, event: NodeEvent) {
        for listener in &self.listeners {
            if let Err(e) = listener.send(event.clone()) {
                log::warn!("Node {}: failed to deliver event: {}", self.node, e);
            }
        }
    }
}
