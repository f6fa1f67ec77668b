//! Host-visible status text and runtime diagnostics
//!
//! `Messaging` is the only component that writes to the host display. The
//! state manager calls [`Messaging::update_message`] before every state
//! change takes effect, so the status text never lags behind the state.
//! Error-severity reports escalate into an `Error` transition; that part
//! lives on [`StateManager::report`](crate::StateManager::report).

use std::sync::Arc;

use crate::constants::status;
use crate::host::{Host, MessageLevel};
use crate::state::ComponentState;

impl MessageLevel {
    /// Whether a diagnostic at this level forces the node into `Error`
    pub fn escalates(self) -> bool {
        matches!(self, MessageLevel::Error)
    }
}

/// Status text for a progress update
pub fn progress_text(current: u64, total: u64) -> String {
    if total == 0 {
        status::PROCESSING.to_string()
    } else {
        format!("Processing {}/{}...", current.min(total), total)
    }
}

/// Translates state into host status text and forwards diagnostics
pub struct Messaging {
    host: Arc<dyn Host>,
    run_input: String,
    done_message: Option<String>,
}

impl Messaging {
    pub fn new(host: Arc<dyn Host>, run_input: impl Into<String>) -> Self {
        Self {
            host,
            run_input: run_input.into(),
            done_message: None,
        }
    }

    /// The host this messaging layer writes to
    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    /// Text shown instead of "Done" until the next attempt starts
    pub fn set_done_message(&mut self, message: Option<String>) {
        self.done_message = message.filter(|m| !m.trim().is_empty());
    }

    /// Set the status text (and prompt diagnostics) for `state`
    pub fn update_message(&mut self, state: ComponentState) {
        match state {
            ComponentState::Processing => {
                // A new attempt starts with a clean slate.
                self.done_message = None;
                self.host.clear_runtime_messages();
                self.host.set_message(status::PROCESSING);
            }
            ComponentState::Completed | ComponentState::Waiting => {
                let text = self.done_message.as_deref().unwrap_or(status::DONE);
                self.host.set_message(text);
            }
            ComponentState::Error => self.host.set_message(status::ERROR),
            ComponentState::Cancelled => self.host.set_message(status::CANCELLED),
            ComponentState::NeedsRun => {
                self.host.set_message(status::NEEDS_RUN);
                self.host.add_runtime_message(
                    MessageLevel::Warning,
                    &format!("Set '{}' to true to start", self.run_input),
                );
            }
            ComponentState::NeedsRerun => {
                self.host.set_message(status::NEEDS_RERUN);
                self.host.add_runtime_message(
                    MessageLevel::Warning,
                    &format!(
                        "Inputs changed. Set '{}' to true to run again",
                        self.run_input
                    ),
                );
            }
        }
    }

    /// Forward a diagnostic to the host
    pub fn report(&self, level: MessageLevel, text: &str) {
        match level {
            MessageLevel::Error => log::error!("Node error: {}", text),
            MessageLevel::Warning => log::warn!("Node warning: {}", text),
            MessageLevel::Remark => log::debug!("Node remark: {}", text),
        }
        self.host.add_runtime_message(level, text);
    }
}
