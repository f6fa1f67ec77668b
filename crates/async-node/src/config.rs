//! Per-node configuration
//!
//! Hosts usually build a `NodeConfig` with `Default` and override a field or
//! two; it can also be read from a JSON document.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::defaults;
use crate::error::{NodeError, Result};

/// Configuration for an [`AsyncNode`](crate::AsyncNode)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Minimum interval (ms) after a completed run before an externally
    /// triggered re-run is accepted. Clamped to `MIN_DEBOUNCE_MS`.
    pub debounce_ms: u64,
    /// Name of the boolean input that arms a run
    pub run_input: String,
    /// Start new work when the run input flips from false to true,
    /// even if the node is idle in `Waiting`, `Error` or `Cancelled`
    pub auto_restart_on_run_edge: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            debounce_ms: defaults::DEBOUNCE_MS,
            run_input: defaults::RUN_INPUT.to_string(),
            auto_restart_on_run_edge: true,
        }
    }
}

impl NodeConfig {
    /// Set the debounce interval in milliseconds
    pub fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    /// Set the name of the run input
    pub fn with_run_input(mut self, name: impl Into<String>) -> Self {
        self.run_input = name.into();
        self
    }

    /// Effective debounce interval, never below the floor
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.max(defaults::MIN_DEBOUNCE_MS))
    }

    /// Parse a configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loaded node config from {}", path.as_ref().display());
        Self::from_json_str(&contents)
    }

    fn validate(&self) -> Result<()> {
        if self.run_input.trim().is_empty() {
            return Err(NodeError::Config("run_input must not be empty".to_string()));
        }
        Ok(())
    }
}
