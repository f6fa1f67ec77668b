//! Boundary traits for the host application
//!
//! The node never talks to a concrete host. Everything it needs is one of:
//!
//! - [`DataAccess`]: the short-lived context handed to each callback
//! - [`Host`]: status text, runtime diagnostics, re-invocation requests and
//!   the UI-thread dispatcher
//!
//! `NullHost`, `RecordingHost` and `MapDataAccess` are in-memory stand-ins
//! for headless use and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NodeError, Result};

/// Severity of a runtime diagnostic shown by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Error,
    Warning,
    Remark,
}

/// A unit of work the host runs on its UI-affine thread
pub type UiJob = Box<dyn FnOnce() + Send + 'static>;

/// Services the host application provides to a node
///
/// Every method may be invoked from the callback thread. Background code
/// only ever reaches the host through [`Host::dispatch`].
pub trait Host: Send + Sync {
    /// Replace the node's status text
    fn set_message(&self, text: &str);

    /// Attach a runtime diagnostic to the node
    fn add_runtime_message(&self, level: MessageLevel, text: &str);

    /// Remove all runtime diagnostics from the node
    fn clear_runtime_messages(&self) {}

    /// Ask the host to schedule another callback pass for this node
    fn expire_solution(&self);

    /// Ask the host to recompute everything downstream of this node
    fn expire_downstream(&self);

    /// Run `job` on the host's UI-affine thread
    ///
    /// The default runs the job inline, which is correct for hosts
    /// without thread affinity.
    fn dispatch(&self, job: UiJob) {
        job()
    }
}

/// Read/write access to a node's named inputs and outputs
///
/// Only valid for the duration of one callback; implementations must not be
/// retained past it.
pub trait DataAccess {
    /// Look up an input by name
    fn input(&self, name: &str) -> Option<&Value>;

    /// Write an output by name
    fn set_output(&mut self, name: &str, value: Value);

    /// Required boolean input
    fn bool_input(&self, name: &str) -> Result<bool> {
        match self.input(name) {
            None | Some(Value::Null) => Err(NodeError::MissingInput(name.to_string())),
            Some(value) => value.as_bool().ok_or_else(|| invalid(name, "boolean")),
        }
    }

    /// Required string input
    fn str_input(&self, name: &str) -> Result<String> {
        match self.input(name) {
            None | Some(Value::Null) => Err(NodeError::MissingInput(name.to_string())),
            Some(value) => value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(name, "string")),
        }
    }

    /// Optional string input; present but mistyped is still an error
    fn optional_str(&self, name: &str) -> Result<Option<String>> {
        match self.input(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_str()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| invalid(name, "string")),
        }
    }

    /// Optional integer input; fractional numbers are rejected
    fn optional_i64(&self, name: &str) -> Result<Option<i64>> {
        match self.input(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| invalid(name, "integer")),
        }
    }

    /// Optional numeric input
    fn optional_f64(&self, name: &str) -> Result<Option<f64>> {
        match self.input(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| invalid(name, "number")),
        }
    }
}

fn invalid(port: &str, expected: &str) -> NodeError {
    NodeError::InvalidInputType {
        port: port.to_string(),
        expected: expected.to_string(),
    }
}

/// HashMap-backed data access
#[derive(Debug, Clone, Default)]
pub struct MapDataAccess {
    inputs: HashMap<String, Value>,
    outputs: HashMap<String, Value>,
}

impl MapDataAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style input setter
    pub fn with_input(mut self, name: &str, value: Value) -> Self {
        self.inputs.insert(name.to_string(), value);
        self
    }

    /// Set or replace an input
    pub fn set_input(&mut self, name: &str, value: Value) {
        self.inputs.insert(name.to_string(), value);
    }

    /// Get a written output
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    /// All written outputs
    pub fn outputs(&self) -> &HashMap<String, Value> {
        &self.outputs
    }
}

impl DataAccess for MapDataAccess {
    fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    fn set_output(&mut self, name: &str, value: Value) {
        self.outputs.insert(name.to_string(), value);
    }
}

/// A host that ignores everything
pub struct NullHost;

impl Host for NullHost {
    fn set_message(&self, _text: &str) {}
    fn add_runtime_message(&self, _level: MessageLevel, _text: &str) {}
    fn expire_solution(&self) {}
    fn expire_downstream(&self) {}
}

/// A host that records every call
///
/// Useful for testing and for headless drivers that poll the node. A
/// [`deferred`](RecordingHost::deferred) host queues dispatched jobs until
/// [`run_pending`](RecordingHost::run_pending), like a busy UI thread.
#[derive(Default)]
pub struct RecordingHost {
    messages: Mutex<Vec<String>>,
    diagnostics: Mutex<Vec<(MessageLevel, String)>>,
    expire_solution_calls: AtomicUsize,
    expire_downstream_calls: AtomicUsize,
    deferred: bool,
    pending: Mutex<Vec<UiJob>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host whose dispatched jobs wait for [`RecordingHost::run_pending`]
    pub fn deferred() -> Self {
        Self {
            deferred: true,
            ..Self::default()
        }
    }

    /// Run every queued job in dispatch order, returning how many ran
    pub fn run_pending(&self) -> usize {
        let jobs = std::mem::take(&mut *self.pending.lock());
        let count = jobs.len();
        for job in jobs {
            job();
        }
        count
    }

    /// The latest status text, if any was set
    pub fn message(&self) -> Option<String> {
        self.messages.lock().last().cloned()
    }

    /// Every status text set so far
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Diagnostics currently attached to the node
    pub fn diagnostics(&self) -> Vec<(MessageLevel, String)> {
        self.diagnostics.lock().clone()
    }

    /// Diagnostics of one severity
    pub fn diagnostics_at(&self, level: MessageLevel) -> Vec<String> {
        self.diagnostics
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn expire_solution_count(&self) -> usize {
        self.expire_solution_calls.load(Ordering::SeqCst)
    }

    pub fn expire_downstream_count(&self) -> usize {
        self.expire_downstream_calls.load(Ordering::SeqCst)
    }
}

impl Host for RecordingHost {
    fn set_message(&self, text: &str) {
        self.messages.lock().push(text.to_string());
    }

    fn add_runtime_message(&self, level: MessageLevel, text: &str) {
        self.diagnostics.lock().push((level, text.to_string()));
    }

    fn clear_runtime_messages(&self) {
        self.diagnostics.lock().clear();
    }

    fn expire_solution(&self) {
        self.expire_solution_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn expire_downstream(&self) {
        self.expire_downstream_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn dispatch(&self, job: UiJob) {
        if self.deferred {
            self.pending.lock().push(job);
        } else {
            job();
        }
    }
}
