//! Async Node - cancellable background work behind a synchronous solve callback
//!
//! Hosts such as visual programming environments drive nodes through a
//! synchronous, re-entrant callback and have no notion of "still
//! computing". This crate builds that notion inside the node:
//!
//! - A closed [`ComponentState`] machine with a [`StateManager`] that keeps
//!   the host's status text in lockstep with the state
//! - A [`Worker`] contract: gather input, do the work, write output
//! - A [`TaskManager`] running workers on a tokio runtime and reporting
//!   exactly one terminal [`TaskOutcome`] per attempt over a channel
//! - [`AsyncNode`], the per-instance orchestrator implementing the
//!   two-phase (gather / results) callback protocol with debounce
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use async_node::{AsyncNode, MapDataAccess, NodeConfig, RecordingHost, SolvePhase};
//!
//! let host = Arc::new(RecordingHost::new());
//! let mut node = AsyncNode::new(MyComponent, host, runtime.handle().clone(), NodeConfig::default());
//!
//! let mut ctx = MapDataAccess::new().with_input("Run", serde_json::json!(true));
//! node.solve(&mut ctx, SolvePhase::Gather);   // starts the worker
//! node.solve(&mut ctx, SolvePhase::Results);  // still processing
//! ```

pub mod config;
pub mod constants;
pub mod debounce;
pub mod error;
pub mod events;
pub mod host;
pub mod messaging;
pub mod node;
pub mod state;
pub mod task_manager;
pub mod worker;

// Re-export key types
pub use config::NodeConfig;
pub use debounce::Debounce;
pub use error::{NodeError, Result};
pub use events::{AttemptResult, EventError, EventSink, NodeEvent, NullEventSink, VecEventSink};
pub use host::{DataAccess, Host, MapDataAccess, MessageLevel, NullHost, RecordingHost, UiJob};
pub use messaging::Messaging;
pub use node::{AsyncComponent, AsyncNode, SolvePhase};
pub use state::{ComponentState, StateManager};
pub use task_manager::{AttemptId, ReportReceiver, TaskManager, TaskOutcome, TaskReport};
pub use worker::{CurrentWorker, ProgressReporter, Worker};

// Re-export the token type workers observe
pub use tokio_util::sync::CancellationToken;
