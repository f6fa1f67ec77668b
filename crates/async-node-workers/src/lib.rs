//! Async Node Workers
//!
//! Concrete components for the async-node state machine. Each component
//! creates one worker per attempt; the worker does its long-running part on
//! the background runtime and writes results back in the results phase.
//!
//! - **Ollama**: prompt completion against a local Ollama server
//! - **Batch**: apply a function to every item of a list input, with
//!   progress and per-item cancellation

pub mod batch;
pub mod ollama;

pub use batch::{BatchComponent, BatchWorker, ItemFn};
pub use ollama::{OllamaGenerateComponent, OllamaGenerateWorker};
