//! The worker contract
//!
//! A worker is one attempt's unit of asynchronous work. The node drives it
//! strictly in this order:
//!
//! 1. [`Worker::gather_input`] on the callback thread, gather phase
//! 2. [`Worker::do_work`] on the background runtime
//! 3. [`Worker::set_output`] on the callback thread, results phase, only once
//!    the work has returned
//!
//! While `do_work` runs the worker is owned by the background task; it comes
//! back to the node inside the completed report. [`CurrentWorker`] tracks
//! which of the two sides holds it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::events::{EventSink, NodeEvent};
use crate::host::{DataAccess, Host};
use crate::messaging::progress_text;
use crate::task_manager::AttemptId;

/// One attempt's unit of cancellable asynchronous work
#[async_trait]
pub trait Worker: Send {
    /// Snapshot every value the work needs from `ctx`
    ///
    /// Runs synchronously; `ctx` must not be retained.
    fn gather_input(&mut self, ctx: &dyn DataAccess) -> Result<()>;

    /// Run the operation
    ///
    /// Must observe `token` and return promptly (ideally with
    /// `NodeError::Cancelled`) without committing partial output.
    async fn do_work(&mut self, token: CancellationToken, progress: ProgressReporter) -> Result<()>;

    /// Write results into `ctx`, returning an optional short status text
    fn set_output(&mut self, ctx: &mut dyn DataAccess) -> Result<Option<String>>;
}

/// The worker of the outstanding attempt
pub struct CurrentWorker {
    attempt: AttemptId,
    worker: Option<Box<dyn Worker>>,
}

impl CurrentWorker {
    /// A worker that has been handed to the task manager
    pub fn in_flight(attempt: AttemptId) -> Self {
        Self {
            attempt,
            worker: None,
        }
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// True once the work has returned and the worker is back
    pub fn is_done(&self) -> bool {
        self.worker.is_some()
    }

    /// Accept the worker back from the completed attempt
    pub fn finish(&mut self, worker: Box<dyn Worker>) {
        self.worker = Some(worker);
    }

    /// Take the finished worker for output delivery
    pub fn take_worker(&mut self) -> Option<Box<dyn Worker>> {
        self.worker.take()
    }
}

/// Progress channel handed to a running worker
///
/// Updates are shown as "Processing n/total..." through the host's UI
/// dispatcher. Once the attempt is cancelled or its outcome has been
/// applied, reports are dropped, including jobs already queued on the UI
/// thread.
#[derive(Clone)]
pub struct ProgressReporter {
    node: String,
    attempt: AttemptId,
    token: CancellationToken,
    host: Arc<dyn Host>,
    listeners: Vec<Arc<dyn EventSink>>,
    live: Arc<AtomicBool>,
}

impl ProgressReporter {
    pub fn new(
        node: impl Into<String>,
        attempt: AttemptId,
        token: CancellationToken,
        host: Arc<dyn Host>,
        listeners: Vec<Arc<dyn EventSink>>,
    ) -> Self {
        Self {
            node: node.into(),
            attempt,
            token,
            host,
            listeners,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Share the flag the node clears once this attempt is over
    pub fn with_live_flag(mut self, live: Arc<AtomicBool>) -> Self {
        self.live = live;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn is_live(&self) -> bool {
        !self.token.is_cancelled() && self.live.load(Ordering::SeqCst)
    }

    /// Report that `current` of `total` steps are done
    pub fn report(&self, current: u64, total: u64) {
        if !self.is_live() {
            return;
        }

        let text = progress_text(current, total);
        let host = Arc::clone(&self.host);
        let token = self.token.clone();
        let live = Arc::clone(&self.live);
        self.host.dispatch(Box::new(move || {
            // The attempt may have ended while this job was queued.
            if !token.is_cancelled() && live.load(Ordering::SeqCst) {
                host.set_message(&text);
            }
        }));

        let event = NodeEvent::Progress {
            node: self.node.clone(),
            attempt: self.attempt,
            current,
            total,
        };
        for listener in &self.listeners {
            if let Err(e) = listener.send(event.clone()) {
                log::warn!("Node {}: failed to deliver progress: {}", self.node, e);
            }
        }
    }
}
