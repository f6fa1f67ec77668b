//! Background execution of worker futures
//!
//! `TaskManager` runs one future at a time on a tokio runtime and reports
//! its end through a channel as a single [`TaskReport`]. The outcome is a
//! closed enum, so "exactly one of completed / cancelled / failed" holds by
//! construction rather than by convention.
//!
//! # Attempts
//!
//! Every call to [`TaskManager::run`] opens a new attempt with a fresh
//! cancellation token. Starting a new attempt cancels the previous token.
//! The token slot is only ever swapped under a lock, so a cancel aimed at an
//! old attempt ([`TaskManager::cancel_attempt`]) can never hit a newer one.

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Identifier of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(pub u64);

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Terminal result of an attempt
#[derive(Debug)]
pub enum TaskOutcome<T> {
    /// The future returned normally and its token was never cancelled
    Completed(T),
    /// The token was cancelled before or while the future ran
    Cancelled,
    /// The future returned an error or panicked
    Failed(String),
}

/// The single report sent for an attempt
#[derive(Debug)]
pub struct TaskReport<T> {
    pub attempt: AttemptId,
    pub outcome: TaskOutcome<T>,
}

/// Receiving side of a manager's report channel
pub type ReportReceiver<T> = mpsc::UnboundedReceiver<TaskReport<T>>;

/// Called from the background context after a report has been sent
pub type SettledHook = Arc<dyn Fn(AttemptId) + Send + Sync>;

struct ActiveTask {
    attempt: AttemptId,
    token: CancellationToken,
}

/// Runs worker futures off the callback thread
pub struct TaskManager<T> {
    runtime: Handle,
    active: Arc<Mutex<Option<ActiveTask>>>,
    next_attempt: AtomicU64,
    reports: mpsc::UnboundedSender<TaskReport<T>>,
    on_settled: Option<SettledHook>,
}

impl<T: Send + 'static> TaskManager<T> {
    /// Create a manager spawning onto `runtime`, plus the receiver its
    /// reports arrive on
    pub fn new(runtime: Handle) -> (Self, ReportReceiver<T>) {
        let (reports, receiver) = mpsc::unbounded_channel();
        let manager = Self {
            runtime,
            active: Arc::new(Mutex::new(None)),
            next_attempt: AtomicU64::new(0),
            reports,
            on_settled: None,
        };
        (manager, receiver)
    }

    /// Install a hook that runs after each report is sent
    pub fn with_settled_hook(mut self, hook: SettledHook) -> Self {
        self.on_settled = Some(hook);
        self
    }

    /// Start `work` as a new attempt and return immediately
    ///
    /// Any attempt still running is cancelled first. Exactly one report is
    /// sent for the returned attempt.
    pub fn run<F, Fut>(&self, work: F) -> AttemptId
    where
        F: FnOnce(AttemptId, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let attempt = AttemptId(self.next_attempt.fetch_add(1, Ordering::SeqCst) + 1);
        let token = CancellationToken::new();

        {
            let mut active = self.active.lock();
            let previous = active.replace(ActiveTask {
                attempt,
                token: token.clone(),
            });
            if let Some(previous) = previous {
                log::debug!(
                    "Attempt {} replaces running attempt {}",
                    attempt,
                    previous.attempt
                );
                previous.token.cancel();
            }
        }

        let work_token = token.clone();
        let handle = self.runtime.spawn(async move { work(attempt, work_token).await });

        let active = Arc::clone(&self.active);
        let reports = self.reports.clone();
        let on_settled = self.on_settled.clone();
        self.runtime.spawn(async move {
            let outcome = classify(handle.await, &token);

            {
                let mut slot = active.lock();
                if slot.as_ref().is_some_and(|task| task.attempt == attempt) {
                    *slot = None;
                }
            }

            if reports.send(TaskReport { attempt, outcome }).is_err() {
                log::debug!("Attempt {} finished after its receiver was dropped", attempt);
                return;
            }
            if let Some(hook) = on_settled {
                hook(attempt);
            }
        });

        attempt
    }

    /// Request cancellation of the current attempt, if any
    ///
    /// Idempotent; does nothing when no attempt is running.
    pub fn cancel(&self) {
        if let Some(task) = self.active.lock().as_ref() {
            log::debug!("Cancelling attempt {}", task.attempt);
            task.token.cancel();
        }
    }

    /// Cancel `attempt` only if it is still the current one
    pub fn cancel_attempt(&self, attempt: AttemptId) -> bool {
        match self.active.lock().as_ref() {
            Some(task) if task.attempt == attempt => {
                task.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Token of the running attempt
    pub fn token(&self) -> Option<CancellationToken> {
        self.active.lock().as_ref().map(|task| task.token.clone())
    }

    /// Id of the running attempt
    pub fn current_attempt(&self) -> Option<AttemptId> {
        self.active.lock().as_ref().map(|task| task.attempt)
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl<T> Drop for TaskManager<T> {
    fn drop(&mut self) {
        if let Some(task) = self.active.lock().take() {
            task.token.cancel();
        }
    }
}

fn classify<T>(
    joined: std::result::Result<Result<T>, JoinError>,
    token: &CancellationToken,
) -> TaskOutcome<T> {
    // Cancellation wins over whatever the future produced afterwards.
    if token.is_cancelled() {
        return TaskOutcome::Cancelled;
    }
    match joined {
        Ok(Ok(value)) => TaskOutcome::Completed(value),
        Ok(Err(e)) if e.is_cancelled() => TaskOutcome::Cancelled,
        Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
        Err(e) if e.is_panic() => {
            TaskOutcome::Failed(format!("Worker panicked: {}", panic_message(e.into_panic())))
        }
        // Aborted by runtime shutdown
        Err(_) => TaskOutcome::Cancelled,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
