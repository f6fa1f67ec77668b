//! The per-instance orchestrator driven by the host's solve callback
//!
//! The host calls [`AsyncNode::solve`] several times per pass, once per
//! [`SolvePhase`]:
//!
//! - **Gather**: if the run condition holds and nothing is in flight, move
//!   to `Processing`, create a worker, let it read its inputs and hand it to
//!   the [`TaskManager`]. Returns immediately.
//! - **Results**: if the last attempt completed, write its output, move to
//!   `Waiting` and only then ask the host to refresh downstream nodes. A
//!   stored failure is surfaced once as a diagnostic. Any other call in an
//!   idle state, once the debounce window has passed, is an external re-run
//!   request and moves to `NeedsRerun`.
//!
//! Terminal reports from the background runtime are never applied from the
//! background thread. They wait on a channel and are drained at the start of
//! each callback, which keeps the node single-writer. A report whose attempt
//! is no longer the current one (cancelled, errored, replaced) is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::debounce::Debounce;
use crate::error::{NodeError, Result};
use crate::events::{AttemptResult, EventSink, NodeEvent};
use crate::host::{DataAccess, Host, MessageLevel};
use crate::messaging::Messaging;
use crate::state::{ComponentState, StateManager};
use crate::task_manager::{AttemptId, ReportReceiver, TaskManager, TaskOutcome, TaskReport};
use crate::worker::{CurrentWorker, ProgressReporter, Worker};

/// Which sub-call of a host pass this is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolvePhase {
    /// Read inputs and start new work
    Gather,
    /// Write completed output back
    Results,
}

impl SolvePhase {
    /// Map a host "in pre-solve" flag onto a phase
    pub fn from_pre_solve(in_pre_solve: bool) -> Self {
        if in_pre_solve {
            Self::Gather
        } else {
            Self::Results
        }
    }
}

/// The concrete node: names itself and creates a worker per attempt
pub trait AsyncComponent: Send {
    /// Name used in logs and events
    fn name(&self) -> &str;

    /// A fresh worker for a new attempt
    fn create_worker(&self) -> Box<dyn Worker>;

    /// Whether the run input is armed
    ///
    /// A missing or null run input counts as not armed.
    fn run_requested(&self, ctx: &dyn DataAccess, run_input: &str) -> Result<bool> {
        match ctx.input(run_input) {
            None | Some(Value::Null) => Ok(false),
            Some(_) => ctx.bool_input(run_input),
        }
    }
}

type WorkerReport = TaskReport<Box<dyn Worker>>;

/// Asynchronous execution state machine for one node instance
pub struct AsyncNode<C: AsyncComponent> {
    component: C,
    config: NodeConfig,
    states: StateManager,
    tasks: TaskManager<Box<dyn Worker>>,
    reports: ReportReceiver<Box<dyn Worker>>,
    current_worker: Option<CurrentWorker>,
    error_message: Option<String>,
    debounce: Debounce,
    set_data: bool,
    last_run_flag: bool,
    /// Set from the background runtime when a report triggered the expire
    self_expired: Arc<AtomicBool>,
    /// Cleared once the current attempt's progress may no longer be shown
    progress_live: Arc<AtomicBool>,
}

impl<C: AsyncComponent> AsyncNode<C> {
    /// Create a node in `NeedsRun`, spawning workers onto `runtime`
    pub fn new(component: C, host: Arc<dyn Host>, runtime: Handle, config: NodeConfig) -> Self {
        let name = component.name().to_string();
        let messaging = Messaging::new(Arc::clone(&host), config.run_input.clone());
        let states = StateManager::new(name, ComponentState::NeedsRun, messaging);

        let self_expired = Arc::new(AtomicBool::new(false));
        let hook_flag = Arc::clone(&self_expired);
        let hook_host = Arc::clone(&host);
        let (tasks, reports) = TaskManager::new(runtime);
        let tasks = tasks.with_settled_hook(Arc::new(move |_attempt| {
            hook_flag.store(true, Ordering::SeqCst);
            let target = Arc::clone(&hook_host);
            hook_host.dispatch(Box::new(move || target.expire_solution()));
        }));

        Self {
            debounce: Debounce::new(config.debounce()),
            component,
            config,
            states,
            tasks,
            reports,
            current_worker: None,
            error_message: None,
            set_data: false,
            last_run_flag: false,
            self_expired,
            progress_live: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a listener for state changes and attempt events
    pub fn subscribe(&mut self, listener: Arc<dyn EventSink>) {
        self.states.subscribe(listener);
    }

    pub fn name(&self) -> &str {
        self.component.name()
    }

    pub fn component(&self) -> &C {
        &self.component
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> ComponentState {
        self.states.current_state()
    }

    /// Attempt whose worker is outstanding or awaiting output delivery
    pub fn current_attempt(&self) -> Option<AttemptId> {
        self.current_worker.as_ref().map(CurrentWorker::attempt)
    }

    /// Failure message waiting to be surfaced on the next results phase
    pub fn pending_error(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Whether the last attempt's output has been written
    pub fn has_set_data(&self) -> bool {
        self.set_data
    }

    /// Token of the running attempt, for progress or cancellation checks
    pub fn token(&self) -> Option<CancellationToken> {
        self.tasks.token()
    }

    /// The host entry point
    ///
    /// Never blocks and never propagates errors: every failure ends up as a
    /// host diagnostic and an `Error` state.
    pub fn solve(&mut self, ctx: &mut dyn DataAccess, phase: SolvePhase) -> ComponentState {
        self.poll_outcomes();
        match phase {
            SolvePhase::Gather => self.gather_phase(ctx),
            SolvePhase::Results => self.results_phase(ctx),
        }
        self.state()
    }

    /// Cancel the running attempt and force `Cancelled`
    ///
    /// Safe to call repeatedly and with nothing running.
    pub fn cancel(&mut self) {
        self.retire_progress();
        self.tasks.cancel();
        if let Some(current) = self.current_worker.take() {
            log::debug!("Node {}: abandoning attempt {}", self.name(), current.attempt());
        }
        self.transition(ComponentState::Cancelled);
    }

    /// Report a diagnostic; errors force `Error` and abandon any attempt
    pub fn report(&mut self, level: MessageLevel, text: &str) {
        self.states.report(level, text);
        if level.escalates() {
            self.abandon_attempt();
            self.debounce.stamp(Instant::now());
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

    /// The node was (re)inserted into a document
    pub fn on_added_to_document(&mut self) {
        self.abandon_attempt();
        while self.reports.try_recv().is_ok() {}
        self.error_message = None;
        self.set_data = false;
        self.last_run_flag = false;
        self.debounce.reset();
        self.self_expired.store(false, Ordering::SeqCst);
        self.states.messaging_mut().set_done_message(None);
        self.transition(ComponentState::NeedsRun);
    }

    /// The node was removed from its document
    pub fn on_removed_from_document(&mut self) {
        self.retire_progress();
        self.tasks.cancel();
        self.current_worker = None;
    }

    /// Apply every report already delivered, without waiting
    ///
    /// Returns how many reports were consumed.
    pub fn poll_outcomes(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(report) = self.reports.try_recv() {
            self.apply_report(report);
            applied += 1;
        }
        applied
    }

    /// Wait for the next terminal report and apply it
    ///
    /// For headless drivers; a host callback must never await this.
    pub async fn wait_for_outcome(&mut self) -> ComponentState {
        if let Some(report) = self.reports.recv().await {
            self.apply_report(report);
        }
        self.state()
    }

    fn gather_phase(&mut self, ctx: &dyn DataAccess) {
        let run = match self.component.run_requested(ctx, &self.config.run_input) {
            Ok(run) => run,
            Err(e) => {
                // Reported once on entry; later passes keep the diagnostic.
                if self.state() != ComponentState::Error {
                    self.report_error(&e.to_string());
                }
                return;
            }
        };
        let rising = run && !self.last_run_flag;
        self.last_run_flag = run;
        if !run {
            return;
        }

        let start = match self.state() {
            ComponentState::Processing | ComponentState::Completed => false,
            ComponentState::NeedsRun | ComponentState::NeedsRerun => true,
            ComponentState::Waiting | ComponentState::Error | ComponentState::Cancelled => {
                rising && self.config.auto_restart_on_run_edge
            }
        };
        if start {
            self.start_attempt(ctx);
        }
    }

    fn start_attempt(&mut self, ctx: &dyn DataAccess) {
        self.set_data = false;
        self.transition(ComponentState::Processing);

        let mut worker = self.component.create_worker();
        if let Err(e) = worker.gather_input(ctx) {
            self.report_error(&format!("Failed to gather input: {}", e));
            return;
        }

        self.retire_progress();
        let live = Arc::new(AtomicBool::new(true));
        self.progress_live = Arc::clone(&live);

        let node = self.name().to_string();
        let host = Arc::clone(self.states.messaging().host());
        let listeners = self.states.listeners().to_vec();
        let attempt = self.tasks.run(move |attempt, token| async move {
            let mut worker = worker;
            let progress = ProgressReporter::new(node, attempt, token.clone(), host, listeners)
                .with_live_flag(live);
            worker.do_work(token, progress).await?;
            Ok::<_, NodeError>(worker)
        });

        log::debug!("Node {}: started attempt {}", self.name(), attempt);
        self.current_worker = Some(CurrentWorker::in_flight(attempt));
        self.states.emit(NodeEvent::AttemptStarted {
            node: self.name().to_string(),
            attempt,
        });
    }

    fn results_phase(&mut self, ctx: &mut dyn DataAccess) {
        let self_requested = self.self_expired.swap(false, Ordering::SeqCst);

        match self.state() {
            ComponentState::Completed => self.deliver_output(ctx),
            ComponentState::Error if self.error_message.is_some() => {
                if let Some(message) = self.error_message.take() {
                    self.states.report_error(&message);
                }
            }
            ComponentState::Processing => {}
            _ if self_requested => {
                // Our own expire after a discarded or already-applied report.
                log::debug!("Node {}: ignoring self-requested pass", self.name());
            }
            _ => self.external_trigger(),
        }
    }

    fn deliver_output(&mut self, ctx: &mut dyn DataAccess) {
        let worker = self
            .current_worker
            .take()
            .and_then(|mut current| current.take_worker());
        let Some(mut worker) = worker else {
            self.report_error("Completed without a finished worker");
            return;
        };

        match worker.set_output(ctx) {
            Ok(done_message) => {
                self.set_data = true;
                self.states.messaging_mut().set_done_message(done_message);
                self.transition(ComponentState::Waiting);
                self.debounce.stamp(Instant::now());
                // Only now is the output visible downstream.
                self.states.messaging().host().expire_downstream();
            }
            Err(e) => self.report_error(&format!("Failed to set output: {}", e)),
        }
    }

    fn external_trigger(&mut self) {
        if !self.state().is_idle() {
            return;
        }
        if !self.debounce.try_accept(Instant::now()) {
            log::debug!("Node {}: re-run request debounced", self.name());
            return;
        }

        if self.transition(ComponentState::NeedsRerun) && self.last_run_flag {
            // Run is still armed, so let the next gather phase start the work.
            let host = Arc::clone(self.states.messaging().host());
            let target = Arc::clone(&host);
            host.dispatch(Box::new(move || target.expire_solution()));
        }
    }

    fn apply_report(&mut self, report: WorkerReport) {
        let is_current = self.current_attempt() == Some(report.attempt)
            && self.state() == ComponentState::Processing;
        if !is_current {
            log::debug!(
                "Node {}: discarding stale report for attempt {}",
                self.name(),
                report.attempt
            );
            self.states.emit(NodeEvent::StaleReportDiscarded {
                node: self.name().to_string(),
                attempt: report.attempt,
            });
            return;
        }

        self.retire_progress();
        let result = match report.outcome {
            TaskOutcome::Completed(worker) => {
                if let Some(current) = self.current_worker.as_mut() {
                    current.finish(worker);
                }
                self.transition(ComponentState::Completed);
                AttemptResult::Completed
            }
            TaskOutcome::Cancelled => {
                self.current_worker = None;
                self.transition(ComponentState::Cancelled);
                AttemptResult::Cancelled
            }
            TaskOutcome::Failed(error) => {
                self.current_worker = None;
                self.error_message = Some(error.clone());
                self.transition(ComponentState::Error);
                AttemptResult::Failed { error }
            }
        };

        self.states.emit(NodeEvent::AttemptFinished {
            node: self.name().to_string(),
            attempt: report.attempt,
            result,
        });
    }

    fn abandon_attempt(&mut self) {
        self.retire_progress();
        if let Some(current) = self.current_worker.take() {
            self.tasks.cancel_attempt(current.attempt());
        }
    }

    fn retire_progress(&self) {
        self.progress_live.store(false, Ordering::SeqCst);
    }

    fn transition(&mut self, to: ComponentState) -> bool {
        if self.state() == ComponentState::Error && to != ComponentState::Error {
            self.error_message = None;
        }
        let changed = self.states.transition_to(to);
        if changed && matches!(to, ComponentState::Error | ComponentState::Cancelled) {
            // Terminal states open the debounce window like a completion does.
            self.debounce.stamp(Instant::now());
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecEventSink;
    use crate::host::{MapDataAccess, RecordingHost};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::state::ComponentState::*;

    #[derive(Clone)]
    enum Behavior {
        Succeed(Duration),
        Fail(&'static str),
        WaitForCancel,
        FailGather,
    }

    struct TestComponent {
        behavior: Behavior,
        created: Arc<AtomicUsize>,
        outputs: Arc<AtomicUsize>,
    }

    impl AsyncComponent for TestComponent {
        fn name(&self) -> &str {
            "test-node"
        }

        fn create_worker(&self) -> Box<dyn Worker> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::new(TestWorker {
                behavior: self.behavior.clone(),
                outputs: self.outputs.clone(),
                prompt: None,
            })
        }
    }

    struct TestWorker {
        behavior: Behavior,
        outputs: Arc<AtomicUsize>,
        prompt: Option<String>,
    }

    #[async_trait]
    impl Worker for TestWorker {
        fn gather_input(&mut self, ctx: &dyn DataAccess) -> Result<()> {
            if let Behavior::FailGather = self.behavior {
                return Err(NodeError::MissingInput("prompt".to_string()));
            }
            self.prompt = ctx.optional_str("prompt")?;
            Ok(())
        }

        async fn do_work(&mut self, token: CancellationToken, progress: ProgressReporter) -> Result<()> {
            match self.behavior.clone() {
                Behavior::Succeed(delay) => {
                    progress.report(1, 1);
                    tokio::select! {
                        _ = token.cancelled() => Err(NodeError::Cancelled),
                        _ = tokio::time::sleep(delay) => Ok(()),
                    }
                }
                Behavior::Fail(message) => Err(NodeError::failed(message)),
                Behavior::WaitForCancel => {
                    token.cancelled().await;
                    Err(NodeError::Cancelled)
                }
                Behavior::FailGather => Ok(()),
            }
        }

        fn set_output(&mut self, ctx: &mut dyn DataAccess) -> Result<Option<String>> {
            self.outputs.fetch_add(1, Ordering::SeqCst);
            let prompt = self.prompt.clone().unwrap_or_default();
            ctx.set_output("result", json!(format!("echo: {}", prompt)));
            Ok(Some("1 result".to_string()))
        }
    }

    struct Harness {
        host: Arc<RecordingHost>,
        sink: Arc<VecEventSink>,
        created: Arc<AtomicUsize>,
        outputs: Arc<AtomicUsize>,
        node: AsyncNode<TestComponent>,
    }

    fn harness_with(behavior: Behavior, config: NodeConfig, host: Arc<RecordingHost>) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let sink = Arc::new(VecEventSink::new());
        let created = Arc::new(AtomicUsize::new(0));
        let outputs = Arc::new(AtomicUsize::new(0));
        let component = TestComponent {
            behavior,
            created: created.clone(),
            outputs: outputs.clone(),
        };
        let mut node = AsyncNode::new(component, host.clone(), Handle::current(), config);
        node.subscribe(sink.clone());
        Harness {
            host,
            sink,
            created,
            outputs,
            node,
        }
    }

    fn harness(behavior: Behavior) -> Harness {
        harness_with(behavior, NodeConfig::default(), Arc::new(RecordingHost::new()))
    }

    fn run_ctx(run: bool) -> MapDataAccess {
        MapDataAccess::new()
            .with_input("Run", json!(run))
            .with_input("prompt", json!("hello"))
    }

    impl Harness {
        fn pass(&mut self, ctx: &mut MapDataAccess) -> ComponentState {
            self.node.solve(ctx, SolvePhase::Gather);
            self.node.solve(ctx, SolvePhase::Results)
        }

        async fn settle(&mut self) -> ComponentState {
            tokio::time::timeout(Duration::from_secs(5), self.node.wait_for_outcome())
                .await
                .expect("no report within timeout")
        }
    }

    #[tokio::test]
    async fn test_successful_run_sequence() {
        let mut h = harness(Behavior::Succeed(Duration::from_millis(50)));
        let mut ctx = run_ctx(true);
        assert_eq!(h.node.state(), NeedsRun);

        assert_eq!(h.pass(&mut ctx), Processing);
        assert_eq!(h.settle().await, Completed);
        assert_eq!(h.pass(&mut ctx), Waiting);

        assert_eq!(h.sink.state_sequence(), vec![Processing, Completed, Waiting]);
        assert_eq!(h.outputs.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.output("result"), Some(&json!("echo: hello")));
        assert_eq!(h.host.message().as_deref(), Some("1 result"));
        assert_eq!(h.host.expire_downstream_count(), 1);
        assert!(h.host.expire_solution_count() >= 1);
        assert!(h.node.has_set_data());
        assert!(h.node.current_attempt().is_none());
        assert!(h
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, NodeEvent::Progress { current: 1, total: 1, .. })));
    }

    #[tokio::test]
    async fn test_cancel_during_processing() {
        let mut h = harness(Behavior::WaitForCancel);
        let mut ctx = run_ctx(true);

        h.pass(&mut ctx);
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.node.cancel();
        assert_eq!(h.node.state(), Cancelled);

        // The late report for the cancelled attempt is discarded.
        assert_eq!(h.settle().await, Cancelled);
        assert_eq!(h.pass(&mut ctx), Cancelled);

        assert_eq!(h.sink.state_sequence(), vec![Processing, Cancelled]);
        assert_eq!(h.outputs.load(Ordering::SeqCst), 0);
        assert!(h.host.diagnostics_at(MessageLevel::Error).is_empty());
        assert!(h
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, NodeEvent::StaleReportDiscarded { .. })));
    }

    #[tokio::test]
    async fn test_worker_failure_surfaced_once() {
        let mut h = harness(Behavior::Fail("model overloaded"));
        let mut ctx = run_ctx(true);

        h.pass(&mut ctx);
        assert_eq!(h.settle().await, Error);
        assert!(h.host.diagnostics_at(MessageLevel::Error).is_empty());
        assert_eq!(h.node.pending_error(), Some("Execution failed: model overloaded"));

        h.pass(&mut ctx);
        let errors = h.host.diagnostics_at(MessageLevel::Error);
        assert_eq!(errors, vec!["Execution failed: model overloaded"]);
        assert_eq!(h.sink.state_sequence(), vec![Processing, Error]);
        assert!(h.node.pending_error().is_none());

        h.pass(&mut ctx);
        assert_eq!(h.host.diagnostics_at(MessageLevel::Error).len(), 1);
        assert_eq!(h.outputs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_single_flight_while_processing() {
        let mut h = harness(Behavior::WaitForCancel);

        h.pass(&mut run_ctx(true));
        h.pass(&mut run_ctx(true));
        h.pass(&mut run_ctx(false));
        h.pass(&mut run_ctx(true));

        assert_eq!(h.node.state(), Processing);
        assert_eq!(h.created.load(Ordering::SeqCst), 1);
        h.node.cancel();
    }

    #[tokio::test]
    async fn test_gather_failure_starts_nothing() {
        let mut h = harness(Behavior::FailGather);

        assert_eq!(h.pass(&mut run_ctx(true)), Error);
        assert!(h.node.current_attempt().is_none());
        assert!(h.node.token().is_none());
        assert_eq!(h.sink.state_sequence(), vec![Processing, Error]);

        let errors = h.host.diagnostics_at(MessageLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("prompt"));
    }

    #[tokio::test]
    async fn test_mistyped_run_input_reports_error() {
        let mut h = harness(Behavior::Succeed(Duration::from_millis(1)));
        let mut ctx = MapDataAccess::new().with_input("Run", json!("yes"));

        h.node.solve(&mut ctx, SolvePhase::Gather);
        h.node.solve(&mut ctx, SolvePhase::Gather);

        assert_eq!(h.node.state(), Error);
        assert_eq!(h.created.load(Ordering::SeqCst), 0);
        let errors = h.host.diagnostics_at(MessageLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Run"));
    }

    #[tokio::test]
    async fn test_queued_progress_cannot_overwrite_final_status() {
        let host = Arc::new(RecordingHost::deferred());
        let mut h = harness_with(
            Behavior::Succeed(Duration::from_millis(5)),
            NodeConfig::default(),
            host.clone(),
        );
        let mut ctx = run_ctx(true);

        h.pass(&mut ctx);
        assert_eq!(h.settle().await, Completed);
        assert_eq!(h.pass(&mut ctx), Waiting);
        assert_eq!(host.message().as_deref(), Some("1 result"));

        // The UI thread catches up only now.
        host.run_pending();

        assert_eq!(host.message().as_deref(), Some("1 result"));
        assert!(!host.messages().iter().any(|m| m.starts_with("Processing 1/1")));
        assert_eq!(host.expire_solution_count(), 1);
    }

    #[tokio::test]
    async fn test_error_report_overrides_processing() {
        let mut h = harness(Behavior::Succeed(Duration::from_millis(50)));
        let mut ctx = run_ctx(true);

        h.pass(&mut ctx);
        h.node.report_error("validation failed");
        assert_eq!(h.node.state(), Error);

        // Whatever the abandoned attempt produced, it cannot resurrect it.
        assert_eq!(h.settle().await, Error);
        assert_eq!(h.pass(&mut ctx), Error);

        assert_eq!(h.sink.state_sequence(), vec![Processing, Error]);
        assert_eq!(h.outputs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let mut h = harness(Behavior::WaitForCancel);

        h.node.cancel();
        h.node.cancel();

        assert_eq!(h.node.state(), Cancelled);
        assert_eq!(h.sink.state_sequence(), vec![Cancelled]);
        assert_eq!(h.host.message().as_deref(), Some("Cancelled"));
    }

    #[tokio::test]
    async fn test_external_trigger_debounced_after_completion() {
        let config = NodeConfig::default().with_debounce_ms(100);
        let mut h = harness_with(
            Behavior::Succeed(Duration::from_millis(1)),
            config,
            Arc::new(RecordingHost::new()),
        );

        h.pass(&mut run_ctx(true));
        h.settle().await;
        assert_eq!(h.pass(&mut run_ctx(true)), Waiting);

        // Inside the window: deferred, not reported.
        assert_eq!(h.pass(&mut run_ctx(false)), Waiting);
        assert!(h.host.diagnostics_at(MessageLevel::Error).is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.pass(&mut run_ctx(false)), NeedsRerun);
        assert_eq!(h.host.message().as_deref(), Some("Run me again!"));

        assert_eq!(h.pass(&mut run_ctx(true)), Processing);
        assert_eq!(
            h.sink.state_sequence(),
            vec![Processing, Completed, Waiting, NeedsRerun, Processing]
        );
        assert_eq!(h.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_armed_rerun_request_reinvokes_host() {
        let config = NodeConfig::default().with_debounce_ms(100);
        let mut h = harness_with(
            Behavior::Succeed(Duration::from_millis(1)),
            config,
            Arc::new(RecordingHost::new()),
        );
        let mut ctx = run_ctx(true);

        h.pass(&mut ctx);
        h.settle().await;
        assert_eq!(h.pass(&mut ctx), Waiting);
        let expires = h.host.expire_solution_count();

        // Run stays held; a host refresh after the window is a re-run request.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.node.solve(&mut ctx, SolvePhase::Gather), Waiting);
        assert_eq!(h.node.solve(&mut ctx, SolvePhase::Results), NeedsRerun);
        assert_eq!(h.host.expire_solution_count(), expires + 1);

        assert_eq!(h.node.solve(&mut ctx, SolvePhase::Gather), Processing);
        assert_eq!(h.created.load(Ordering::SeqCst), 2);
        assert_eq!(
            h.sink.state_sequence(),
            vec![Processing, Completed, Waiting, NeedsRerun, Processing]
        );
        h.node.cancel();
    }

    #[tokio::test]
    async fn test_self_requested_pass_is_not_a_rerun_request() {
        let config = NodeConfig::default().with_debounce_ms(100);
        let mut h = harness_with(Behavior::WaitForCancel, config, Arc::new(RecordingHost::new()));
        let mut ctx = run_ctx(true);

        h.pass(&mut ctx);
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.node.cancel();

        // Past the window; the cancelled attempt's report has been sent.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.pass(&mut ctx), Cancelled);
        assert!(!h.sink.state_sequence().contains(&NeedsRerun));

        // The next refresh comes from the host and is accepted.
        assert_eq!(h.pass(&mut ctx), NeedsRerun);
        assert_eq!(h.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_edge_restarts_idle_node() {
        let mut h = harness(Behavior::Succeed(Duration::from_millis(1)));

        h.pass(&mut run_ctx(true));
        h.settle().await;
        h.pass(&mut run_ctx(true));

        // Run held high: no new attempt.
        assert_eq!(h.pass(&mut run_ctx(true)), Waiting);
        assert_eq!(h.created.load(Ordering::SeqCst), 1);

        // Run released and pressed again inside the debounce window.
        assert_eq!(h.pass(&mut run_ctx(false)), Waiting);
        assert_eq!(h.pass(&mut run_ctx(true)), Processing);
        assert_eq!(h.created.load(Ordering::SeqCst), 2);
        h.node.cancel();
    }

    #[tokio::test]
    async fn test_added_to_document_resets() {
        let mut h = harness(Behavior::Fail("boom"));

        h.pass(&mut run_ctx(true));
        h.settle().await;
        assert!(h.node.pending_error().is_some());

        h.node.on_added_to_document();

        assert_eq!(h.node.state(), NeedsRun);
        assert!(h.node.pending_error().is_none());
        assert!(h.node.current_attempt().is_none());
    }

    #[tokio::test]
    async fn test_removed_from_document_cancels() {
        let mut h = harness(Behavior::WaitForCancel);

        h.pass(&mut run_ctx(true));
        let token = h.node.token().expect("attempt running");

        h.node.on_removed_from_document();
        assert!(token.is_cancelled());
        assert!(h.node.current_attempt().is_none());
    }

    /// Journal shared by a host and a data context to check call order.
    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<&'static str>>>);

    struct JournalHost(Journal);

    impl Host for JournalHost {
        fn set_message(&self, _text: &str) {}
        fn add_runtime_message(&self, _level: MessageLevel, _text: &str) {}
        fn expire_solution(&self) {}
        fn expire_downstream(&self) {
            (self.0).0.lock().push("expire_downstream");
        }
    }

    struct JournalContext {
        inner: MapDataAccess,
        journal: Journal,
    }

    impl DataAccess for JournalContext {
        fn input(&self, name: &str) -> Option<&Value> {
            self.inner.input(name)
        }

        fn set_output(&mut self, name: &str, value: Value) {
            self.journal.0.lock().push("set_output");
            self.inner.set_output(name, value);
        }
    }

    #[tokio::test]
    async fn test_downstream_expired_only_after_output() {
        let journal = Journal::default();
        let component = TestComponent {
            behavior: Behavior::Succeed(Duration::from_millis(5)),
            created: Arc::new(AtomicUsize::new(0)),
            outputs: Arc::new(AtomicUsize::new(0)),
        };
        let mut node = AsyncNode::new(
            component,
            Arc::new(JournalHost(journal.clone())),
            Handle::current(),
            NodeConfig::default(),
        );
        let mut ctx = JournalContext {
            inner: run_ctx(true),
            journal: journal.clone(),
        };

        node.solve(&mut ctx, SolvePhase::Gather);
        node.solve(&mut ctx, SolvePhase::Results);
        node.wait_for_outcome().await;
        assert!(journal.0.lock().is_empty());

        node.solve(&mut ctx, SolvePhase::Gather);
        assert!(journal.0.lock().is_empty());
        node.solve(&mut ctx, SolvePhase::Results);

        assert_eq!(*journal.0.lock(), vec!["set_output", "expire_downstream"]);
    }

    #[test]
    fn test_phase_from_pre_solve() {
        assert_eq!(SolvePhase::from_pre_solve(true), SolvePhase::Gather);
        assert_eq!(SolvePhase::from_pre_solve(false), SolvePhase::Results);
    }
}
