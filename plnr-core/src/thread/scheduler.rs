use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use plnr_shared::StopSignal;
use tokio::time::Instant;

use super::context::ThreadContext;
use crate::component::IterationListener;
use crate::config::{SampleErrorAction, ThreadConfig};
use crate::controller::{IterationEvent, Listener};
use crate::error::{Error, Result};
use crate::pipeline;
use crate::plan::{Node, TestPlan};
use crate::result::SampleResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ThreadState {
    Idle,
    Starting,
    Running,
    Draining,
    Finished,
}

/// Why a thread stopped sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum StopReason {
    /// The root controller ran out of samplers.
    Exhausted,
    /// A sample asked for this thread to stop.
    StopThread,
    /// A sample asked for the whole test to stop.
    StopTest,
    /// The scheduled end time passed.
    Scheduled,
    /// Stopped from outside: the stop-test signal or the thread handle.
    Stopped,
    SetupFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSummary {
    pub thread_num: u64,
    pub name: Arc<str>,
    pub samples: u64,
    pub failures: u64,
    pub iterations: u64,
    pub reason: StopReason,
    pub error: Option<String>,
}

impl ThreadSummary {
    fn new(config: &ThreadConfig) -> Self {
        Self {
            thread_num: config.thread_num,
            name: config.name.clone(),
            samples: 0,
            failures: 0,
            iterations: 0,
            reason: StopReason::Exhausted,
            error: None,
        }
    }
}

/// Told about every thread that reaches the end of its run, setup failures included.
pub trait ThreadMonitor: Send + Sync {
    fn thread_started(&self, _thread_num: u64, _name: &str) {}

    fn thread_finished(&self, summary: &ThreadSummary);
}

/// Counts root passes into the thread context and forwards them to test-level observers.
struct ThreadIterationListener {
    counter: Arc<AtomicU64>,
    observers: Vec<Arc<dyn IterationListener>>,
}

impl IterationListener for ThreadIterationListener {
    fn iteration_start(&self, event: &IterationEvent) {
        self.counter.fetch_add(1, Ordering::Relaxed);
        for observer in &self.observers {
            observer.iteration_start(event);
        }
    }
}

/// One simulated client: a private plan clone driven to completion.
pub struct PlanThread {
    config: ThreadConfig,
    plan: TestPlan,
    ctx: ThreadContext,
    stop: Arc<StopSignal>,
    state: ThreadState,
    monitor: Option<Arc<dyn ThreadMonitor>>,
    observers: Vec<Arc<dyn IterationListener>>,
}

impl PlanThread {
    pub fn new(config: ThreadConfig, plan: TestPlan, stop: Arc<StopSignal>) -> Self {
        let mut ctx = ThreadContext::new(
            config.thread_num,
            config.name.clone(),
            config.thread_group.clone(),
        )
        .with_schedule(config.start_at, config.end_at);
        for (key, value) in &config.initial_vars {
            ctx.set_var(key.clone(), value.clone());
        }

        Self {
            config,
            plan,
            ctx,
            stop,
            state: ThreadState::Idle,
            monitor: None,
            observers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<dyn ThreadMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    #[must_use]
    pub fn with_iteration_observer(mut self, observer: Arc<dyn IterationListener>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn handle(&self) -> super::ThreadHandle {
        self.ctx.handle()
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn context(&self) -> &ThreadContext {
        &self.ctx
    }

    pub async fn run(&mut self) -> Result<ThreadSummary> {
        if self.state != ThreadState::Idle {
            return Err(Error::AlreadyRun);
        }
        self.state = ThreadState::Starting;
        let mut summary = ThreadSummary::new(&self.config);

        if let Err(err) = self.check_setup() {
            tracing::error!(thread = %self.config.name, error = %err, "thread setup failed");
            summary.reason = StopReason::SetupFailed;
            summary.error = Some(err.to_string());
            self.state = ThreadState::Finished;
            self.notify_finished(&summary);
            return Err(err);
        }

        if let Some(reason) = self.wait_for_start().await {
            tracing::info!(thread = %self.config.name, %reason, "thread stopped before sampling");
            summary.reason = reason;
            return Ok(self.drain(summary));
        }

        self.start_sampling();
        self.state = ThreadState::Running;
        summary.reason = self.sample_loop(&mut summary).await;
        Ok(self.drain(summary))
    }

    fn check_setup(&self) -> Result<()> {
        self.config.validate()?;
        if self.plan.root().is_none() {
            return Err(Error::NoUsableRoot);
        }
        Ok(())
    }

    /// Ramp-up delay, then the scheduled start. `Some` when the thread must not start at all.
    async fn wait_for_start(&self) -> Option<StopReason> {
        if !self.stop.sleep(self.config.ramp_up_delay).await {
            return Some(StopReason::Stopped);
        }

        if let Some(start_at) = self.config.start_at {
            let wait = start_at.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                tracing::debug!(thread = %self.config.name, wait = ?wait, "waiting for scheduled start");
            }
            if !self.stop.sleep(wait).await {
                return Some(StopReason::Stopped);
            }
        }

        if !self.ctx.is_running() {
            return Some(StopReason::Stopped);
        }
        if self.past_end() {
            return Some(StopReason::Scheduled);
        }
        None
    }

    fn start_sampling(&mut self) {
        tracing::info!(thread = %self.config.name, "thread started");

        self.plan.initialize();
        if let Some(root) = self.plan.root() {
            let listener = ThreadIterationListener {
                counter: self.ctx.iteration_counter(),
                observers: self.observers.clone(),
            };
            if let Err(err) = self
                .plan
                .add_iteration_listener(root, Listener::Observer(Arc::new(listener)))
            {
                tracing::warn!(thread = %self.config.name, error = %err, "failed to register iteration listener");
            }
        }

        self.run_thread_hooks(true);
        self.ctx.mark_sampling_started();
        if let Some(monitor) = &self.monitor {
            monitor.thread_started(self.config.thread_num, &self.config.name);
        }
    }

    async fn sample_loop(&mut self, summary: &mut ThreadSummary) -> StopReason {
        loop {
            if self.stop.is_requested() || !self.ctx.is_running() {
                return StopReason::Stopped;
            }
            if self.past_end() {
                return StopReason::Scheduled;
            }

            let Some(sampler) = self.plan.next() else {
                if self.plan.is_done() {
                    return StopReason::Exhausted;
                }
                tokio::task::yield_now().await;
                continue;
            };

            match pipeline::execute(&mut self.plan, sampler, &mut self.ctx).await {
                Ok(outcome) => {
                    summary.samples += 1;
                    if !outcome.result.success {
                        summary.failures += 1;
                    }
                    if let Some(reason) = self.check_result(&outcome.result) {
                        return reason;
                    }
                }
                Err(err) => {
                    tracing::error!(thread = %self.config.name, error = %err, "sample pipeline failed");
                    summary.error = Some(err.to_string());
                    return StopReason::StopThread;
                }
            }

            // Samplers that never suspend must not starve the other threads.
            tokio::task::yield_now().await;
        }
    }

    /// Explicit stop requests on the result win over the on-error policy.
    fn check_result(&self, result: &SampleResult) -> Option<StopReason> {
        if result.stop_test {
            self.stop_test(result);
            return Some(StopReason::StopTest);
        }
        if result.stop_thread {
            self.stop_thread(result);
            return Some(StopReason::StopThread);
        }
        if result.success {
            return None;
        }

        match self.config.on_sample_error {
            SampleErrorAction::Continue => None,
            SampleErrorAction::StopThread => {
                self.stop_thread(result);
                Some(StopReason::StopThread)
            }
            SampleErrorAction::StopTest => {
                self.stop_test(result);
                Some(StopReason::StopTest)
            }
        }
    }

    fn stop_test(&self, result: &SampleResult) {
        if self.stop.request() {
            tracing::info!(thread = %self.config.name, sampler = %result.label, "stop test requested");
        }
    }

    fn stop_thread(&self, result: &SampleResult) {
        tracing::info!(thread = %self.config.name, sampler = %result.label, "stop thread requested");
        self.ctx.stop_thread();
    }

    fn past_end(&self) -> bool {
        self.config.end_at.is_some_and(|end| Instant::now() >= end)
    }

    fn drain(&mut self, mut summary: ThreadSummary) -> ThreadSummary {
        self.state = ThreadState::Draining;
        if self.ctx.sampling_started() {
            self.run_thread_hooks(false);
        }

        summary.iterations = self.ctx.iteration();
        tracing::info!(
            thread = %self.config.name,
            reason = %summary.reason,
            samples = summary.samples,
            iterations = summary.iterations,
            "thread finished"
        );
        self.notify_finished(&summary);

        self.ctx.clear();
        self.state = ThreadState::Finished;
        summary
    }

    fn notify_finished(&self, summary: &ThreadSummary) {
        if let Some(monitor) = &self.monitor {
            monitor.thread_finished(summary);
        }
    }

    /// `thread_started` (or `thread_finished`) on every live element, parents first.
    fn run_thread_hooks(&mut self, started: bool) {
        let preorder = self.plan.preorder().to_vec();
        for id in preorder {
            let Some(node) = self.plan.node(id) else {
                continue;
            };
            let ctx = &mut self.ctx;
            match node {
                Node::Sampler(c) if started => c.behavior.thread_started(&c.element, ctx),
                Node::Sampler(c) => c.behavior.thread_finished(&c.element, ctx),
                Node::Timer(c) if started => c.behavior.thread_started(&c.element, ctx),
                Node::Timer(c) => c.behavior.thread_finished(&c.element, ctx),
                Node::Assertion(c) if started => c.behavior.thread_started(&c.element, ctx),
                Node::Assertion(c) => c.behavior.thread_finished(&c.element, ctx),
                Node::PreProcessor(c) if started => c.behavior.thread_started(&c.element, ctx),
                Node::PreProcessor(c) => c.behavior.thread_finished(&c.element, ctx),
                Node::PostProcessor(c) if started => c.behavior.thread_started(&c.element, ctx),
                Node::PostProcessor(c) => c.behavior.thread_finished(&c.element, ctx),
                Node::Listener(c) if started => c.behavior.thread_started(&c.element, ctx),
                Node::Listener(c) => c.behavior.thread_finished(&c.element, ctx),
                Node::Controller(_) | Node::Config(_) => {}
            }
        }
    }
}
