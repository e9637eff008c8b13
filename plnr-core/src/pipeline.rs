use std::time::{Duration, SystemTime};

use tokio::time::Instant;

use crate::component::SampleContext;
use crate::element::Element;
use crate::error::{Error, Result, StageError};
use crate::plan::{Node, NodeId, TestPlan};
use crate::result::SampleResult;
use crate::thread::ThreadContext;

/// Everything that runs around one sampler, in scope order (outermost first).
///
/// Built once when the plan is compiled and shared by every thread; only the elements it points at
/// are per-thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePackage {
    sampler: NodeId,
    configs: Vec<NodeId>,
    listeners: Vec<NodeId>,
    timers: Vec<NodeId>,
    assertions: Vec<NodeId>,
    pre_processors: Vec<NodeId>,
    post_processors: Vec<NodeId>,
    controllers: Vec<NodeId>,
}

impl SamplePackage {
    pub(crate) fn new(sampler: NodeId, controllers: Vec<NodeId>) -> Self {
        Self {
            sampler,
            configs: Vec::new(),
            listeners: Vec::new(),
            timers: Vec::new(),
            assertions: Vec::new(),
            pre_processors: Vec::new(),
            post_processors: Vec::new(),
            controllers,
        }
    }

    pub(crate) fn add(&mut self, id: NodeId, node: &Node) {
        let bucket = match node {
            Node::Config(_) => &mut self.configs,
            Node::Listener(_) => &mut self.listeners,
            Node::Timer(_) => &mut self.timers,
            Node::Assertion(_) => &mut self.assertions,
            Node::PreProcessor(_) => &mut self.pre_processors,
            Node::PostProcessor(_) => &mut self.post_processors,
            Node::Controller(_) | Node::Sampler(_) => return,
        };
        bucket.push(id);
    }

    pub fn sampler(&self) -> NodeId {
        self.sampler
    }

    pub fn configs(&self) -> &[NodeId] {
        &self.configs
    }

    pub fn listeners(&self) -> &[NodeId] {
        &self.listeners
    }

    pub fn timers(&self) -> &[NodeId] {
        &self.timers
    }

    pub fn assertions(&self) -> &[NodeId] {
        &self.assertions
    }

    pub fn pre_processors(&self) -> &[NodeId] {
        &self.pre_processors
    }

    pub fn post_processors(&self) -> &[NodeId] {
        &self.post_processors
    }

    /// Ancestor controllers, root first.
    pub fn controllers(&self) -> &[NodeId] {
        &self.controllers
    }

    fn members(&self) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::once(self.sampler)
            .chain(self.configs.iter().copied())
            .chain(self.listeners.iter().copied())
            .chain(self.timers.iter().copied())
            .chain(self.assertions.iter().copied())
            .chain(self.pre_processors.iter().copied())
            .chain(self.post_processors.iter().copied())
            .chain(self.controllers.iter().copied())
    }

    /// Switches every member element to live mode.
    pub fn activate(&self, plan: &mut TestPlan) {
        for id in self.members() {
            if let Some(el) = plan.element_mut(id) {
                el.activate();
            }
        }
    }

    /// Reverts every member element to its template.
    pub fn deactivate(&self, plan: &mut TestPlan) {
        for id in self.members() {
            if let Some(el) = plan.element_mut(id) {
                el.deactivate();
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    pub result: SampleResult,
    /// Total pause applied before the sampler, after clamping negative timers.
    pub timer_delay: Duration,
}

/// Stop requests raised by stages other than the sampler's own result.
#[derive(Debug, Default, Clone, Copy)]
struct Signals {
    stop_thread: bool,
    stop_test: bool,
}

impl Signals {
    fn apply(self, result: &mut SampleResult) {
        result.stop_thread |= self.stop_thread;
        result.stop_test |= self.stop_test;
    }
}

fn stage_failed(
    stage: &'static str,
    element: &Element,
    ctx: &ThreadContext,
    err: StageError,
    signals: &mut Signals,
) {
    match err {
        StageError::StopThread(reason) => {
            tracing::info!(thread = %ctx.thread_name(), stage, element = %element.name(), %reason, "stop thread requested");
            signals.stop_thread = true;
        }
        StageError::StopTest(reason) => {
            tracing::info!(thread = %ctx.thread_name(), stage, element = %element.name(), %reason, "stop test requested");
            signals.stop_test = true;
        }
        err => {
            tracing::warn!(thread = %ctx.thread_name(), stage, element = %element.name(), error = %err, "stage failed");
        }
    }
}

/// Runs one sampler with everything in its scope.
///
/// Stage errors never abort the pipeline: they are logged, and stop requests are folded into the
/// returned result.
pub async fn execute(
    plan: &mut TestPlan,
    sampler: NodeId,
    ctx: &mut ThreadContext,
) -> Result<SampleOutcome> {
    let packages = plan.packages();
    let package = packages.get(&sampler).ok_or(Error::UnknownNode(sampler))?;
    let mut signals = Signals::default();

    ctx.set_current_sampler(Some(sampler));
    package.activate(plan);

    // Nearest scope wins: the sampler's own configs are merged first.
    for id in package.configs.iter().rev() {
        let Some(Node::Config(config)) = plan.node(*id) else {
            continue;
        };
        let defaults = config.properties().snapshot();
        if let Some(el) = plan.element_mut(sampler) {
            el.properties_mut().merge_missing(&defaults);
        }
    }

    for id in &package.pre_processors {
        if let Some(Node::PreProcessor(c)) = plan.node(*id)
            && let Err(err) = c.behavior.process(&c.element, ctx)
        {
            stage_failed("pre-processor", &c.element, ctx, err, &mut signals);
        }
    }

    let delay_ms = package
        .timers
        .iter()
        .filter_map(|id| match plan.node(*id) {
            Some(Node::Timer(c)) => Some(c.behavior.delay(&c.element, ctx)),
            _ => None,
        })
        .map(|ms| u64::try_from(ms).unwrap_or(0))
        .fold(0u64, u64::saturating_add);
    let timer_delay = Duration::from_millis(delay_ms);
    if !timer_delay.is_zero() {
        tracing::debug!(thread = %ctx.thread_name(), delay_ms, "timer pause");
        tokio::time::sleep(timer_delay).await;
    }

    let Some(Node::Sampler(component)) = plan.node(sampler) else {
        package.deactivate(plan);
        return Err(Error::UnknownNode(sampler));
    };
    let element = &component.element;
    let started_at = SystemTime::now();
    let clock = Instant::now();
    let sampled = component
        .behavior
        .sample(&mut SampleContext {
            element,
            thread: &mut *ctx,
        })
        .await;
    let elapsed = clock.elapsed();

    let mut result = match sampled {
        Ok(result) => result,
        // A stop request is not a failed sample.
        Err(err @ (StageError::StopThread(_) | StageError::StopTest(_))) => {
            let mut stopped = SampleResult::success(element.name_arc());
            stopped.message = Some(err.to_string());
            stage_failed("sampler", element, ctx, err, &mut signals);
            stopped
        }
        Err(err) => {
            let failed = SampleResult::failure(element.name_arc(), err.to_string());
            stage_failed("sampler", element, ctx, err, &mut signals);
            failed
        }
    };
    signals.apply(&mut result);
    if result.label.is_empty() {
        result.label = element.name_arc();
    }
    result.thread_name = ctx.thread_name_arc();
    result.started_at = Some(started_at);
    if result.elapsed.is_zero() {
        result.elapsed = elapsed;
    }
    tracing::debug!(thread = %ctx.thread_name(), sampler = %result.label, success = result.success, "sample");

    ctx.set_previous_result(result);

    for id in package.post_processors.iter().rev() {
        if let Some(Node::PostProcessor(c)) = plan.node(*id)
            && let Err(err) = c.behavior.process(&c.element, ctx)
        {
            stage_failed("post-processor", &c.element, ctx, err, &mut signals);
        }
    }

    // Assertions and listeners also see the result through `ctx.previous_result()`.
    for id in &package.assertions {
        if let Some(Node::Assertion(c)) = plan.node(*id)
            && let Some(result) = ctx.previous_result()
        {
            let outcome = c.behavior.evaluate(&c.element, result, ctx);
            if let Some(result) = ctx.previous_result_mut() {
                result.add_assertion(outcome);
            }
        }
    }

    if let Some(result) = ctx.previous_result_mut() {
        signals.apply(result);
    }
    for id in &package.listeners {
        if let Some(Node::Listener(c)) = plan.node(*id)
            && let Some(result) = ctx.previous_result()
            && let Err(err) = c.behavior.sample_occurred(&c.element, result, ctx)
        {
            stage_failed("listener", &c.element, ctx, err, &mut signals);
        }
    }

    if let Some(published) = ctx.previous_result_mut() {
        signals.apply(published);
    }
    let result = ctx.previous_result().cloned().unwrap_or_default();
    package.deactivate(plan);

    Ok(SampleOutcome {
        result,
        timer_delay,
    })
}
