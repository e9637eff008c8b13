//! Behaviour contracts for plan elements.
//!
//! Plan nodes carry per-thread [`Element`] data and a shared, immutable behaviour implementing one
//! of the traits below. Behaviours are `Send + Sync` because every thread's plan clone points at the
//! same instance; any mutable state belongs in the element properties or the [`ThreadContext`].

use async_trait::async_trait;

use crate::controller::IterationEvent;
use crate::element::Element;
use crate::error::StageError;
use crate::result::{AssertionResult, SampleResult};
use crate::thread::ThreadContext;

/// What a sampler sees while it runs: its own live element and the thread state.
pub struct SampleContext<'a> {
    pub element: &'a Element,
    pub thread: &'a mut ThreadContext,
}

#[async_trait]
pub trait Sampler: Send + Sync {
    async fn sample(&self, ctx: &mut SampleContext<'_>) -> Result<SampleResult, StageError>;

    fn thread_started(&self, _element: &Element, _ctx: &mut ThreadContext) {}

    fn thread_finished(&self, _element: &Element, _ctx: &mut ThreadContext) {}
}

/// Delay, in milliseconds, to apply before the sampler runs. Negative values count as zero.
pub trait Timer: Send + Sync {
    fn delay(&self, element: &Element, ctx: &ThreadContext) -> i64;

    fn thread_started(&self, _element: &Element, _ctx: &mut ThreadContext) {}

    fn thread_finished(&self, _element: &Element, _ctx: &mut ThreadContext) {}
}

pub trait Assertion: Send + Sync {
    fn evaluate(
        &self,
        element: &Element,
        result: &SampleResult,
        ctx: &ThreadContext,
    ) -> AssertionResult;

    fn thread_started(&self, _element: &Element, _ctx: &mut ThreadContext) {}

    fn thread_finished(&self, _element: &Element, _ctx: &mut ThreadContext) {}
}

pub trait PreProcessor: Send + Sync {
    fn process(&self, element: &Element, ctx: &mut ThreadContext) -> Result<(), StageError>;

    fn thread_started(&self, _element: &Element, _ctx: &mut ThreadContext) {}

    fn thread_finished(&self, _element: &Element, _ctx: &mut ThreadContext) {}
}

/// Runs after the sampler. The fresh result is reachable through
/// [`ThreadContext::previous_result_mut`].
pub trait PostProcessor: Send + Sync {
    fn process(&self, element: &Element, ctx: &mut ThreadContext) -> Result<(), StageError>;

    fn thread_started(&self, _element: &Element, _ctx: &mut ThreadContext) {}

    fn thread_finished(&self, _element: &Element, _ctx: &mut ThreadContext) {}
}

pub trait SampleListener: Send + Sync {
    fn sample_occurred(
        &self,
        element: &Element,
        result: &SampleResult,
        ctx: &ThreadContext,
    ) -> Result<(), StageError>;

    fn thread_started(&self, _element: &Element, _ctx: &mut ThreadContext) {}

    fn thread_finished(&self, _element: &Element, _ctx: &mut ThreadContext) {}
}

/// Observer of "a new pass over the children started" events.
pub trait IterationListener: Send + Sync {
    fn iteration_start(&self, event: &IterationEvent);
}

/// Synchronous closure sampler.
pub struct SamplerFn<F>(F);

impl<F> SamplerFn<F>
where
    F: Fn(&mut SampleContext<'_>) -> Result<SampleResult, StageError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Sampler for SamplerFn<F>
where
    F: Fn(&mut SampleContext<'_>) -> Result<SampleResult, StageError> + Send + Sync,
{
    async fn sample(&self, ctx: &mut SampleContext<'_>) -> Result<SampleResult, StageError> {
        (self.0)(ctx)
    }
}

pub struct TimerFn<F>(F);

impl<F> TimerFn<F>
where
    F: Fn(&Element, &ThreadContext) -> i64 + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Timer for TimerFn<F>
where
    F: Fn(&Element, &ThreadContext) -> i64 + Send + Sync,
{
    fn delay(&self, element: &Element, ctx: &ThreadContext) -> i64 {
        (self.0)(element, ctx)
    }
}

pub struct AssertionFn<F>(F);

impl<F> AssertionFn<F>
where
    F: Fn(&Element, &SampleResult, &ThreadContext) -> AssertionResult + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Assertion for AssertionFn<F>
where
    F: Fn(&Element, &SampleResult, &ThreadContext) -> AssertionResult + Send + Sync,
{
    fn evaluate(
        &self,
        element: &Element,
        result: &SampleResult,
        ctx: &ThreadContext,
    ) -> AssertionResult {
        (self.0)(element, result, ctx)
    }
}

pub struct PreProcessorFn<F>(F);

impl<F> PreProcessorFn<F>
where
    F: Fn(&Element, &mut ThreadContext) -> Result<(), StageError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> PreProcessor for PreProcessorFn<F>
where
    F: Fn(&Element, &mut ThreadContext) -> Result<(), StageError> + Send + Sync,
{
    fn process(&self, element: &Element, ctx: &mut ThreadContext) -> Result<(), StageError> {
        (self.0)(element, ctx)
    }
}

pub struct PostProcessorFn<F>(F);

impl<F> PostProcessorFn<F>
where
    F: Fn(&Element, &mut ThreadContext) -> Result<(), StageError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> PostProcessor for PostProcessorFn<F>
where
    F: Fn(&Element, &mut ThreadContext) -> Result<(), StageError> + Send + Sync,
{
    fn process(&self, element: &Element, ctx: &mut ThreadContext) -> Result<(), StageError> {
        (self.0)(element, ctx)
    }
}

pub struct ListenerFn<F>(F);

impl<F> ListenerFn<F>
where
    F: Fn(&Element, &SampleResult, &ThreadContext) -> Result<(), StageError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> SampleListener for ListenerFn<F>
where
    F: Fn(&Element, &SampleResult, &ThreadContext) -> Result<(), StageError> + Send + Sync,
{
    fn sample_occurred(
        &self,
        element: &Element,
        result: &SampleResult,
        ctx: &ThreadContext,
    ) -> Result<(), StageError> {
        (self.0)(element, result, ctx)
    }
}

pub struct IterationFn<F>(F);

impl<F> IterationFn<F>
where
    F: Fn(&IterationEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> IterationListener for IterationFn<F>
where
    F: Fn(&IterationEvent) + Send + Sync,
{
    fn iteration_start(&self, event: &IterationEvent) {
        (self.0)(event);
    }
}
