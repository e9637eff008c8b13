mod builtin;
mod component;
mod config;
mod controller;
mod element;
mod engine;
mod error;
mod pipeline;
mod plan;
mod result;
mod thread;

pub use builtin::{ConstantTimer, DurationAssertion, UserParameters};
pub use component::{
    Assertion, AssertionFn, IterationFn, IterationListener, ListenerFn, PostProcessor,
    PostProcessorFn, PreProcessor, PreProcessorFn, SampleContext, SampleListener, Sampler,
    SamplerFn, Timer, TimerFn,
};
pub use config::{SampleErrorAction, ThreadConfig, ThreadGroupConfig};
pub use controller::{Controller, ControllerKind, IterationEvent, Listener, LoopCount};
pub use element::{Element, Properties, PropertyMap};
pub use engine::Engine;
pub use error::{Error, Result, StageError};
pub use pipeline::{SampleOutcome, SamplePackage, execute};
pub use plan::{Component, Node, NodeId, PlanBuilder, TestPlan};
pub use plnr_shared::{CacheError, CacheKey, CompileCache, StopSignal};
pub use plnr_value::Value;
pub use result::{AssertionResult, SampleResult};
pub use thread::{
    PlanThread, StopReason, ThreadContext, ThreadHandle, ThreadMonitor, ThreadState,
    ThreadSummary, Variables,
};
