use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::time::Instant;

use crate::plan::NodeId;
use crate::result::SampleResult;

pub type Variables = ahash::AHashMap<String, String>;

/// State private to one plan thread.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    thread_num: u64,
    thread_name: Arc<str>,
    thread_group: Arc<str>,
    pub vars: Variables,
    current_sampler: Option<NodeId>,
    previous_result: Option<SampleResult>,
    iteration: Arc<AtomicU64>,
    start_at: Option<Instant>,
    end_at: Option<Instant>,
    running: Arc<AtomicBool>,
    sampling_started: bool,
}

impl ThreadContext {
    pub fn new(
        thread_num: u64,
        thread_name: impl Into<Arc<str>>,
        thread_group: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            thread_num,
            thread_name: thread_name.into(),
            thread_group: thread_group.into(),
            vars: Variables::default(),
            current_sampler: None,
            previous_result: None,
            iteration: Arc::new(AtomicU64::new(0)),
            start_at: None,
            end_at: None,
            running: Arc::new(AtomicBool::new(true)),
            sampling_started: false,
        }
    }

    #[must_use]
    pub fn with_schedule(mut self, start_at: Option<Instant>, end_at: Option<Instant>) -> Self {
        self.start_at = start_at;
        self.end_at = end_at;
        self
    }

    pub fn thread_num(&self) -> u64 {
        self.thread_num
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn thread_name_arc(&self) -> Arc<str> {
        self.thread_name.clone()
    }

    pub fn thread_group(&self) -> &str {
        &self.thread_group
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn current_sampler(&self) -> Option<NodeId> {
        self.current_sampler
    }

    pub(crate) fn set_current_sampler(&mut self, id: Option<NodeId>) {
        self.current_sampler = id;
    }

    pub fn previous_result(&self) -> Option<&SampleResult> {
        self.previous_result.as_ref()
    }

    pub fn previous_result_mut(&mut self) -> Option<&mut SampleResult> {
        self.previous_result.as_mut()
    }

    pub fn set_previous_result(&mut self, result: SampleResult) {
        self.previous_result = Some(result);
    }

    /// Passes the thread has started over the root controller.
    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::Relaxed)
    }

    pub(crate) fn iteration_counter(&self) -> Arc<AtomicU64> {
        self.iteration.clone()
    }

    pub fn start_at(&self) -> Option<Instant> {
        self.start_at
    }

    pub fn end_at(&self) -> Option<Instant> {
        self.end_at
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Asks this thread to stop after the sample in flight.
    pub fn stop_thread(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn handle(&self) -> ThreadHandle {
        ThreadHandle {
            name: self.thread_name.clone(),
            running: self.running.clone(),
        }
    }

    pub fn sampling_started(&self) -> bool {
        self.sampling_started
    }

    pub(crate) fn mark_sampling_started(&mut self) {
        self.sampling_started = true;
    }

    /// Drops per-run data once the thread has drained.
    pub(crate) fn clear(&mut self) {
        self.vars.clear();
        self.current_sampler = None;
        self.previous_result = None;
    }
}

/// Remote control for one thread's cooperative `running` flag.
#[derive(Debug, Clone)]
pub struct ThreadHandle {
    name: Arc<str>,
    running: Arc<AtomicBool>,
}

impl ThreadHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn controls_same_thread(&self, other: &ThreadHandle) -> bool {
        Arc::ptr_eq(&self.running, &other.running)
    }
}
