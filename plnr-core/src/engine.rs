use std::sync::{Arc, Mutex};

use plnr_shared::StopSignal;
use tokio::time::Instant;

use crate::component::IterationListener;
use crate::config::ThreadGroupConfig;
use crate::error::{Error, Result};
use crate::plan::TestPlan;
use crate::thread::{PlanThread, ThreadHandle, ThreadMonitor, ThreadSummary};

/// Launches thread groups and owns the test-wide stop signal.
#[derive(Default)]
pub struct Engine {
    stop: Arc<StopSignal>,
    handles: Mutex<Vec<ThreadHandle>>,
    observers: Vec<Arc<dyn IterationListener>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every thread launched from now on reports its root iterations to `observer`.
    #[must_use]
    pub fn with_iteration_observer(mut self, observer: Arc<dyn IterationListener>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn stop_signal(&self) -> Arc<StopSignal> {
        self.stop.clone()
    }

    /// Publishes the stop-test signal. Threads finish the sample in flight and drain.
    pub fn ask_all_threads_to_stop(&self) {
        if self.stop.request() {
            tracing::info!("stop requested for all threads");
        }
    }

    /// Stops one thread by name. Returns `false` when no such thread was launched.
    pub fn stop_thread(&self, name: &str) -> bool {
        let handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        let mut found = false;
        for handle in handles.iter().filter(|h| h.name() == name) {
            handle.stop();
            found = true;
        }
        found
    }

    /// Names of the threads of runs still in progress.
    pub fn thread_names(&self) -> Vec<String> {
        let handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        handles.iter().map(|h| h.name().to_string()).collect()
    }

    /// Runs every thread of `group` against its own clone of `plan` and waits for all of them.
    ///
    /// Summaries come back ordered by thread number. When a thread fails to set up or panics, the
    /// other threads still run to completion and the first such error is returned. Handles of
    /// this run are dropped once every thread has been joined.
    pub async fn run(
        &self,
        group: &ThreadGroupConfig,
        plan: &TestPlan,
        monitor: Option<Arc<dyn ThreadMonitor>>,
    ) -> Result<Vec<ThreadSummary>> {
        group.validate()?;
        tracing::info!(group = %group.name, threads = group.num_threads, "starting thread group");

        let configs = group.thread_configs(Instant::now());
        let mut launched = Vec::with_capacity(configs.len());
        let mut tasks = Vec::with_capacity(configs.len());
        for config in configs {
            let mut thread = PlanThread::new(config, plan.clone(), self.stop.clone());
            if let Some(monitor) = &monitor {
                thread = thread.with_monitor(monitor.clone());
            }
            for observer in &self.observers {
                thread = thread.with_iteration_observer(observer.clone());
            }

            launched.push(thread.handle());
            self.handles
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(thread.handle());

            tasks.push(tokio::spawn(async move { thread.run().await }));
        }

        let mut summaries = Vec::with_capacity(tasks.len());
        let mut first_err = None;
        for task in tasks {
            match task.await {
                Ok(Ok(summary)) => summaries.push(summary),
                Ok(Err(err)) => {
                    first_err.get_or_insert(err);
                }
                Err(join_err) => {
                    tracing::error!(group = %group.name, error = %join_err, "thread task failed");
                    first_err.get_or_insert(Error::Join(join_err));
                }
            }
        }

        self.handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|h| !launched.iter().any(|mine| mine.controls_same_thread(h)));

        if let Some(err) = first_err {
            return Err(err);
        }

        tracing::info!(group = %group.name, "thread group finished");
        Ok(summaries)
    }
}
