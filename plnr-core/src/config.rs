use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

/// What a thread does after a sample comes back unsuccessful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::EnumString, strum::Display)]
pub enum SampleErrorAction {
    #[default]
    #[strum(to_string = "continue")]
    Continue,

    #[strum(to_string = "stop-thread", serialize = "stopthread")]
    StopThread,

    #[strum(to_string = "stop-test", serialize = "stoptest")]
    StopTest,
}

#[derive(Debug, Clone)]
pub struct ThreadConfig {
    /// 1-based position within the group.
    pub thread_num: u64,
    pub name: Arc<str>,
    pub thread_group: Arc<str>,
    pub ramp_up_delay: Duration,
    pub start_at: Option<Instant>,
    pub end_at: Option<Instant>,
    pub on_sample_error: SampleErrorAction,
    pub initial_vars: Vec<(String, String)>,
}

impl ThreadConfig {
    pub fn new(thread_num: u64, name: impl Into<Arc<str>>, thread_group: impl Into<Arc<str>>) -> Self {
        Self {
            thread_num,
            name: name.into(),
            thread_group: thread_group.into(),
            ramp_up_delay: Duration::ZERO,
            start_at: None,
            end_at: None,
            on_sample_error: SampleErrorAction::Continue,
            initial_vars: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_schedule(self.start_at, self.end_at)
    }
}

#[derive(Debug, Clone)]
pub struct ThreadGroupConfig {
    pub name: String,
    pub num_threads: u64,
    /// Time over which thread starts are spread evenly.
    pub ramp_up: Duration,
    pub start_at: Option<Instant>,
    pub end_at: Option<Instant>,
    /// Run length measured from the scheduled start (or from launch). Takes precedence over
    /// `end_at`.
    pub duration: Option<Duration>,
    pub on_sample_error: SampleErrorAction,
    pub initial_vars: Vec<(String, String)>,
}

impl Default for ThreadGroupConfig {
    fn default() -> Self {
        Self {
            name: "Thread Group".to_string(),
            num_threads: 1,
            ramp_up: Duration::ZERO,
            start_at: None,
            end_at: None,
            duration: None,
            on_sample_error: SampleErrorAction::Continue,
            initial_vars: Vec::new(),
        }
    }
}

impl ThreadGroupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(Error::InvalidThreads);
        }
        if self.duration.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidSchedule);
        }
        validate_schedule(self.start_at, self.end_at)
    }

    /// Per-thread configs for a group launched at `now`.
    pub fn thread_configs(&self, now: Instant) -> Vec<ThreadConfig> {
        let group: Arc<str> = Arc::from(self.name.as_str());
        let end_at = match self.duration {
            Some(duration) => Some(self.start_at.unwrap_or(now) + duration),
            None => self.end_at,
        };

        (0..self.num_threads)
            .map(|i| ThreadConfig {
                thread_num: i + 1,
                name: Arc::from(format!("{} 1-{}", self.name, i + 1)),
                thread_group: group.clone(),
                ramp_up_delay: ramp_up_delay(self.ramp_up, i, self.num_threads),
                start_at: self.start_at,
                end_at,
                on_sample_error: self.on_sample_error,
                initial_vars: self.initial_vars.clone(),
            })
            .collect()
    }
}

fn validate_schedule(start_at: Option<Instant>, end_at: Option<Instant>) -> Result<()> {
    match (start_at, end_at) {
        (Some(start), Some(end)) if end <= start => Err(Error::InvalidSchedule),
        _ => Ok(()),
    }
}

/// Thread `index` of `total` starts `ramp_up * index / total` after launch.
fn ramp_up_delay(ramp_up: Duration, index: u64, total: u64) -> Duration {
    if total == 0 {
        return Duration::ZERO;
    }
    let nanos = ramp_up.as_nanos() * u128::from(index) / u128::from(total);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
