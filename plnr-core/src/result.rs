use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionResult {
    pub name: Arc<str>,
    pub error: bool,
    pub failure: bool,
    pub message: Option<String>,
}

impl AssertionResult {
    pub fn pass(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            error: false,
            failure: false,
            message: None,
        }
    }

    pub fn failure(name: impl Into<Arc<str>>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: false,
            failure: true,
            message: Some(message.into()),
        }
    }

    /// The assertion itself could not be evaluated.
    pub fn error(name: impl Into<Arc<str>>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: true,
            failure: false,
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        !(self.error || self.failure)
    }
}

/// Outcome of one sampler execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleResult {
    pub label: Arc<str>,
    pub thread_name: Arc<str>,
    pub success: bool,
    pub stop_thread: bool,
    pub stop_test: bool,
    /// Wall-clock time the sampler was invoked.
    pub started_at: Option<SystemTime>,
    pub elapsed: Duration,
    pub response_code: Option<String>,
    pub message: Option<String>,
    pub payload: Bytes,
    pub assertions: Vec<AssertionResult>,
}

impl SampleResult {
    pub fn success(label: impl Into<Arc<str>>) -> Self {
        Self {
            label: label.into(),
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(label: impl Into<Arc<str>>, message: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    #[must_use]
    pub fn with_response_code(mut self, code: impl Into<String>) -> Self {
        self.response_code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    #[must_use]
    pub fn with_stop_thread(mut self) -> Self {
        self.stop_thread = true;
        self
    }

    #[must_use]
    pub fn with_stop_test(mut self) -> Self {
        self.stop_test = true;
        self
    }

    /// Records an assertion outcome; any error or failure marks the sample unsuccessful.
    pub fn add_assertion(&mut self, assertion: AssertionResult) {
        self.success = self.success && assertion.is_ok();
        self.assertions.push(assertion);
    }

    pub fn failed_assertions(&self) -> impl Iterator<Item = &AssertionResult> {
        self.assertions.iter().filter(|a| !a.is_ok())
    }
}
