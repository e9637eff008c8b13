use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Test-wide stop request.
///
/// Monotonic: once requested it never clears. Threads poll [`StopSignal::is_requested`] between
/// samples and may park on [`StopSignal::wait`] while sleeping.
#[derive(Debug, Default)]
pub struct StopSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the stop request. Returns `true` only for the call that flipped the flag.
    pub fn request(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            // Register before checking the flag so a concurrent `request` cannot slip between.
            let notified = self.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Sleeps for `duration` unless a stop is requested first.
    ///
    /// Returns `true` when the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.is_requested();
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_requested(),
            _ = self.wait() => false,
        }
    }
}
