//! ABOUTME: Deterministic clock-free delay stub for retry/backoff assertions

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use workflow_engine::retry::Sleeper;

/// A [`Sleeper`] that records the requested delays instead of waiting
/// for them, so a retry/backoff test runs instantly while still being
/// able to assert on the exact delays the policy computed.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.delays.lock().len()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}
