use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::metrics::AcknowledgementSetMetrics;

/// Keeps every increment in memory so tests can assert on exact counts.
#[derive(Default)]
pub struct RecordingMetrics {
    counts: Mutex<HashMap<&'static str, u64>>,
}

impl RecordingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self, name: &str) -> u64 {
        self.counts.lock().get(name).copied().unwrap_or(0)
    }
}

impl AcknowledgementSetMetrics for RecordingMetrics {
    fn increment(&self, name: &'static str) {
        *self.counts.lock().entry(name).or_insert(0) += 1;
    }
}

pub async fn assert_or_retry<F>(check: F)
where
    F: Fn() -> bool,
{
    assert_or_retry_for_duration(check, Duration::from_secs(5)).await
}

pub async fn assert_or_retry_for_duration<F>(check: F, timeout: Duration)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while !check() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(check())
}
