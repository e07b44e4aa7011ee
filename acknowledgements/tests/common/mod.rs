use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use acknowledgements::config::EnvMsDuration;
use acknowledgements::{AcknowledgementSetMetrics, Config};
use parking_lot::Mutex;

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

/// Config with a fast sweep so tests observe eviction quickly.
pub fn fast_sweep_config() -> Config {
    Config {
        monitor_wait: EnvMsDuration(Duration::from_millis(10)),
        ..Config::default()
    }
}

/// Polls `check` until it holds or five seconds elapse.
pub fn wait_until<F>(check: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(check())
}
