use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::warn;

use crate::set::DefaultAcknowledgementSet;

/// Shortest period a progress check can be scheduled at.
const MIN_PROGRESS_CHECK_INTERVAL: Duration = Duration::from_millis(1);

pub type ProgressCheckCallback = Arc<dyn Fn(ProgressCheck) + Send + Sync>;

/// Point-in-time view of how much of an acknowledgement set is still outstanding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressCheck {
    ratio: f64,
}

impl ProgressCheck {
    pub(crate) fn new(pending: usize, total: usize) -> Self {
        let ratio = if total == 0 {
            0.0
        } else {
            pending as f64 / total as f64
        };
        Self { ratio }
    }

    /// Fraction of the events added to the set that still hold references, in `[0, 1]`.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }
}

/// Runs `callback` every `period` until the set is gone or has finished.
pub(crate) fn spawn(
    executor: &Handle,
    set: Weak<DefaultAcknowledgementSet>,
    callback: ProgressCheckCallback,
    period: Duration,
) -> JoinHandle<()> {
    let period = period.max(MIN_PROGRESS_CHECK_INTERVAL);

    executor.spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let Some(check) = set.upgrade().and_then(|set| set.progress()) else {
                break;
            };
            // Runs on the blocking pool, next to the completion callbacks.
            let callback = callback.clone();
            if let Err(error) = tokio::task::spawn_blocking(move || callback(check)).await {
                warn!(%error, "acknowledgement progress check failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_pending_over_total() {
        assert_eq!(ProgressCheck::new(2, 2).ratio(), 1.0);
        assert_eq!(ProgressCheck::new(1, 4).ratio(), 0.25);
        assert_eq!(ProgressCheck::new(0, 0).ratio(), 0.0);
    }
}
