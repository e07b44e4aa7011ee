use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::AcknowledgementError;
use crate::monitor::AcknowledgementSetMonitor;

/// Dedicated OS thread sweeping the monitor at a fixed delay.
///
/// The delay is measured from the end of one sweep to the start of the next, so a slow sweep
/// pushes the following one back instead of piling up. The thread runs its own
/// current-thread runtime to stay responsive regardless of the callback pool's load.
pub struct MonitorThread {
    shutdown: CancellationToken,
    thread: Option<thread::JoinHandle<()>>,
}

impl MonitorThread {
    pub fn start(
        monitor: Arc<AcknowledgementSetMonitor>,
        delay: Duration,
    ) -> Result<Self, AcknowledgementError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(AcknowledgementError::MonitorStart)?;
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let thread = thread::Builder::new()
            .name("acknowledgement-monitor".into())
            .spawn(move || runtime.block_on(sweep_loop(monitor, delay, token)))
            .map_err(AcknowledgementError::MonitorStart)?;

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    /// Stops the sweep loop and waits for the thread to exit. Safe to call more than once.
    pub fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("acknowledgement monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorThread {
    fn drop(&mut self) {
        self.stop()
    }
}

async fn sweep_loop(
    monitor: Arc<AcknowledgementSetMonitor>,
    delay: Duration,
    shutdown: CancellationToken,
) {
    info!(delay_ms = delay.as_millis() as u64, "acknowledgement monitor started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {
                monitor.run();
            }
        }
    }

    info!("acknowledgement monitor stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::runtime::Handle;

    use super::*;
    use crate::set::{AcknowledgementSet, DefaultAcknowledgementSet};
    use crate::test_utils::{assert_or_retry, RecordingMetrics};

    #[tokio::test(flavor = "multi_thread")]
    async fn sweeps_in_the_background() {
        let metrics = RecordingMetrics::new();
        let monitor = Arc::new(AcknowledgementSetMonitor::new(metrics.clone()));
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let set = DefaultAcknowledgementSet::new(
            Handle::current(),
            Box::new(move |_| flag.store(true, Ordering::SeqCst)),
            Duration::from_secs(5),
            metrics.clone(),
        );
        monitor.add(set.clone());

        let mut thread = MonitorThread::start(monitor.clone(), Duration::from_millis(10))
            .expect("failed to start monitor thread");
        assert_eq!(monitor.len(), 1);

        set.complete();
        assert_or_retry(|| monitor.is_empty()).await;
        assert!(fired.load(Ordering::SeqCst));

        thread.stop();
        thread.stop();
    }

    #[test]
    fn stop_does_not_wait_for_the_delay() {
        let monitor = Arc::new(AcknowledgementSetMonitor::new(RecordingMetrics::new()));
        let mut thread = MonitorThread::start(monitor, Duration::from_secs(3600))
            .expect("failed to start monitor thread");

        let started = std::time::Instant::now();
        thread.stop();

        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
