use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::AcknowledgementError;
use crate::event::Event;
use crate::metrics::{AcknowledgementSetMetrics, RecorderMetrics};
use crate::metrics_consts::{CREATED_METRIC_NAME, NULL_EVENT_HANDLES_METRIC_NAME};
use crate::monitor::AcknowledgementSetMonitor;
use crate::scheduler::MonitorThread;
use crate::set::{AcknowledgementSet, CompletionCallback, DefaultAcknowledgementSet};

/// Entry point for sources and processors: the only way to obtain an acknowledgement set.
pub trait AcknowledgementSetManager: Send + Sync {
    /// Creates a set that runs `callback` once every event added to it has been released,
    /// unless it expires after `timeout` first.
    fn create(
        &self,
        callback: CompletionCallback,
        timeout: Duration,
    ) -> Result<Arc<dyn AcknowledgementSet>, AcknowledgementError>;

    /// Takes an extra reference on the event for a new downstream branch.
    fn acquire_event_reference(&self, event: &dyn Event) -> Result<(), AcknowledgementError>;

    /// Drops one reference on the event. The boolean tells whether this release scheduled
    /// the set's callback.
    fn release_event_reference(
        &self,
        event: &dyn Event,
        success: bool,
    ) -> Result<bool, AcknowledgementError>;

    /// Stops the background sweep and the callback executor. In-flight callbacks are not drained.
    fn shutdown(&self) -> Result<(), AcknowledgementError>;
}

pub struct DefaultAcknowledgementSetManager {
    monitor: Arc<AcknowledgementSetMonitor>,
    executor: Handle,
    /// Only set when the manager owns its callback runtime.
    runtime: Mutex<Option<Runtime>>,
    monitor_thread: Mutex<Option<MonitorThread>>,
    metrics: Arc<dyn AcknowledgementSetMetrics>,
    default_timeout: Duration,
    shut_down: AtomicBool,
}

impl DefaultAcknowledgementSetManager {
    /// Starts a manager reporting to the global `metrics` recorder.
    pub fn new(config: &Config) -> Result<Self, AcknowledgementError> {
        Self::with_metrics(config, Arc::new(RecorderMetrics))
    }

    /// Starts a manager with its own callback runtime, capped at `config.callback_threads`.
    pub fn with_metrics(
        config: &Config,
        metrics: Arc<dyn AcknowledgementSetMetrics>,
    ) -> Result<Self, AcknowledgementError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.callback_threads.get())
            .thread_name("acknowledgement-callback")
            .enable_all()
            .build()
            .map_err(AcknowledgementError::ExecutorStart)?;
        let executor = runtime.handle().clone();

        Self::start(config, executor, Some(runtime), metrics)
    }

    /// Starts a manager that runs callbacks on an existing runtime.
    pub fn with_executor(
        config: &Config,
        executor: Handle,
        metrics: Arc<dyn AcknowledgementSetMetrics>,
    ) -> Result<Self, AcknowledgementError> {
        Self::start(config, executor, None, metrics)
    }

    fn start(
        config: &Config,
        executor: Handle,
        runtime: Option<Runtime>,
        metrics: Arc<dyn AcknowledgementSetMetrics>,
    ) -> Result<Self, AcknowledgementError> {
        let monitor = Arc::new(AcknowledgementSetMonitor::new(metrics.clone()));
        let monitor_thread = MonitorThread::start(monitor.clone(), config.monitor_wait.0)?;

        Ok(Self {
            monitor,
            executor,
            runtime: Mutex::new(runtime),
            monitor_thread: Mutex::new(Some(monitor_thread)),
            metrics,
            default_timeout: config.default_timeout.0,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn create_with_default_timeout(
        &self,
        callback: CompletionCallback,
    ) -> Result<Arc<dyn AcknowledgementSet>, AcknowledgementError> {
        self.create(callback, self.default_timeout)
    }

    pub fn monitor(&self) -> &AcknowledgementSetMonitor {
        &self.monitor
    }

    fn stop(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut thread) = self.monitor_thread.lock().take() {
            thread.stop();
        }
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
        info!(
            remaining = self.monitor.len(),
            "acknowledgement set manager shut down"
        );
    }
}

impl AcknowledgementSetManager for DefaultAcknowledgementSetManager {
    fn create(
        &self,
        callback: CompletionCallback,
        timeout: Duration,
    ) -> Result<Arc<dyn AcknowledgementSet>, AcknowledgementError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(AcknowledgementError::ShutDown);
        }

        let set: Arc<dyn AcknowledgementSet> = DefaultAcknowledgementSet::new(
            self.executor.clone(),
            callback,
            timeout,
            self.metrics.clone(),
        );
        self.monitor.add(set.clone());
        self.metrics.increment(CREATED_METRIC_NAME);
        Ok(set)
    }

    fn acquire_event_reference(&self, event: &dyn Event) -> Result<(), AcknowledgementError> {
        match event.event_handle() {
            Some(handle) => {
                self.monitor.acquire(handle);
            }
            None => {
                warn!("acquire on an event without an event handle");
                self.metrics.increment(NULL_EVENT_HANDLES_METRIC_NAME);
            }
        }
        Ok(())
    }

    fn release_event_reference(
        &self,
        event: &dyn Event,
        success: bool,
    ) -> Result<bool, AcknowledgementError> {
        match event.event_handle() {
            Some(handle) => Ok(self.monitor.release(handle, success)),
            None => {
                warn!("release on an event without an event handle");
                self.metrics.increment(NULL_EVENT_HANDLES_METRIC_NAME);
                Ok(false)
            }
        }
    }

    fn shutdown(&self) -> Result<(), AcknowledgementError> {
        self.stop();
        Ok(())
    }
}

impl Drop for DefaultAcknowledgementSetManager {
    fn drop(&mut self) {
        self.stop()
    }
}

/// Stand-in for pipelines running with acknowledgements disabled.
///
/// Every call fails, so a plugin that assumes acknowledgements are on finds out at the call
/// site instead of silently never acknowledging anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct InactiveAcknowledgementSetManager;

impl AcknowledgementSetManager for InactiveAcknowledgementSetManager {
    fn create(
        &self,
        _callback: CompletionCallback,
        _timeout: Duration,
    ) -> Result<Arc<dyn AcknowledgementSet>, AcknowledgementError> {
        Err(AcknowledgementError::Unsupported {
            operation: "create",
        })
    }

    fn acquire_event_reference(&self, _event: &dyn Event) -> Result<(), AcknowledgementError> {
        Err(AcknowledgementError::Unsupported {
            operation: "acquire_event_reference",
        })
    }

    fn release_event_reference(
        &self,
        _event: &dyn Event,
        _success: bool,
    ) -> Result<bool, AcknowledgementError> {
        Err(AcknowledgementError::Unsupported {
            operation: "release_event_reference",
        })
    }

    fn shutdown(&self) -> Result<(), AcknowledgementError> {
        Err(AcknowledgementError::Unsupported {
            operation: "shutdown",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventHandle, TrackedEvent};
    use crate::test_utils::RecordingMetrics;

    #[test]
    fn inactive_manager_rejects_everything() {
        let manager = InactiveAcknowledgementSetManager;
        let event = TrackedEvent::new(());

        assert!(matches!(
            manager.create(Box::new(|_| {}), Duration::from_secs(1)),
            Err(AcknowledgementError::Unsupported { operation: "create" })
        ));
        assert!(matches!(
            manager.acquire_event_reference(&event),
            Err(AcknowledgementError::Unsupported { .. })
        ));
        assert!(matches!(
            manager.release_event_reference(&event, true),
            Err(AcknowledgementError::Unsupported { .. })
        ));
        assert!(matches!(
            manager.shutdown(),
            Err(AcknowledgementError::Unsupported { .. })
        ));
    }

    #[test]
    fn create_registers_with_the_monitor() {
        let metrics = RecordingMetrics::new();
        let manager =
            DefaultAcknowledgementSetManager::with_metrics(&Config::default(), metrics.clone())
                .expect("failed to start manager");

        let set = manager
            .create_with_default_timeout(Box::new(|_| {}))
            .expect("failed to create set");
        let handle = EventHandle::new();
        set.add(&handle);

        assert_eq!(manager.monitor().len(), 1);
        assert_eq!(metrics.count(CREATED_METRIC_NAME), 1);
        let remaining = set.expiration_time() - time::OffsetDateTime::now_utc();
        assert!(remaining > time::Duration::seconds(25));
    }

    #[test]
    fn create_after_shutdown_fails() {
        let manager = DefaultAcknowledgementSetManager::with_metrics(
            &Config::default(),
            RecordingMetrics::new(),
        )
        .expect("failed to start manager");

        manager.shutdown().expect("shutdown should succeed");
        manager.shutdown().expect("shutdown is idempotent");

        assert!(matches!(
            manager.create(Box::new(|_| {}), Duration::from_secs(1)),
            Err(AcknowledgementError::ShutDown)
        ));
    }

    #[test]
    fn events_without_handles_are_counted() {
        let metrics = RecordingMetrics::new();
        let manager =
            DefaultAcknowledgementSetManager::with_metrics(&Config::default(), metrics.clone())
                .expect("failed to start manager");
        let event = TrackedEvent::without_handle("orphan");

        manager
            .acquire_event_reference(&event)
            .expect("acquire is supported");
        assert!(!manager
            .release_event_reference(&event, true)
            .expect("release is supported"));

        assert_eq!(metrics.count(NULL_EVENT_HANDLES_METRIC_NAME), 2);
    }
}
