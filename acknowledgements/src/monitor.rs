use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::FairMutex;
use tracing::{debug, warn};

use crate::event::EventHandle;
use crate::metrics::AcknowledgementSetMetrics;
use crate::metrics_consts::{INVALID_ACQUIRES_METRIC_NAME, INVALID_RELEASES_METRIC_NAME};
use crate::set::{AcknowledgementSet, AcknowledgementSetId};

type Registry = HashMap<AcknowledgementSetId, Arc<dyn AcknowledgementSet>>;

/// Registry of every live acknowledgement set.
///
/// Reference changes routed through the monitor and the periodic sweep share one lock, so a
/// set can never be swept while a worker is validating that it still owns a handle.
pub struct AcknowledgementSetMonitor {
    sets: FairMutex<Registry>,
    metrics: Arc<dyn AcknowledgementSetMetrics>,
}

impl AcknowledgementSetMonitor {
    pub fn new(metrics: Arc<dyn AcknowledgementSetMetrics>) -> Self {
        Self {
            sets: FairMutex::new(HashMap::new()),
            metrics,
        }
    }

    pub fn add(&self, set: Arc<dyn AcknowledgementSet>) {
        let id = set.id();
        if let Some(previous) = self.sets.lock().insert(id, set) {
            warn!(
                acknowledgement_set = %previous.id(),
                "replaced an acknowledgement set registered under the same id"
            );
        }
    }

    /// Returns `false` when the owning set is gone or refused the reference.
    pub fn acquire(&self, handle: &EventHandle) -> bool {
        let sets = self.sets.lock();
        match owning_set(&sets, handle) {
            Some(set) => set.acquire(handle),
            None => {
                warn!(
                    event_handle = %handle.id(),
                    "acquire on an event handle whose acknowledgement set is gone"
                );
                self.metrics.increment(INVALID_ACQUIRES_METRIC_NAME);
                false
            }
        }
    }

    pub fn release(&self, handle: &EventHandle, success: bool) -> bool {
        let sets = self.sets.lock();
        match owning_set(&sets, handle) {
            Some(set) => set.release(handle, success),
            None => {
                warn!(
                    event_handle = %handle.id(),
                    "release on an event handle whose acknowledgement set is gone"
                );
                self.metrics.increment(INVALID_RELEASES_METRIC_NAME);
                false
            }
        }
    }

    /// Drops every set that has finished or expired. Returns how many were removed.
    pub fn run(&self) -> usize {
        let mut sets = self.sets.lock();
        let before = sets.len();
        sets.retain(|_, set| !set.is_done());
        let removed = before - sets.len();

        debug!(removed, remaining = sets.len(), "acknowledgement monitor sweep");
        removed
    }

    pub fn len(&self) -> usize {
        self.sets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.lock().is_empty()
    }
}

fn owning_set<'a>(
    sets: &'a Registry,
    handle: &EventHandle,
) -> Option<&'a Arc<dyn AcknowledgementSet>> {
    handle
        .acknowledgement_set_id()
        .and_then(|id| sets.get(&id))
}
