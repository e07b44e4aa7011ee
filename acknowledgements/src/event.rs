use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::metrics::AcknowledgementSetMetrics;
use crate::metrics_consts::{INVALID_ACQUIRES_METRIC_NAME, INVALID_RELEASES_METRIC_NAME};
use crate::set::{AcknowledgementSet, AcknowledgementSetId};

static NEXT_EVENT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an `EventHandle`, stable for as long as any clone of the handle is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHandleId(u64);

impl fmt::Display for EventHandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything flowing through the pipeline that may carry an `EventHandle`.
///
/// Events without a handle are tolerated everywhere: they are counted and skipped.
pub trait Event: Send + Sync {
    fn event_handle(&self) -> Option<&EventHandle>;
}

/// Per-event capability that ties an event back to the acknowledgement set tracking it.
///
/// Clones share identity: the copy handed to a fanned-out branch is the same handle as
/// far as reference counting is concerned. The link to the owning set is non-owning, so a
/// handle may outlive the set it was bound to.
#[derive(Clone)]
pub struct EventHandle {
    inner: Arc<EventHandleInner>,
}

struct EventHandleInner {
    id: EventHandleId,
    binding: Mutex<Option<Binding>>,
}

struct Binding {
    set_id: AcknowledgementSetId,
    set: Weak<dyn AcknowledgementSet>,
    metrics: Arc<dyn AcknowledgementSetMetrics>,
}

/// Where a reference change on a handle has to go.
enum Route {
    Unbound,
    /// The set was dropped; only its metrics sink is left to record the stray call.
    Gone(AcknowledgementSetId, Arc<dyn AcknowledgementSetMetrics>),
    Live(Arc<dyn AcknowledgementSet>),
}

impl EventHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventHandleInner {
                id: EventHandleId(NEXT_EVENT_HANDLE_ID.fetch_add(1, Ordering::Relaxed)),
                binding: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> EventHandleId {
        self.inner.id
    }

    /// The id of the set this handle was added to, if any.
    pub fn acknowledgement_set_id(&self) -> Option<AcknowledgementSetId> {
        self.inner.binding.lock().as_ref().map(|binding| binding.set_id)
    }

    /// The set this handle was added to, if it is still alive.
    pub fn acknowledgement_set(&self) -> Option<Arc<dyn AcknowledgementSet>> {
        self.inner
            .binding
            .lock()
            .as_ref()
            .and_then(|binding| binding.set.upgrade())
    }

    /// Binds this handle to a set. A handle bound to another set that is still alive keeps
    /// its binding and `false` is returned, unless that set is `replaceable`: the caller
    /// checked it already reached a terminal state.
    pub(crate) fn bind(
        &self,
        set_id: AcknowledgementSetId,
        set: Weak<dyn AcknowledgementSet>,
        metrics: Arc<dyn AcknowledgementSetMetrics>,
        replaceable: Option<AcknowledgementSetId>,
    ) -> bool {
        let mut binding = self.inner.binding.lock();
        if let Some(existing) = binding.as_ref() {
            let taken = existing.set_id != set_id
                && Some(existing.set_id) != replaceable
                && existing.set.strong_count() > 0;
            if taken {
                return false;
            }
        }
        *binding = Some(Binding {
            set_id,
            set,
            metrics,
        });
        true
    }

    fn route(&self) -> Route {
        match self.inner.binding.lock().as_ref() {
            None => Route::Unbound,
            Some(binding) => match binding.set.upgrade() {
                Some(set) => Route::Live(set),
                None => Route::Gone(binding.set_id, binding.metrics.clone()),
            },
        }
    }

    /// Takes one more reference on this event in its set, for an additional downstream branch.
    /// Returns `false` when the set is gone or did not accept the reference.
    pub fn acquire(&self) -> bool {
        match self.route() {
            Route::Live(set) => set.acquire(self),
            Route::Gone(set_id, metrics) => {
                warn!(
                    acknowledgement_set = %set_id,
                    event_handle = %self.id(),
                    "acquire on an event handle whose acknowledgement set is gone"
                );
                metrics.increment(INVALID_ACQUIRES_METRIC_NAME);
                false
            }
            Route::Unbound => {
                debug!(
                    event_handle = %self.id(),
                    "acquire on a handle that was never added to an acknowledgement set"
                );
                false
            }
        }
    }

    /// Drops one reference on this event. Returns `true` when this release scheduled the
    /// set's completion callback.
    pub fn release(&self, success: bool) -> bool {
        match self.route() {
            Route::Live(set) => set.release(self, success),
            Route::Gone(set_id, metrics) => {
                warn!(
                    acknowledgement_set = %set_id,
                    event_handle = %self.id(),
                    "release on an event handle whose acknowledgement set is gone"
                );
                metrics.increment(INVALID_RELEASES_METRIC_NAME);
                false
            }
            Route::Unbound => {
                debug!(
                    event_handle = %self.id(),
                    "release on a handle that was never added to an acknowledgement set"
                );
                false
            }
        }
    }
}

impl Default for EventHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandle")
            .field("id", &self.id())
            .field("acknowledgement_set", &self.acknowledgement_set_id())
            .finish()
    }
}

impl PartialEq for EventHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for EventHandle {}

impl Hash for EventHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state)
    }
}

impl Event for EventHandle {
    fn event_handle(&self) -> Option<&EventHandle> {
        Some(self)
    }
}

/// A payload travelling with its event handle.
#[derive(Debug, Clone)]
pub struct TrackedEvent<T> {
    data: T,
    handle: Option<EventHandle>,
}

impl<T> TrackedEvent<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            handle: Some(EventHandle::new()),
        }
    }

    pub fn with_handle(data: T, handle: EventHandle) -> Self {
        Self {
            data,
            handle: Some(handle),
        }
    }

    /// An event that was produced outside of any acknowledgement flow.
    pub fn without_handle(data: T) -> Self {
        Self { data, handle: None }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }
}

impl<T: Send + Sync> Event for TrackedEvent<T> {
    fn event_handle(&self) -> Option<&EventHandle> {
        self.handle.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity() {
        let handle = EventHandle::new();
        let copy = handle.clone();

        assert_eq!(handle, copy);
        assert_ne!(handle, EventHandle::new());
    }

    #[test]
    fn unbound_handle_routes_nowhere() {
        let handle = EventHandle::new();

        assert_eq!(handle.acknowledgement_set_id(), None);
        assert!(handle.acknowledgement_set().is_none());
        assert!(!handle.acquire());
        assert!(!handle.release(true));
    }

    #[test]
    fn tracked_event_exposes_its_handle() {
        let handle = EventHandle::new();
        let event = TrackedEvent::with_handle("payload", handle.clone());

        assert_eq!(event.event_handle(), Some(&handle));
        assert_eq!(*event.data(), "payload");
        assert!(TrackedEvent::without_handle(1).event_handle().is_none());
    }
}
