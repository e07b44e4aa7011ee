use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::FairMutex;
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::event::{Event, EventHandle, EventHandleId};
use crate::metrics::AcknowledgementSetMetrics;
use crate::metrics_consts::{
    COMPLETED_METRIC_NAME, EXPIRED_METRIC_NAME, INVALID_ACQUIRES_METRIC_NAME,
    INVALID_RELEASES_METRIC_NAME, NULL_EVENT_HANDLES_METRIC_NAME, REJECTED_ADDS_METRIC_NAME,
};
use crate::progress::{self, ProgressCheck, ProgressCheckCallback};

static NEXT_ACKNOWLEDGEMENT_SET_ID: AtomicU64 = AtomicU64::new(1);

/// Invoked once with the aggregate outcome of every release on the set.
pub type CompletionCallback = Box<dyn FnOnce(bool) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AcknowledgementSetId(u64);

impl AcknowledgementSetId {
    fn next() -> Self {
        Self(NEXT_ACKNOWLEDGEMENT_SET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for AcknowledgementSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tracks every event derived from one source unit of work, and reports once all of them
/// have been released downstream.
///
/// The producer `add`s each event it emits, then calls `complete` once it has nothing more
/// to add. Downstream branches `acquire` extra references when they fan an event out and
/// `release` them when done. When `complete` has been called and no references remain, the
/// completion callback runs once with the AND of every `release` outcome.
pub trait AcknowledgementSet: Send + Sync {
    fn id(&self) -> AcknowledgementSetId;

    /// Binds the event's handle to this set with a single reference.
    fn add(&self, event: &dyn Event);

    /// Signals that no more events will be added.
    fn complete(&self);

    /// Returns `false` when the handle is not pending here.
    fn acquire(&self, handle: &EventHandle) -> bool;

    /// Returns `true` only when this release scheduled the completion callback.
    fn release(&self, handle: &EventHandle, success: bool) -> bool;

    /// Whether the set reached a terminal state: callback finished, expired, or cancelled.
    /// Expiry is only ever detected here.
    fn is_done(&self) -> bool;

    fn add_progress_check(&self, callback: ProgressCheckCallback, interval: Duration);

    fn increase_expiry(&self, extra: Duration);

    fn expiration_time(&self) -> OffsetDateTime;

    /// Stops the set without running its callback.
    fn cancel(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Expired,
    Cancelled,
}

struct State {
    pending: HashMap<EventHandleId, u32>,
    total_events: usize,
    completed: bool,
    result: bool,
    expiry_time: OffsetDateTime,
    callback: Option<CompletionCallback>,
    callback_task: Option<JoinHandle<()>>,
    progress_task: Option<JoinHandle<()>>,
    outcome: Option<Outcome>,
}

impl State {
    /// No further events may join once the callback was handed to the executor or the set ended.
    fn is_closed(&self) -> bool {
        self.outcome.is_some() || self.callback_task.is_some()
    }

    fn stop_tasks(&mut self) {
        self.callback = None;
        if let Some(task) = self.callback_task.take() {
            task.abort();
        }
        if let Some(task) = self.progress_task.take() {
            task.abort();
        }
    }
}

pub struct DefaultAcknowledgementSet {
    id: AcknowledgementSetId,
    executor: Handle,
    metrics: Arc<dyn AcknowledgementSetMetrics>,
    self_ref: Weak<DefaultAcknowledgementSet>,
    state: FairMutex<State>,
}

impl DefaultAcknowledgementSet {
    pub(crate) fn new(
        executor: Handle,
        callback: CompletionCallback,
        timeout: Duration,
        metrics: Arc<dyn AcknowledgementSetMetrics>,
    ) -> Arc<Self> {
        let expiry_time = deadline_after(OffsetDateTime::now_utc(), timeout);

        Arc::new_cyclic(|self_ref| Self {
            id: AcknowledgementSetId::next(),
            executor,
            metrics,
            self_ref: self_ref.clone(),
            state: FairMutex::new(State {
                pending: HashMap::new(),
                total_events: 0,
                completed: false,
                result: true,
                expiry_time,
                callback: Some(callback),
                callback_task: None,
                progress_task: None,
                outcome: None,
            }),
        })
    }

    pub(crate) fn progress(&self) -> Option<ProgressCheck> {
        let state = self.state.lock();
        if state.is_closed() {
            return None;
        }
        Some(ProgressCheck::new(state.pending.len(), state.total_events))
    }

    #[cfg(test)]
    pub(crate) fn pending_references(&self, handle: &EventHandle) -> Option<u32> {
        self.state.lock().pending.get(&handle.id()).copied()
    }

    #[cfg(test)]
    pub(crate) fn set_pending_references(&self, handle: &EventHandle, references: u32) {
        self.state.lock().pending.insert(handle.id(), references);
    }

    /// Hands the callback to the executor. Returns `false` if it was already taken.
    fn schedule_callback(&self, state: &mut State) -> bool {
        let Some(callback) = state.callback.take() else {
            return false;
        };
        if let Some(task) = state.progress_task.take() {
            task.abort();
        }

        let id = self.id;
        let result = state.result;
        debug!(acknowledgement_set = %id, result, "scheduling acknowledgement callback");
        state.callback_task = Some(self.executor.spawn_blocking(move || callback(result)));
        true
    }

    /// Records the completed outcome if the callback already ran to the end.
    fn settle_finished_callback(&self, state: &mut State) -> bool {
        if state
            .callback_task
            .as_ref()
            .is_some_and(|task| task.is_finished())
        {
            state.callback_task = None;
            state.outcome = Some(Outcome::Completed);
            self.metrics.increment(COMPLETED_METRIC_NAME);
            return true;
        }
        false
    }
}

impl AcknowledgementSet for DefaultAcknowledgementSet {
    fn id(&self) -> AcknowledgementSetId {
        self.id
    }

    fn add(&self, event: &dyn Event) {
        let Some(handle) = event.event_handle() else {
            warn!(acknowledgement_set = %self.id, "ignoring event without an event handle");
            self.metrics.increment(NULL_EVENT_HANDLES_METRIC_NAME);
            return;
        };

        // Checked before taking our own lock, a set never holds two set locks at once.
        let replaceable = handle
            .acknowledgement_set()
            .filter(|previous| previous.id() != self.id && previous.is_done())
            .map(|previous| previous.id());

        let mut state = self.state.lock();
        if state.is_closed() {
            warn!(
                acknowledgement_set = %self.id,
                event_handle = %handle.id(),
                "ignoring event added to a finished acknowledgement set"
            );
            self.metrics.increment(REJECTED_ADDS_METRIC_NAME);
            return;
        }

        let set: Weak<dyn AcknowledgementSet> = self.self_ref.clone();
        if !handle.bind(self.id, set, self.metrics.clone(), replaceable) {
            warn!(
                acknowledgement_set = %self.id,
                event_handle = %handle.id(),
                owner = ?handle.acknowledgement_set_id(),
                "event handle still belongs to another acknowledgement set"
            );
            self.metrics.increment(REJECTED_ADDS_METRIC_NAME);
            return;
        }
        if state.pending.insert(handle.id(), 1).is_none() {
            state.total_events += 1;
        }
    }

    fn complete(&self) {
        let mut state = self.state.lock();
        state.completed = true;
        if state.pending.is_empty() {
            self.schedule_callback(&mut state);
        }
    }

    fn acquire(&self, handle: &EventHandle) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let references = match state.pending.get_mut(&handle.id()) {
            Some(references) if state.outcome.is_none() => references,
            _ => {
                warn!(
                    acknowledgement_set = %self.id,
                    event_handle = %handle.id(),
                    "acquire on an event handle that is not pending"
                );
                self.metrics.increment(INVALID_ACQUIRES_METRIC_NAME);
                return false;
            }
        };
        match references.checked_add(1) {
            Some(count) => {
                *references = count;
                true
            }
            None => {
                warn!(
                    acknowledgement_set = %self.id,
                    event_handle = %handle.id(),
                    "too many references on one event handle"
                );
                self.metrics.increment(INVALID_ACQUIRES_METRIC_NAME);
                false
            }
        }
    }

    fn release(&self, handle: &EventHandle, success: bool) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.result = state.result && success;

        let remaining = match state.pending.get_mut(&handle.id()) {
            Some(references) if state.outcome.is_none() => {
                *references -= 1;
                *references
            }
            _ => {
                warn!(
                    acknowledgement_set = %self.id,
                    event_handle = %handle.id(),
                    "release on an event handle that is not pending"
                );
                self.metrics.increment(INVALID_RELEASES_METRIC_NAME);
                return false;
            }
        };
        if remaining > 0 {
            return false;
        }

        state.pending.remove(&handle.id());
        if !state.pending.is_empty() {
            return false;
        }
        if !state.completed {
            debug!(
                acknowledgement_set = %self.id,
                "all events released before the acknowledgement set was completed"
            );
            return false;
        }
        self.schedule_callback(state)
    }

    fn is_done(&self) -> bool {
        let mut state = self.state.lock();
        if state.outcome.is_some() {
            return true;
        }
        if self.settle_finished_callback(&mut state) {
            return true;
        }
        if OffsetDateTime::now_utc() > state.expiry_time {
            state.stop_tasks();
            state.outcome = Some(Outcome::Expired);
            self.metrics.increment(EXPIRED_METRIC_NAME);
            warn!(
                acknowledgement_set = %self.id,
                pending = state.pending.len(),
                "acknowledgement set expired"
            );
            return true;
        }
        false
    }

    fn add_progress_check(&self, callback: ProgressCheckCallback, interval: Duration) {
        let mut state = self.state.lock();
        if state.is_closed() {
            return;
        }
        if let Some(previous) = state.progress_task.take() {
            previous.abort();
        }
        state.progress_task = Some(progress::spawn(
            &self.executor,
            self.self_ref.clone(),
            callback,
            interval,
        ));
    }

    fn increase_expiry(&self, extra: Duration) {
        let mut state = self.state.lock();
        state.expiry_time = deadline_after(state.expiry_time, extra);
    }

    fn expiration_time(&self) -> OffsetDateTime {
        self.state.lock().expiry_time
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        if state.outcome.is_some() || self.settle_finished_callback(&mut state) {
            return;
        }
        state.stop_tasks();
        state.outcome = Some(Outcome::Cancelled);
        debug!(acknowledgement_set = %self.id, "acknowledgement set cancelled");
    }
}

fn deadline_after(from: OffsetDateTime, timeout: Duration) -> OffsetDateTime {
    let timeout = time::Duration::try_from(timeout).unwrap_or(time::Duration::MAX);
    from.saturating_add(timeout)
}
