//! At-least-once delivery tracking for pipeline events.
//!
//! A source creates an [`AcknowledgementSet`] per unit of work (a queue message, a stream
//! checkpoint), adds every event it emits to it, and gets a single callback once all of them
//! were processed and flushed downstream, so it can acknowledge or retry the source record.
//! Sets are created through an [`AcknowledgementSetManager`], which registers them with a
//! monitor swept by a background thread to evict finished and expired sets.

pub mod config;
pub mod error;
pub mod event;
pub mod manager;
pub mod metrics;
pub mod metrics_consts;
pub mod monitor;
pub mod progress;
pub mod scheduler;
pub mod set;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use error::AcknowledgementError;
pub use event::{Event, EventHandle, EventHandleId, TrackedEvent};
pub use manager::{
    AcknowledgementSetManager, DefaultAcknowledgementSetManager, InactiveAcknowledgementSetManager,
};
pub use self::metrics::{AcknowledgementSetMetrics, RecorderMetrics};
pub use monitor::AcknowledgementSetMonitor;
pub use progress::{ProgressCheck, ProgressCheckCallback};
pub use set::{AcknowledgementSet, AcknowledgementSetId, CompletionCallback};
