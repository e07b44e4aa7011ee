/// Sink for the acknowledgement counters.
///
/// Sets, the monitor and the manager only ever call `increment` with one of the names in
/// `metrics_consts`; where the counts end up is the embedding process' business.
pub trait AcknowledgementSetMetrics: Send + Sync {
    fn increment(&self, name: &'static str);
}

/// Forwards every increment to the globally installed `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl AcknowledgementSetMetrics for RecorderMetrics {
    fn increment(&self, name: &'static str) {
        metrics::counter!(name).increment(1);
    }
}
