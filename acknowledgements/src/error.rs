use thiserror::Error;

/// Errors surfaced by the acknowledgement manager.
///
/// Bookkeeping inconsistencies (unknown handles, double releases, missing handles) are not
/// errors: they are counted and logged so the pipeline keeps flowing.
#[derive(Error, Debug)]
pub enum AcknowledgementError {
    #[error("acknowledgements are disabled for this pipeline, {operation} is not supported")]
    Unsupported { operation: &'static str },
    #[error("failed to start the acknowledgement callback executor")]
    ExecutorStart(#[source] std::io::Error),
    #[error("failed to start the acknowledgement monitor thread")]
    MonitorStart(#[source] std::io::Error),
    #[error("the acknowledgement set manager has been shut down")]
    ShutDown,
}
