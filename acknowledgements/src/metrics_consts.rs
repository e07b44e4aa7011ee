/// Counter for acknowledgement sets handed out by the manager
pub const CREATED_METRIC_NAME: &str = "numberOfAcknowledgementSetsCreated";

/// Counter for acknowledgement sets whose completion callback ran
pub const COMPLETED_METRIC_NAME: &str = "numberOfAcknowledgementSetsCompleted";

/// Counter for acknowledgement sets that outlived their timeout
pub const EXPIRED_METRIC_NAME: &str = "numberOfAcknowledgementSetsExpired";

/// Counter for acquires on a handle its set does not know about
pub const INVALID_ACQUIRES_METRIC_NAME: &str = "numberOfInvalidAcknowledgementAcquires";

/// Counter for releases on an unknown or already fully released handle
pub const INVALID_RELEASES_METRIC_NAME: &str = "numberOfInvalidAcknowledgementReleases";

/// Counter for events reaching the acknowledgement path without an event handle
pub const NULL_EVENT_HANDLES_METRIC_NAME: &str = "numberOfNullEventHandles";

/// Counter for events an acknowledgement set refused to track
pub const REJECTED_ADDS_METRIC_NAME: &str = "numberOfRejectedAcknowledgementAdds";
