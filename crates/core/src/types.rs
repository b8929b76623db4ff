/// Jobs are keyed by UUID v7 so ids sort by creation time.
pub type JobId = uuid::Uuid;

/// Opaque identifier of a provider-side task.
pub type TaskId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
