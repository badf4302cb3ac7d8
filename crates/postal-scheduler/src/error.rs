use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A submission arrived without a correlation key.
    #[error("Missing unique id: every job needs a caller-chosen unique_id")]
    MissingUniqueId,

    /// An explicit job id was supplied that belongs to a job still pending.
    #[error("Job id already in use: {id}")]
    DuplicateJobId { id: String },

    /// No live job is registered under the correlation key.
    #[error("No job found for unique id: {unique_id}")]
    NotFound { unique_id: String },

    /// Admission was attempted while the scheduler is tearing down.
    #[error("Scheduler is shutting down")]
    ShuttingDown,

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// Short error code string sent to clients in RES frames.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::MissingUniqueId => "MISSING_UNIQUE_ID",
            SchedulerError::DuplicateJobId { .. } => "DUPLICATE_JOB_ID",
            SchedulerError::NotFound { .. } => "NOT_FOUND",
            SchedulerError::ShuttingDown => "SHUTTING_DOWN",
            SchedulerError::Database(_)
            | SchedulerError::Serialization(_)
            | SchedulerError::Io(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
