use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexingError {
    /// The database failed a lookup, insert or write.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The scrobble-history source could not deliver plays.
    #[error("Scrobble source unavailable: {0}")]
    SourceUnavailable(String),

    /// A resolved map is missing a key the batch references.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Invalid play: {0}")]
    InvalidPlay(String),

    /// A caller-supplied value other than a play was rejected.
    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Job {job_id} not found")]
    JobNotFound { job_id: String },

    /// The job was claimed again after this delivery's lease expired, so
    /// its result is no longer recorded.
    #[error("Lease on job {job_id} was lost")]
    LeaseLost { job_id: String },

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid job status: {0}")]
    InvalidStatus(String),

    #[error("No handler registered for task {0}")]
    UnknownTask(String),

    #[error("Invalid arguments for task {task}: {message}")]
    InvalidArguments { task: String, message: String },

    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl IndexingError {
    /// Whether a later delivery of the same job can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexingError::StorageUnavailable(_)
                | IndexingError::SourceUnavailable(_)
                | IndexingError::Timeout(_)
        )
    }
}

impl From<LibraryError> for IndexingError {
    fn from(error: LibraryError) -> Self {
        match error {
            LibraryError::InvariantViolation(message) => IndexingError::InvariantViolation(message),
            LibraryError::InvalidInput { field, message } => {
                IndexingError::InvalidInput { field, message }
            }
            other => IndexingError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for IndexingError {
    fn from(error: sqlx::Error) -> Self {
        IndexingError::StorageUnavailable(error.to_string())
    }
}

impl From<serde_json::Error> for IndexingError {
    fn from(error: serde_json::Error) -> Self {
        IndexingError::Serialization(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IndexingError>;
