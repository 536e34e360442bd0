use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error kinds of the resize pipeline.
///
/// Every per-job error is caught at the worker loop boundary and recorded
/// as a terminal `failed` state; none of these crash the process. Startup
/// connectivity failures are the exception: they propagate out of main so
/// an orchestrator can restart the worker.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("job queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("image record store error: {0}")]
    RecordStore(String),

    #[error("image record not found: {0}")]
    RecordNotFound(String),

    #[error("status store error: {0}")]
    StatusStore(String),

    #[error("object storage error: {0}")]
    Storage(String),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("image transform failed: {0}")]
    Transform(String),
}

impl From<redis::RedisError> for PipelineError {
    fn from(err: redis::RedisError) -> Self {
        PipelineError::StatusStore(err.to_string())
    }
}
