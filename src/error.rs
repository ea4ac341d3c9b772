use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("worker binary not found: {}", .0.display())]
    BinaryNotFound(PathBuf),

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn worker process: {0}")]
    SpawnFailure(String),

    #[error("worker did not respond within {0:?}")]
    WorkerTimeout(Duration),

    #[error("could not reach worker endpoint: {0}")]
    ConnectionFailed(String),

    #[error("malformed worker response: {0}")]
    MalformedResponse(String),

    #[error("worker reported failure: {0}")]
    WorkerReportedFailure(String),

    #[error("job timed out waiting in the queue")]
    QueueTimeout,

    #[error("job was already dispatched to this worker")]
    AlreadyDispatched,

    #[error("pool is shut down")]
    PoolClosed,
}

/// A failed job outcome. Workers that report failure themselves may still
/// return partial data alongside the error message.
#[derive(Debug)]
pub struct JobFailure {
    pub error: PoolError,
    pub data: Option<serde_json::Value>,
}

impl JobFailure {
    pub fn new(error: PoolError) -> Self {
        Self { error, data: None }
    }

    pub fn with_data(error: PoolError, data: Option<serde_json::Value>) -> Self {
        Self { error, data }
    }
}

impl From<PoolError> for JobFailure {
    fn from(error: PoolError) -> Self {
        Self::new(error)
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for JobFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;

/// Terminal outcome of a dispatched job.
pub type JobResult = std::result::Result<serde_json::Value, JobFailure>;
