use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PoolError;
use crate::worker::ReadyWorker;

/// Monotonically increasing job identifier, assigned at submission.
/// Never reused for the lifetime of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static facts about a job, handed to the collaborator at readiness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub id: JobId,
    pub submitted_at: DateTime<Utc>,
}

/// Callback fired once per job: either the worker became ready to receive
/// a payload, or the job failed before a worker could serve it.
pub type ReadyCallback = Box<dyn FnOnce(Result<ReadyWorker, PoolError>) + Send + 'static>;

/// A submitted job waiting in the queue. Consumed on dispatch (it becomes
/// an active session) or on stale eviction.
pub struct PendingJob {
    pub id: JobId,
    pub submitted_at: DateTime<Utc>,
    pub queued_at: Instant,
    pub on_ready: ReadyCallback,
}

impl PendingJob {
    pub fn new(id: JobId, on_ready: ReadyCallback) -> Self {
        Self {
            id,
            submitted_at: Utc::now(),
            queued_at: Instant::now(),
            on_ready,
        }
    }

    pub fn metadata(&self) -> JobMetadata {
        JobMetadata {
            id: self.id,
            submitted_at: self.submitted_at,
        }
    }
}

impl std::fmt::Debug for PendingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingJob")
            .field("id", &self.id)
            .field("submitted_at", &self.submitted_at)
            .finish()
    }
}
