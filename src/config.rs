use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PoolError, Result};

/// Configuration for a worker process pool.
///
/// Immutable after pool creation. The worker command line is assembled as
/// `<binary> [extra_args...] <worker_entrypoint> <job_id> <worker_file>`,
/// inheriting the current working directory.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of concurrently active worker processes.
    pub capacity: usize,
    /// Delay between dispatch retries while jobs remain queued.
    pub spawn_retry_delay: Duration,
    /// Deadline for a dispatched job; also bounds queue residency.
    pub per_job_timeout: Duration,
    /// Path to the executable that hosts worker processes.
    pub binary: PathBuf,
    /// Extra arguments placed before the worker entrypoint.
    pub extra_args: Vec<String>,
    /// Script the binary runs; it must announce its port on stdout.
    pub worker_entrypoint: PathBuf,
    /// User-supplied worker program, passed through to the entrypoint.
    pub worker_file: PathBuf,
    /// Echo worker stdout at info level instead of debug.
    pub verbose: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 2,
            spawn_retry_delay: Duration::from_millis(100),
            per_job_timeout: Duration::from_secs(180),
            binary: PathBuf::new(),
            extra_args: Vec::new(),
            worker_entrypoint: PathBuf::new(),
            worker_file: PathBuf::new(),
            verbose: false,
        }
    }
}

impl PoolConfig {
    pub fn new(
        binary: impl Into<PathBuf>,
        worker_entrypoint: impl Into<PathBuf>,
        worker_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary: binary.into(),
            worker_entrypoint: worker_entrypoint.into(),
            worker_file: worker_file.into(),
            ..Default::default()
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_spawn_retry_delay(mut self, delay: Duration) -> Self {
        self.spawn_retry_delay = delay;
        self
    }

    pub fn with_per_job_timeout(mut self, timeout: Duration) -> Self {
        self.per_job_timeout = timeout;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Check the configuration at pool construction time. These are the only
    /// errors that abort startup; everything later flows through job callbacks.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "capacity must be at least 1".to_string(),
            ));
        }
        if self.worker_file.as_os_str().is_empty() {
            return Err(PoolError::InvalidConfig(
                "worker_file is required".to_string(),
            ));
        }
        if !self.binary.is_file() {
            return Err(PoolError::BinaryNotFound(self.binary.clone()));
        }
        Ok(())
    }
}
