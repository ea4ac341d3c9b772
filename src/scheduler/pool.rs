use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Mutex};

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::scheduler::job::{JobId, PendingJob, ReadyCallback};
use crate::scheduler::queue::PendingQueue;
use crate::worker::session::{SessionHandle, WorkerSession};
use crate::worker::ReadyWorker;

/// A bounded pool of short-lived worker processes.
///
/// Jobs are submitted with a ready callback and queued FIFO. Whenever a
/// capacity slot is free the head of the queue is turned into a
/// [`WorkerSession`]: a fresh process that serves exactly one job and is
/// killed afterwards, releasing its slot for the next queued job.
///
/// Submission never fails and never blocks; every per-job fault is
/// delivered through that job's callbacks.
pub struct Pool {
    inner: Arc<PoolInner>,
}

/// Point-in-time occupancy counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub active: usize,
    pub queued: usize,
}

impl Pool {
    /// Create a pool. Must be called within a tokio runtime. The only
    /// aborting errors are configuration errors; see
    /// [`PoolConfig::validate`].
    pub fn new(cfg: PoolConfig) -> Result<Self> {
        cfg.validate()?;
        let (events, event_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(PoolInner {
            cfg,
            http: reqwest::Client::new(),
            events,
            state: Mutex::new(PoolState {
                next_job_id: 1,
                queue: PendingQueue::new(),
                active: HashMap::new(),
                retry_scheduled: false,
                closed: false,
            }),
        });
        tokio::spawn(run_events(Arc::downgrade(&inner), event_rx));
        Ok(Self { inner })
    }

    /// Submit a job. Returns its id immediately; the job is dispatched as
    /// soon as a capacity slot is free.
    ///
    /// `on_ready` fires exactly once: with a [`ReadyWorker`] when a worker
    /// has announced its endpoint, or with an error when the job failed
    /// before any worker could serve it (spawn failure, stale eviction,
    /// pool shutdown).
    pub async fn submit<F>(&self, on_ready: F) -> JobId
    where
        F: FnOnce(Result<ReadyWorker>) + Send + 'static,
    {
        self.inner.submit(Box::new(on_ready)).await
    }

    /// Fail all queued jobs with [`PoolError::PoolClosed`] and terminate all
    /// active worker processes. Subsequent submissions fail the same way.
    pub async fn shutdown(&self) {
        let (pending, handles) = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            let pending = state.queue.drain_all();
            let handles: Vec<SessionHandle> = state.active.drain().map(|(_, h)| h).collect();
            (pending, handles)
        };
        tracing::info!(
            pending = pending.len(),
            active = handles.len(),
            "shutting down pool"
        );
        for job in pending {
            (job.on_ready)(Err(PoolError::PoolClosed));
        }
        for handle in handles {
            // Claim the callback of a session that never became ready before
            // killing the process, so the job fails with PoolClosed instead
            // of the stdout-EOF spawn-failure path.
            if let Some(on_ready) = handle.take_on_ready() {
                on_ready(Err(PoolError::PoolClosed));
            }
            handle.terminate().await;
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock().await;
        PoolStats {
            capacity: self.inner.cfg.capacity,
            active: state.active.len(),
            queued: state.queue.len(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.cfg
    }
}

/// Messages driving the scheduler's event task. Dispatch passes are only
/// ever run by that task, `submit`, or `shutdown` — never from a timer
/// task directly.
pub(crate) enum PoolEvent {
    /// A session finished (success, failure, or timeout); reclaim its slot.
    Completed(JobId),
    /// Retry timer fired while jobs were queued; reattempt dispatch.
    Wake,
}

struct PoolInner {
    cfg: PoolConfig,
    http: reqwest::Client,
    events: mpsc::UnboundedSender<PoolEvent>,
    state: Mutex<PoolState>,
}

/// All mutable scheduler state, touched only behind the one mutex.
struct PoolState {
    next_job_id: u64,
    queue: PendingQueue,
    /// Active sessions keyed by job id; `len() <= cfg.capacity` always.
    active: HashMap<JobId, SessionHandle>,
    /// One polling timer at a time while jobs remain queued.
    retry_scheduled: bool,
    closed: bool,
}

impl PoolInner {
    async fn submit(self: &Arc<Self>, on_ready: ReadyCallback) -> JobId {
        let mut state = self.state.lock().await;
        let id = JobId(state.next_job_id);
        state.next_job_id += 1;

        if state.closed {
            drop(state);
            on_ready(Err(PoolError::PoolClosed));
            return id;
        }

        let was_empty = state.queue.is_empty();
        state.queue.push(PendingJob::new(id, on_ready));
        tracing::debug!(job_id = %id, queued = state.queue.len(), "job submitted");
        drop(state);

        // Edge-triggered wakeup: a non-empty queue already has a dispatch
        // pass or retry timer in flight.
        if was_empty {
            self.dispatch().await;
        }
        id
    }

    /// One dispatch pass: evict stale queued jobs, then fill free slots from
    /// the head of the queue. Schedules a retry timer while jobs remain
    /// queued; goes idle otherwise.
    async fn dispatch(self: &Arc<Self>) {
        let mut failed: Vec<(ReadyCallback, PoolError)> = Vec::new();
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }

            // Jobs that waited past the per-job timeout fail outright; they
            // are not force-started over capacity.
            for job in state.queue.drain_stale(self.cfg.per_job_timeout) {
                tracing::warn!(job_id = %job.id, "evicting stale queued job");
                failed.push((job.on_ready, PoolError::QueueTimeout));
            }

            while state.active.len() < self.cfg.capacity {
                let Some(job) = state.queue.pop() else { break };
                let id = job.id;
                tracing::info!(job_id = %id, active = state.active.len() + 1, "dispatching job");
                match WorkerSession::launch(
                    &self.cfg,
                    job,
                    self.http.clone(),
                    self.events.clone(),
                ) {
                    Ok(handle) => {
                        state.active.insert(id, handle);
                    }
                    Err(launch) => failed.push((launch.on_ready, launch.error)),
                }
            }

            if !state.queue.is_empty() && !state.retry_scheduled {
                state.retry_scheduled = true;
                let inner = Arc::downgrade(self);
                let delay = self.cfg.spawn_retry_delay;
                // The timer only sends a wakeup; running the dispatch pass
                // here would make this future's type recursive.
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = inner.upgrade() {
                        inner.state.lock().await.retry_scheduled = false;
                        let _ = inner.events.send(PoolEvent::Wake);
                    }
                });
            }
        }

        // User callbacks run outside the state lock.
        for (on_ready, error) in failed {
            on_ready(Err(error));
        }
    }
}

/// Receives session completions and retry wakeups, reclaims slots and
/// reattempts dispatch. Removal is idempotent; a session that reports twice
/// (dispatch task and stdout watcher racing) is harmless.
async fn run_events(inner: Weak<PoolInner>, mut rx: mpsc::UnboundedReceiver<PoolEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        if let PoolEvent::Completed(job_id) = event {
            let mut state = inner.state.lock().await;
            if state.active.remove(&job_id).is_some() {
                tracing::debug!(
                    job_id = %job_id,
                    active = state.active.len(),
                    "session finished, slot reclaimed"
                );
            }
        }
        inner.dispatch().await;
    }
}
