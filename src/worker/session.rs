//! One spawned process bound to exactly one job.
//!
//! A session walks `Starting -> AwaitingEndpoint -> Ready -> Busy ->
//! Completed` (or `Starting -> Failed` when the spawn itself fails). The
//! process is never reused: after one request/response cycle it is killed
//! and the pool is notified so the slot can be reclaimed.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;

use crate::config::PoolConfig;
use crate::error::{JobFailure, JobResult, PoolError, Result};
use crate::scheduler::job::{JobId, JobMetadata, PendingJob, ReadyCallback};
use crate::scheduler::pool::PoolEvent;
use crate::worker::protocol;

/// Callback fired exactly once with the outcome of a dispatched job.
pub type DoneCallback = Box<dyn FnOnce(JobResult) + Send + 'static>;

/// Handed to the ready callback when a worker has announced its endpoint.
pub struct ReadyWorker {
    pub dispatcher: Dispatcher,
    pub job: JobMetadata,
}

/// Spawn failure at launch time. The ready callback travels back to the
/// scheduler so it can be invoked outside the state lock.
pub(crate) struct FailedLaunch {
    pub(crate) on_ready: ReadyCallback,
    pub(crate) error: PoolError,
}

/// Owning handle the scheduler keeps in its active set.
pub(crate) struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub(crate) async fn terminate(&self) {
        self.shared.terminate().await;
    }

    /// Claim the pending ready callback, if any. Used at shutdown so the
    /// job is failed deliberately instead of through the stdout-EOF path
    /// once the process is killed.
    pub(crate) fn take_on_ready(&self) -> Option<ReadyCallback> {
        self.shared
            .on_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

pub(crate) struct WorkerSession;

impl WorkerSession {
    /// Spawn the worker process for `job` and start watching its stdout.
    ///
    /// The command line is `<binary> [extra_args...] <entrypoint> <job_id>
    /// <worker_file>`, inheriting the current working directory.
    pub(crate) fn launch(
        cfg: &PoolConfig,
        job: PendingJob,
        http: reqwest::Client,
        events: mpsc::UnboundedSender<PoolEvent>,
    ) -> std::result::Result<SessionHandle, FailedLaunch> {
        let metadata = job.metadata();

        let mut command = Command::new(&cfg.binary);
        command
            .args(&cfg.extra_args)
            .arg(&cfg.worker_entrypoint)
            .arg(job.id.to_string())
            .arg(&cfg.worker_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                let error = if err.kind() == std::io::ErrorKind::NotFound {
                    PoolError::SpawnFailure(format!(
                        "binary not found: {} ({err})",
                        cfg.binary.display()
                    ))
                } else {
                    PoolError::SpawnFailure(err.to_string())
                };
                tracing::warn!(job_id = %job.id, error = %error, "worker spawn failed");
                return Err(FailedLaunch {
                    on_ready: job.on_ready,
                    error,
                });
            }
        };

        let stdout = child.stdout.take();
        let shared = Arc::new(SessionShared {
            job_id: job.id,
            child: Mutex::new(Some(child)),
            on_ready: Mutex::new(Some(job.on_ready)),
            dispatched: AtomicBool::new(false),
            per_job_timeout: cfg.per_job_timeout,
            verbose: cfg.verbose,
            http,
            events,
        });

        tracing::debug!(job_id = %shared.job_id, "worker process spawned");
        match stdout {
            Some(stdout) => {
                tokio::spawn(read_stdout(shared.clone(), stdout, metadata));
            }
            None => {
                // Piped stdout was requested, so this cannot normally happen;
                // treat it like a worker that died before the handshake.
                let shared = shared.clone();
                tokio::spawn(async move { shared.stdout_closed().await });
            }
        }

        Ok(SessionHandle { shared })
    }
}

pub(crate) struct SessionShared {
    job_id: JobId,
    /// Write-once-take-once process handle; `None` once terminated.
    child: Mutex<Option<Child>>,
    /// Taken on the first readiness or pre-ready failure, never refilled.
    on_ready: Mutex<Option<ReadyCallback>>,
    dispatched: AtomicBool,
    per_job_timeout: Duration,
    verbose: bool,
    http: reqwest::Client,
    events: mpsc::UnboundedSender<PoolEvent>,
}

impl SessionShared {
    fn mark_ready(self: &Arc<Self>, port: u16, job: JobMetadata) {
        let on_ready = self
            .on_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(on_ready) = on_ready {
            tracing::debug!(job_id = %self.job_id, port, "worker announced its endpoint");
            let dispatcher = Dispatcher {
                shared: self.clone(),
                port,
            };
            on_ready(Ok(ReadyWorker {
                dispatcher,
                job,
            }));
        }
    }

    /// Stdout closed. If the sentinel never arrived the spawn failed before
    /// readiness; if it arrived but nothing was dispatched, the process died
    /// on its own. Either way the slot is reclaimed. A dispatched job stays
    /// under the control of its dispatch task.
    async fn stdout_closed(&self) {
        let on_ready = self
            .on_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(on_ready) = on_ready {
            tracing::warn!(job_id = %self.job_id, "worker exited before announcing its endpoint");
            self.terminate().await;
            on_ready(Err(PoolError::SpawnFailure(
                "worker exited before announcing its endpoint".to_string(),
            )));
            self.notify_completion();
        } else if !self.dispatched.load(Ordering::SeqCst) {
            tracing::debug!(job_id = %self.job_id, "worker closed while idle");
            self.terminate().await;
            self.notify_completion();
        }
    }

    /// Kill the worker process. Safe to call any number of times, including
    /// after the process has already exited.
    pub(crate) async fn terminate(&self) {
        let child = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut child) = child {
            tracing::debug!(job_id = %self.job_id, "terminating worker process");
            if let Err(err) = child.kill().await {
                tracing::debug!(job_id = %self.job_id, error = %err, "worker already gone");
            }
        }
    }

    fn notify_completion(&self) {
        // The receiver disappears only when the pool itself is gone.
        let _ = self.events.send(PoolEvent::Completed(self.job_id));
    }
}

/// Follow worker stdout for the lifetime of the process: discover the port
/// announcement, echo everything else as diagnostics.
async fn read_stdout(shared: Arc<SessionShared>, stdout: ChildStdout, metadata: JobMetadata) {
    let mut lines = BufReader::new(stdout).lines();
    let mut ready = false;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !ready {
                    if let Some(port) = protocol::parse_port_announcement(&line) {
                        ready = true;
                        shared.mark_ready(port, metadata.clone());
                        continue;
                    }
                }
                if !line.trim().is_empty() {
                    // Pass-through output from the user's worker program
                    if shared.verbose {
                        tracing::info!(job_id = %shared.job_id, "worker: {line}");
                    } else {
                        tracing::debug!(job_id = %shared.job_id, "worker: {line}");
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(job_id = %shared.job_id, error = %err, "worker stdout read failed");
                break;
            }
        }
    }
    shared.stdout_closed().await;
}

/// Sends one payload to the worker that produced it and delivers the
/// outcome to the done callback.
///
/// A dispatcher is bound to one session; dispatching is one-shot.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<SessionShared>,
    port: u16,
}

impl Dispatcher {
    /// Send `payload` to the worker. `done` is invoked exactly once with the
    /// result. A second call on the same session is rejected with
    /// [`PoolError::AlreadyDispatched`] and leaves its callback uninvoked.
    pub fn dispatch<F>(&self, payload: Value, done: F) -> Result<()>
    where
        F: FnOnce(JobResult) + Send + 'static,
    {
        if self.shared.dispatched.swap(true, Ordering::SeqCst) {
            tracing::warn!(job_id = %self.shared.job_id, "rejecting second dispatch");
            return Err(PoolError::AlreadyDispatched);
        }
        let shared = self.shared.clone();
        let port = self.port;
        tokio::spawn(run_job(shared, port, payload, Box::new(done)));
        Ok(())
    }

    pub fn job_id(&self) -> JobId {
        self.shared.job_id
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("job_id", &self.shared.job_id)
            .field("port", &self.port)
            .finish()
    }
}

/// One request/response cycle against the worker's loopback endpoint, raced
/// against the per-job timeout. Exactly one of the two branches resolves the
/// job; the worker is killed and the scheduler notified in every case.
async fn run_job(shared: Arc<SessionShared>, port: u16, payload: Value, done: DoneCallback) {
    // Display on Value renders compact JSON and cannot fail.
    let body = payload.to_string();

    tracing::debug!(job_id = %shared.job_id, port, "sending job payload");
    let url = format!("http://127.0.0.1:{port}/");
    let exchange = async {
        let response = shared
            .http
            .post(&url)
            .form(&[(protocol::PAYLOAD_FIELD, body.as_str())])
            .send()
            .await
            .map_err(|err| JobFailure::new(PoolError::ConnectionFailed(err.to_string())))?;
        response
            .text()
            .await
            .map_err(|err| JobFailure::new(PoolError::ConnectionFailed(err.to_string())))
    };

    let outcome = tokio::select! {
        _ = tokio::time::sleep(shared.per_job_timeout) => {
            tracing::warn!(
                job_id = %shared.job_id,
                timeout = ?shared.per_job_timeout,
                "worker did not respond in time"
            );
            Err(JobFailure::new(PoolError::WorkerTimeout(
                shared.per_job_timeout,
            )))
        }
        result = exchange => result.and_then(|text| {
            tracing::debug!(job_id = %shared.job_id, "worker replied");
            protocol::interpret_reply(&text)
        }),
    };

    shared.terminate().await;
    done(outcome);
    shared.notify_completion();
}
