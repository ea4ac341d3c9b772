//! Per-job worker processes.
//!
//! Each [`session::WorkerSession`] owns one spawned process for the
//! lifetime of exactly one job:
//!
//! 1. Spawn the configured binary with the job id on its command line
//! 2. Watch stdout for the port announcement ([`protocol::PORT_SENTINEL`])
//! 3. Hand the collaborator a [`Dispatcher`] once the worker is ready
//! 4. POST the payload to the announced loopback endpoint, racing the
//!    per-job timeout
//! 5. Kill the process and report completion to the scheduler

pub mod protocol;
pub mod session;

pub use session::{Dispatcher, DoneCallback, ReadyWorker};
