//! A bounded pool of short-lived worker processes.
//!
//! `procpool` dispatches queued jobs to freshly spawned processes and
//! returns results (or typed failures) to callers. Capacity is bounded;
//! bursts are absorbed by a FIFO queue with stale eviction; dead workers
//! release their slot and re-trigger dispatch.
//!
//! ```no_run
//! use procpool::{Pool, PoolConfig};
//!
//! # async fn demo() -> procpool::Result<()> {
//! let pool = Pool::new(PoolConfig::new(
//!     "/usr/local/bin/node",
//!     "worker/entrypoint.js",
//!     "my_worker.js",
//! ))?;
//!
//! pool.submit(|ready| {
//!     let worker = ready.expect("worker failed to start");
//!     worker
//!         .dispatcher
//!         .dispatch(serde_json::json!({"url": "https://example.org"}), |result| {
//!             println!("{result:?}");
//!         })
//!         .expect("first dispatch");
//! })
//! .await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod scheduler;
pub mod worker;

pub use config::PoolConfig;
pub use error::{JobFailure, JobResult, PoolError, Result};
pub use scheduler::{JobId, JobMetadata, Pool, PoolStats};
pub use worker::{Dispatcher, ReadyWorker};
