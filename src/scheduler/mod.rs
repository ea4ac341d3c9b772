pub mod job;
pub mod pool;
pub mod queue;

pub use job::{JobId, JobMetadata};
pub use pool::{Pool, PoolStats};
