use std::collections::VecDeque;
use std::time::Duration;

use crate::scheduler::job::PendingJob;

/// FIFO queue of submitted jobs that have not yet claimed a capacity slot.
///
/// Insertion order is submission order. Removal is head-first, except for
/// the stale sweep, which drains overdue entries wherever they sit.
#[derive(Debug, Default)]
pub struct PendingQueue {
    jobs: VecDeque<PendingJob>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: PendingJob) {
        self.jobs.push_back(job);
    }

    pub fn pop(&mut self) -> Option<PendingJob> {
        self.jobs.pop_front()
    }

    /// Remove every job that has waited longer than `max_wait`.
    ///
    /// Staleness is time-based, not position-based, so the whole queue is
    /// scanned on each pass. The drained jobs keep their submission order.
    pub fn drain_stale(&mut self, max_wait: Duration) -> Vec<PendingJob> {
        let mut stale = Vec::new();
        let mut keep = VecDeque::with_capacity(self.jobs.len());
        for job in self.jobs.drain(..) {
            if job.queued_at.elapsed() > max_wait {
                stale.push(job);
            } else {
                keep.push_back(job);
            }
        }
        self.jobs = keep;
        stale
    }

    /// Remove all remaining jobs, head first.
    pub fn drain_all(&mut self) -> Vec<PendingJob> {
        self.jobs.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
