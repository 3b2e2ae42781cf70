//! FIFO job queue shared by every handler
//!
//! Producers are the proxy and `queue` action; consumers are agent polls.
//! Each dequeue removes the head under the write lock, so a job is handed
//! to at most one poller.

use super::types::Job;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// In-memory FIFO of jobs awaiting the agent
#[derive(Default)]
pub struct JobQueue {
    jobs: RwLock<VecDeque<Job>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job at the tail
    pub async fn enqueue(&self, job: Job) {
        self.jobs.write().await.push_back(job);
    }

    /// Remove and return the oldest job, or `None` when empty
    pub async fn dequeue(&self) -> Option<Job> {
        self.jobs.write().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Drop jobs enqueued before `cutoff` (ms). Returns how many were dropped.
    pub async fn retain_newer_than(&self, cutoff: u64) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|job| job.timestamp >= cutoff);
        before - jobs.len()
    }
}
