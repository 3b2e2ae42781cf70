//! Broker state shared by the proxy, relay and tunnel handlers

use super::collector::{Collector, SweepStats};
use super::queue::JobQueue;
use super::store::ResultStore;
use super::types::{now_millis, Job, JobResult};
use crate::config::RelayConfig;
use crate::error::{Error, Result};

/// Owns the job queue, result store and collector for one broker process
pub struct Broker {
    config: RelayConfig,
    queue: JobQueue,
    store: ResultStore,
    collector: Collector,
}

impl Broker {
    pub fn new(config: RelayConfig) -> Self {
        let collector = Collector::new(
            now_millis(),
            config.gc_interval_secs * 1000,
            config.max_age_secs * 1000,
        );
        Self {
            config,
            queue: JobQueue::new(),
            store: ResultStore::new(),
            collector,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Run a sweep if one is due. Called at the start of every relay/proxy request.
    pub async fn collect_garbage(&self) -> Option<SweepStats> {
        self.collect_garbage_at(now_millis()).await
    }

    pub async fn collect_garbage_at(&self, now: u64) -> Option<SweepStats> {
        self.collector
            .maybe_sweep(now, &self.queue, &self.store)
            .await
    }

    /// Queue a job for the agent and return its id
    pub async fn submit(&self, job: Job) -> String {
        let id = job.id.clone();
        tracing::debug!(job_id = %id, method = %job.method, path = %job.path, "Job queued");
        self.queue.enqueue(job).await;
        id
    }

    /// Hand the oldest queued job to the agent
    pub async fn poll(&self) -> Option<Job> {
        let job = self.queue.dequeue().await;
        if let Some(job) = &job {
            tracing::debug!(job_id = %job.id, path = %job.path, "Job dispatched to agent");
        }
        job
    }

    /// Stage the agent's result for its waiter.
    ///
    /// Results for ids the broker never issued, or whose waiter already gave
    /// up, are stored all the same and left to the collector.
    pub async fn complete(&self, result: JobResult) {
        tracing::debug!(job_id = %result.id, status = result.status, "Job completed");
        self.store.put(result).await;
    }

    /// Non-blocking single read of a result
    pub async fn take_result(&self, id: &str) -> Option<JobResult> {
        self.store.take(id).await
    }

    /// Wait for the result of `id`, checking every poll interval until the
    /// attempt ceiling is reached.
    ///
    /// On timeout the job is left where it is; a late result becomes an
    /// orphan for the collector.
    pub async fn wait_for_result(&self, id: &str) -> Result<JobResult> {
        let interval = self.config.poll_interval();
        for _ in 0..self.config.max_attempts {
            tokio::time::sleep(interval).await;
            if let Some(result) = self.store.take(id).await {
                return Ok(result);
            }
        }

        tracing::warn!(
            job_id = %id,
            deadline_ms = self.config.deadline().as_millis() as u64,
            "Agent did not respond before the deadline"
        );
        Err(Error::Timeout(id.to_string()))
    }

    /// Queue a job and wait for its result
    pub async fn execute(&self, job: Job) -> Result<JobResult> {
        let id = self.submit(job).await;
        self.wait_for_result(&id).await
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}
