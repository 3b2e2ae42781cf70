//! Relay poller: pulls jobs from the broker and posts results back

use super::upstream::Upstream;
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::relay::{Job, JobResult, PollResponse};
use crate::rewrite::RELAY_PATH;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Reference agent running next to the private service
#[derive(Clone)]
pub struct Agent {
    client: reqwest::Client,
    relay_url: String,
    upstream: Arc<dyn Upstream>,
    permits: Arc<Semaphore>,
    poll_interval: Duration,
}

impl Agent {
    pub fn new(config: &AgentConfig, upstream: Arc<dyn Upstream>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            relay_url: format!("{}{}", config.broker_url.trim_end_matches('/'), RELAY_PATH),
            upstream,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    /// Poll forever. Each job runs on its own task, bounded by the
    /// concurrency limit, so a slow upstream never stalls polling.
    pub async fn run(&self) {
        tracing::info!(relay = %self.relay_url, "Agent polling for jobs");
        loop {
            match self.poll_once().await {
                Ok(Some(job)) => {
                    self.dispatch(job).await;
                }
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    tracing::warn!("Poll failed: {}", e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Ask the broker for the oldest pending job
    pub async fn poll_once(&self) -> Result<Option<Job>> {
        let response = self
            .client
            .get(&self.relay_url)
            .query(&[("action", "poll")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Agent(format!(
                "Poll returned {}",
                response.status()
            )));
        }

        let poll: PollResponse = response.json().await?;
        Ok(if poll.pending { poll.job } else { None })
    }

    /// Run `job` on a new task once a concurrency permit is available
    pub async fn dispatch(&self, job: Job) -> JoinHandle<()> {
        let permit = self.permits.clone().acquire_owned().await;
        let agent = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            agent.handle(job).await;
        })
    }

    /// Execute one job and report its result, turning upstream failures
    /// into a 502 result so the waiting client is answered promptly
    pub async fn handle(&self, job: Job) {
        tracing::debug!(job_id = %job.id, method = %job.method, path = %job.path, "Executing job");

        let result = match self.upstream.execute(&job).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(job_id = %job.id, path = %job.path, "Upstream request failed: {}", e);
                JobResult::new(job.id.clone(), 502, format!("Agent upstream error: {}", e))
                    .with_header("Content-Type", "text/plain; charset=utf-8")
            }
        };

        if let Err(e) = self.complete(&result).await {
            tracing::warn!(job_id = %result.id, "Failed to post result: {}", e);
        }
    }

    /// Post a result to the broker
    pub async fn complete(&self, result: &JobResult) -> Result<()> {
        let response = self
            .client
            .post(&self.relay_url)
            .query(&[("action", "complete")])
            .json(result)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Agent(format!(
                "Complete returned {} for job {}",
                response.status(),
                result.id
            )));
        }
        Ok(())
    }
}
