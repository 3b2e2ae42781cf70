//! Single-consumption result store

use super::types::JobResult;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Completed results keyed by job id, each readable exactly once
#[derive(Default)]
pub struct ResultStore {
    results: RwLock<HashMap<String, JobResult>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a result, replacing any previous value for the same id
    pub async fn put(&self, result: JobResult) {
        self.results.write().await.insert(result.id.clone(), result);
    }

    /// Remove and return the result for `id` if it has arrived.
    ///
    /// Never waits for a result; the remove happens under the write lock so
    /// concurrent callers cannot both observe the same value.
    pub async fn take(&self, id: &str) -> Option<JobResult> {
        self.results.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.results.read().await.is_empty()
    }

    /// Drop results completed before `cutoff` (ms). Returns how many were dropped.
    pub async fn retain_newer_than(&self, cutoff: u64) -> usize {
        let mut results = self.results.write().await;
        let before = results.len();
        results.retain(|_, result| result.timestamp >= cutoff);
        before - results.len()
    }
}
