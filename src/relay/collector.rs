//! Opportunistic garbage collection for the queue and result store
//!
//! There is no background timer. Every relay and proxy call asks the
//! collector to sweep; it only does so once the sweep interval has passed
//! since the previous sweep. Abandoned jobs and orphaned results are lost,
//! and their waiters (if any) see their own timeout.

use super::queue::JobQueue;
use super::store::ResultStore;
use std::sync::atomic::{AtomicU64, Ordering};

/// Entries dropped by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub jobs: usize,
    pub results: usize,
}

/// Interval-gated sweeper
pub struct Collector {
    /// Time of the previous sweep (ms since epoch)
    last_sweep: AtomicU64,
    interval_ms: u64,
    max_age_ms: u64,
}

impl Collector {
    /// Create a collector whose first sweep is due `interval_ms` after `now`
    pub fn new(now: u64, interval_ms: u64, max_age_ms: u64) -> Self {
        Self {
            last_sweep: AtomicU64::new(now),
            interval_ms,
            max_age_ms,
        }
    }

    /// Claim the right to sweep at `now`.
    ///
    /// Returns true for exactly one caller per elapsed interval.
    fn claim(&self, now: u64) -> bool {
        let last = self.last_sweep.load(Ordering::Acquire);
        if now.saturating_sub(last) < self.interval_ms {
            return false;
        }
        self.last_sweep
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Sweep both stores if the interval has elapsed
    pub async fn maybe_sweep(
        &self,
        now: u64,
        queue: &JobQueue,
        store: &ResultStore,
    ) -> Option<SweepStats> {
        if !self.claim(now) {
            return None;
        }

        let cutoff = now.saturating_sub(self.max_age_ms);
        let stats = SweepStats {
            jobs: queue.retain_newer_than(cutoff).await,
            results: store.retain_newer_than(cutoff).await,
        };

        if stats.jobs > 0 || stats.results > 0 {
            tracing::debug!(
                dropped_jobs = stats.jobs,
                dropped_results = stats.results,
                "Expired stale relay entries"
            );
        }
        Some(stats)
    }

    pub fn last_sweep(&self) -> u64 {
        self.last_sweep.load(Ordering::Acquire)
    }
}
