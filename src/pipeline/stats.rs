//! Pipeline statistics
//!
//! Lock-free counters shared by the dispatcher and the workers, plus a
//! periodic reporter task. Only units that reach a terminal success
//! outcome count as processed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

/// Thread-safe counters for the URL pipeline
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Units admitted into the work queue
    accepted: AtomicU64,
    /// Units that completed with a success outcome
    processed: AtomicU64,
    /// Units that completed with an error outcome
    errors: AtomicU64,
    /// Units rejected by admission control
    rejected: AtomicU64,
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Units admitted into the work queue
    pub accepted: u64,
    /// Units that completed successfully
    pub processed: u64,
    /// Units that failed terminally
    pub errors: u64,
    /// Units rejected while the queue was full
    pub rejected: u64,
}

impl PipelineStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a unit admitted into the queue
    #[inline]
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a unit that completed successfully
    #[inline]
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a unit that failed terminally
    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejection by admission control
    #[inline]
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Units that completed successfully so far
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Take a consistent-enough snapshot of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Periodically log running totals until shutdown
///
/// Logs only when the totals changed since the last tick.
pub async fn run_stats_reporter(
    stats: Arc<PipelineStats>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut last = stats.snapshot();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let current = stats.snapshot();
                if current != last {
                    info!(
                        processed = current.processed,
                        errors = current.errors,
                        rejected = current.rejected,
                        "Total URLs processed: {}",
                        current.processed
                    );
                    last = current;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = PipelineStats::new();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_processed();
        stats.record_error();
        stats.record_rejected();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.accepted, 2);
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.rejected, 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let stats = Arc::new(PipelineStats::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    stats.record_processed();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(stats.processed(), 8000);
    }

    #[tokio::test]
    async fn test_reporter_stops_on_shutdown() {
        let stats = Arc::new(PipelineStats::new());
        let (tx, rx) = broadcast::channel(1);

        let reporter = tokio::spawn(run_stats_reporter(
            stats,
            Duration::from_millis(10),
            rx,
        ));

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), reporter)
            .await
            .expect("reporter did not stop")
            .unwrap();
    }
}
