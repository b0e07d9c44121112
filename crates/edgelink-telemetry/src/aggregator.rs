//! # Memory-Usage Aggregator
//!
//! Collects per-worker counters and logs an aggregate on a fixed cadence
//! so operators can spot watchlist or state leaks. The client feeds it
//! from worker memory reports; it keeps the latest report per worker.

use edgelink_types::{MemoryReport, WorkerId};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Latest-per-worker counter store with periodic aggregate logging.
#[derive(Debug, Default)]
pub struct MemoryUsageAggregator {
    reports: Mutex<HashMap<WorkerId, MemoryReport>>,
}

impl MemoryUsageAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a worker's latest report.
    pub fn record(&self, worker: WorkerId, report: MemoryReport) {
        let mut reports = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        reports.insert(worker, report);
    }

    /// Aggregate all latest reports.
    #[must_use]
    pub fn aggregate(&self) -> MemoryReport {
        let reports = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        let mut total = MemoryReport::default();
        for report in reports.values() {
            total.frames_received += report.frames_received;
            total.frames_dropped += report.frames_dropped;
            total.frames_processed += report.frames_processed;
            total.watch_entries += report.watch_entries;
            total.sticky_entries += report.sticky_entries;
            total.state_nodes += report.state_nodes;
        }
        total
    }

    /// Number of workers currently reporting.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        let reports = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        reports.len()
    }

    /// Log the aggregate with structured fields.
    pub fn log_aggregate(&self) {
        let total = self.aggregate();
        info!(
            workers = self.worker_count(),
            frames_received = total.frames_received,
            frames_dropped = total.frames_dropped,
            frames_processed = total.frames_processed,
            watch_entries = total.watch_entries,
            sticky_entries = total.sticky_entries,
            state_nodes = total.state_nodes,
            "worker memory usage"
        );
    }

    /// Run the reporting loop; logs every `interval` until the task is
    /// aborted.
    pub async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.log_aggregate();
        }
    }
}
