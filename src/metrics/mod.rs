//! Run metrics.
//!
//! A [`SyncMetrics`] registry is shared by the inventory, the executor and
//! the coordinator of one run. It is printed at the end of the run at debug
//! level, and can be rendered in Prometheus text format for node-exporter's
//! textfile collector.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       SyncMetrics                         │
//! │  ┌───────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │   Counters    │  │    Gauges    │  │   Histograms   │  │
//! │  │ - nodes       │  │ - in flight  │  │ - batch time   │  │
//! │  │ - batches     │  │ - planned    │  │ - listing time │  │
//! │  │ - items       │  │              │  │                │  │
//! │  └───────────────┘  └──────────────┘  └────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```

mod counters;
mod gauges;
mod histograms;

pub use counters::{Counter, LabeledCounter};
pub use gauges::{Gauge, GaugeGuard};
pub use histograms::{Histogram, HistogramSnapshot, LISTING_BUCKETS, TRANSFER_BUCKETS};

use serde::Serialize;

/// Metrics for one synchronization run.
#[derive(Debug)]
pub struct SyncMetrics {
    // Inventory
    /// Peers listed successfully.
    pub nodes_listed: Counter,
    /// Peers that could not be listed.
    pub nodes_unreachable: Counter,
    /// Time spent listing a node.
    pub listing_duration: Histogram,

    // Planning
    /// Items in the transfer set after filtering.
    pub items_planned: Gauge,

    // Execution
    /// Batches handed to the transfer facility.
    pub batches_started: Counter,
    /// Batches that completed.
    pub batches_succeeded: Counter,
    /// Batches that failed or timed out.
    pub batches_failed: Counter,
    /// Batches by transfer mode.
    pub batches_by_mode: LabeledCounter,
    /// Transfer invocations currently running.
    pub transfers_in_flight: Gauge,
    /// Wall-clock time of one transfer invocation.
    pub batch_duration: Histogram,

    /// Items transferred.
    pub items_transferred: Counter,
    /// Items in failed batches.
    pub items_failed: Counter,
    /// Items never dispatched.
    pub items_skipped: Counter,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            nodes_listed: Counter::new("ringsync_nodes_listed_total", "Peers listed"),
            nodes_unreachable: Counter::new(
                "ringsync_nodes_unreachable_total",
                "Peers that could not be listed",
            ),
            listing_duration: Histogram::with_buckets(
                "ringsync_listing_duration_seconds",
                "Time spent listing a node",
                LISTING_BUCKETS,
            ),
            items_planned: Gauge::new("ringsync_items_planned", "Items in the transfer set"),
            batches_started: Counter::new("ringsync_batches_started_total", "Batches started"),
            batches_succeeded: Counter::new(
                "ringsync_batches_succeeded_total",
                "Batches completed",
            ),
            batches_failed: Counter::new("ringsync_batches_failed_total", "Batches failed"),
            batches_by_mode: LabeledCounter::new(
                "ringsync_batches_by_mode_total",
                "Batches by transfer mode",
                "mode",
            ),
            transfers_in_flight: Gauge::new(
                "ringsync_transfers_in_flight",
                "Transfer invocations running",
            ),
            batch_duration: Histogram::with_buckets(
                "ringsync_batch_duration_seconds",
                "Wall-clock time of a transfer invocation",
                TRANSFER_BUCKETS,
            ),
            items_transferred: Counter::new(
                "ringsync_items_transferred_total",
                "Items transferred",
            ),
            items_failed: Counter::new("ringsync_items_failed_total", "Items in failed batches"),
            items_skipped: Counter::new("ringsync_items_skipped_total", "Items never dispatched"),
        }
    }

    /// Get a snapshot of the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let batch_duration = self.batch_duration.snapshot();
        MetricsSnapshot {
            nodes_listed: self.nodes_listed.get(),
            nodes_unreachable: self.nodes_unreachable.get(),
            items_planned: self.items_planned.get(),
            batches_started: self.batches_started.get(),
            batches_succeeded: self.batches_succeeded.get(),
            batches_failed: self.batches_failed.get(),
            items_transferred: self.items_transferred.get(),
            items_failed: self.items_failed.get(),
            items_skipped: self.items_skipped.get(),
            mean_batch_seconds: batch_duration.mean(),
            p95_batch_seconds: batch_duration.percentile(95.0),
        }
    }

    /// Format metrics in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        self.nodes_listed.render(&mut out);
        self.nodes_unreachable.render(&mut out);
        self.listing_duration.render(&mut out);

        self.items_planned.render(&mut out);

        self.batches_started.render(&mut out);
        self.batches_succeeded.render(&mut out);
        self.batches_failed.render(&mut out);
        self.batches_by_mode.render(&mut out);
        self.transfers_in_flight.render(&mut out);
        self.batch_duration.render(&mut out);

        self.items_transferred.render(&mut out);
        self.items_failed.render(&mut out);
        self.items_skipped.render(&mut out);

        out
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain values of a [`SyncMetrics`] registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub nodes_listed: u64,
    pub nodes_unreachable: u64,
    pub items_planned: i64,
    pub batches_started: u64,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub items_transferred: u64,
    pub items_failed: u64,
    pub items_skipped: u64,
    pub mean_batch_seconds: f64,
    pub p95_batch_seconds: f64,
}

impl MetricsSnapshot {
    /// Fraction of finished batches that succeeded.
    pub fn batch_success_rate(&self) -> f64 {
        let finished = self.batches_succeeded + self.batches_failed;
        if finished == 0 {
            0.0
        } else {
            self.batches_succeeded as f64 / finished as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_snapshot() {
        let metrics = SyncMetrics::new();
        metrics.nodes_listed.inc_by(3);
        metrics.nodes_unreachable.inc();
        metrics.batches_succeeded.inc_by(3);
        metrics.batches_failed.inc();
        metrics.batch_duration.observe_duration(Duration::from_secs(2));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.nodes_listed, 3);
        assert_eq!(snapshot.nodes_unreachable, 1);
        assert!((snapshot.batch_success_rate() - 0.75).abs() < 1e-9);
        assert!((snapshot.mean_batch_seconds - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = SyncMetrics::new();
        metrics.items_transferred.inc_by(42);
        metrics.batches_by_mode.inc("update_only");

        let output = metrics.to_prometheus();
        assert!(output.contains("ringsync_items_transferred_total 42"));
        assert!(output.contains("ringsync_batches_by_mode_total{mode=\"update_only\"} 1"));
        assert!(output.contains("# TYPE ringsync_batch_duration_seconds histogram"));
    }
}
