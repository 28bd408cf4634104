//! Outcomes of executed batches and the aggregate run result.

use crate::sync::{Batch, TransferMode};
use crate::types::NodeId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of one planned item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum ItemOutcome {
    /// Copied, or already up to date at the destination.
    Transferred,
    /// Never dispatched (run interrupted).
    Skipped(String),
    /// The batch holding the item failed.
    Failed(String),
}

/// Outcome of one batch; every item in the batch shares it.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// The executed batch.
    pub batch: Batch,

    /// Mode the facility was invoked with.
    pub mode: TransferMode,

    /// Shared outcome of the batch's items.
    pub outcome: ItemOutcome,

    /// Wall-clock time spent on the invocation.
    pub duration: Duration,
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every planned item was transferred.
    Success,
    /// Some batches failed or some peers were unreachable.
    PartialFailure,
    /// Nothing was transferred: every batch failed or no peer was reachable.
    AllFailed,
    /// Dispatch stopped early on cancellation.
    Interrupted,
    /// A configuration or topology error stopped the run before execution.
    Aborted,
}

impl RunStatus {
    /// Process exit code for this status.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::PartialFailure => 1,
            RunStatus::AllFailed => 2,
            RunStatus::Aborted => 3,
            RunStatus::Interrupted => 130,
        }
    }
}

/// Summary of one batch in the report.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub sequence: u64,
    pub source: NodeId,
    pub destination: NodeId,
    pub items: usize,
    pub mode: TransferMode,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
    pub duration_ms: u64,
}

/// A failed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub metric: String,
    pub source: NodeId,
    pub reason: String,
}

/// Aggregate result of a run.
///
/// Written only by the run's aggregator.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Items produced by the ownership planner.
    pub planned: usize,
    /// Items dropped by the time window.
    pub filtered_out: usize,
    /// Items transferred.
    pub transferred: usize,
    /// Items never dispatched.
    pub skipped: usize,
    /// Items in failed batches.
    pub failed: usize,
    /// Per-batch summaries in completion order.
    pub batches: Vec<BatchReport>,
    /// Failed items.
    pub failures: Vec<ItemFailure>,
    /// Peers the run tried to list.
    pub peers: usize,
    /// Peers that could not be listed.
    pub unreachable_nodes: BTreeMap<NodeId, String>,
    /// Whether dispatch was cancelled.
    pub cancelled: bool,
    /// Final status, set by [`RunResult::finalize`].
    pub status: RunStatus,
}

impl RunResult {
    /// Create an empty result.
    pub fn new() -> Self {
        Self {
            planned: 0,
            filtered_out: 0,
            transferred: 0,
            skipped: 0,
            failed: 0,
            batches: Vec::new(),
            failures: Vec::new(),
            peers: 0,
            unreachable_nodes: BTreeMap::new(),
            cancelled: false,
            status: RunStatus::Success,
        }
    }

    /// Items that reached the executor.
    pub fn total_items(&self) -> usize {
        self.transferred + self.skipped + self.failed
    }

    /// Number of failed batches.
    pub fn failed_batches(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| matches!(b.outcome, ItemOutcome::Failed(_)))
            .count()
    }

    /// Fold a batch outcome into the totals.
    pub fn record(&mut self, outcome: &BatchOutcome) {
        let count = outcome.batch.len();
        match &outcome.outcome {
            ItemOutcome::Transferred => self.transferred += count,
            ItemOutcome::Skipped(_) => self.skipped += count,
            ItemOutcome::Failed(reason) => {
                self.failed += count;
                self.failures.extend(outcome.batch.items.iter().map(|item| ItemFailure {
                    metric: item.metric.clone(),
                    source: item.source.id.clone(),
                    reason: reason.clone(),
                }));
            }
        }

        self.batches.push(BatchReport {
            sequence: outcome.batch.sequence,
            source: outcome.batch.source.id.clone(),
            destination: outcome.batch.destination.id.clone(),
            items: count,
            mode: outcome.mode,
            outcome: outcome.outcome.clone(),
            duration_ms: outcome.duration.as_millis() as u64,
        });
    }

    /// Whether no peer could be listed.
    pub fn all_peers_unreachable(&self) -> bool {
        self.peers > 0 && self.unreachable_nodes.len() >= self.peers
    }

    /// Decide the final status.
    ///
    /// An unreachable peer counts as a failure: its metrics were never
    /// considered, so the local node may still be missing data.
    pub fn finalize(&mut self) -> RunStatus {
        self.batches.sort_by_key(|b| b.sequence);
        self.status = if self.cancelled && self.skipped > 0 {
            RunStatus::Interrupted
        } else if self.failed == 0 && self.unreachable_nodes.is_empty() {
            RunStatus::Success
        } else if self.transferred == 0 && (self.failed > 0 || self.all_peers_unreachable()) {
            RunStatus::AllFailed
        } else {
            RunStatus::PartialFailure
        };
        self.status
    }

    /// Result of a run cancelled before anything was dispatched.
    pub fn interrupted() -> Self {
        Self {
            cancelled: true,
            status: RunStatus::Interrupted,
            ..Self::new()
        }
    }
}

impl Default for RunResult {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::TransferItem;
    use crate::types::Node;

    fn outcome(sequence: u64, items: usize, outcome: ItemOutcome) -> BatchOutcome {
        let batch = Batch {
            sequence,
            source: Node::new("src"),
            destination: Node::new("dst"),
            items: (0..items)
                .map(|i| {
                    let metric = format!("m{}.{}", sequence, i);
                    TransferItem::pull(metric, Node::new("src"), Node::new("dst"), 1)
                })
                .collect(),
        };
        BatchOutcome {
            batch,
            mode: TransferMode::UpdateOnly,
            outcome,
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_success() {
        let mut result = RunResult::new();
        result.record(&outcome(0, 3, ItemOutcome::Transferred));

        assert_eq!(result.finalize(), RunStatus::Success);
        assert_eq!(result.transferred, 3);
        assert_eq!(result.status.exit_code(), 0);
    }

    #[test]
    fn test_partial_failure() {
        let mut result = RunResult::new();
        result.record(&outcome(1, 2, ItemOutcome::Failed("exit 23".into())));
        result.record(&outcome(0, 3, ItemOutcome::Transferred));

        assert_eq!(result.finalize(), RunStatus::PartialFailure);
        assert_eq!(result.failed, 2);
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.failed_batches(), 1);
        // Reports are ordered by batch sequence once finalized.
        assert_eq!(result.batches[0].sequence, 0);
        assert_ne!(result.status.exit_code(), 0);
    }

    #[test]
    fn test_all_failed() {
        let mut result = RunResult::new();
        result.record(&outcome(0, 2, ItemOutcome::Failed("refused".into())));

        assert_eq!(result.finalize(), RunStatus::AllFailed);
        assert_eq!(result.status.exit_code(), 2);
    }

    #[test]
    fn test_unreachable_peer_is_partial_failure() {
        let mut result = RunResult::new();
        result.peers = 2;
        result.unreachable_nodes.insert("c".into(), "connection refused".into());
        result.record(&outcome(0, 3, ItemOutcome::Transferred));
        assert_eq!(result.finalize(), RunStatus::PartialFailure);

        // Nothing to copy from the reachable peer: still partial.
        let mut result = RunResult::new();
        result.peers = 2;
        result.unreachable_nodes.insert("c".into(), "connection refused".into());
        assert_eq!(result.finalize(), RunStatus::PartialFailure);
        assert_eq!(result.status.exit_code(), 1);
    }

    #[test]
    fn test_no_reachable_peer_is_all_failed() {
        let mut result = RunResult::new();
        result.peers = 2;
        result.unreachable_nodes.insert("b".into(), "timeout".into());
        result.unreachable_nodes.insert("c".into(), "connection refused".into());

        assert!(result.all_peers_unreachable());
        assert_eq!(result.finalize(), RunStatus::AllFailed);
        assert_eq!(result.status.exit_code(), 2);

        // No peers at all is not a failure.
        let mut result = RunResult::new();
        assert!(!result.all_peers_unreachable());
        assert_eq!(result.finalize(), RunStatus::Success);
    }

    #[test]
    fn test_interrupted() {
        let mut result = RunResult::new();
        result.cancelled = true;
        result.record(&outcome(0, 2, ItemOutcome::Transferred));
        result.record(&outcome(1, 4, ItemOutcome::Skipped("cancelled".into())));

        assert_eq!(result.finalize(), RunStatus::Interrupted);
        assert_eq!(result.total_items(), 6);
    }

    #[test]
    fn test_report_serializes() {
        let mut result = RunResult::new();
        result.record(&outcome(0, 1, ItemOutcome::Failed("boom".into())));
        result.finalize();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "all_failed");
        assert_eq!(json["batches"][0]["outcome"], "failed");
        assert_eq!(json["batches"][0]["reason"], "boom");
    }
}
