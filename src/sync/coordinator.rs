//! Run coordinator: drives one synchronization run end to end.
//!
//! The run moves through a fixed sequence of stages, each consuming the whole
//! output of the previous one:
//!
//! ```text
//! Init ─► Planning ─► Filtering ─► Batching ─► Executing ─► Done
//! ```
//!
//! Errors before `Executing` abort the run. Once batches are dispatched,
//! failures are scoped to their batch and only affect the final status.

use crate::config::SyncConfig;
use crate::error::Result;
use crate::inventory::MetricInventory;
use crate::metrics::SyncMetrics;
use crate::partitioning::{HashRing, OwnershipPlanner};
use crate::sync::{
    Batch, Batcher, RunResult, RunStatus, SyncExecutor, TimeWindow, TransferItem,
};
use crate::types::{Node, NodeId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Created, nothing done yet.
    Init,
    /// Listing nodes and computing the transfer set.
    Planning,
    /// Applying the time window.
    Filtering,
    /// Slicing the transfer set into batches.
    Batching,
    /// Batches are being transferred.
    Executing,
    /// The run finished, successfully or not.
    Done,
}

/// Output of the planning stages.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    /// Items produced by the ownership planner.
    pub planned: usize,
    /// Items dropped by the time window.
    pub filtered_out: usize,
    /// Batches to execute, in Batcher order.
    pub batches: Vec<Batch>,
    /// Peers that could not be listed.
    pub unreachable: BTreeMap<NodeId, String>,
}

impl SyncPlan {
    /// Number of items left after filtering.
    pub fn item_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    /// Every item in batch order.
    pub fn items(&self) -> impl Iterator<Item = &TransferItem> {
        self.batches.iter().flat_map(|b| b.items.iter())
    }
}

/// Drives the pipeline and aggregates batch outcomes.
#[derive(Debug)]
pub struct RunCoordinator {
    local_node: Node,
    local_ring: HashRing,
    remote_ring: Option<HashRing>,
    peers: Vec<Node>,
    overwrite: bool,
    window: TimeWindow,
    batcher: Batcher,
    inventory: MetricInventory,
    executor: SyncExecutor,
    state: RwLock<RunState>,
    metrics: Arc<SyncMetrics>,
}

impl RunCoordinator {
    /// Create a coordinator for `config`.
    ///
    /// Builds both rings and captures the end of the time window.
    pub fn new(
        config: &SyncConfig,
        inventory: MetricInventory,
        executor: SyncExecutor,
    ) -> Result<Self> {
        Ok(Self {
            local_node: config.local_node()?,
            local_ring: config.local_ring()?,
            remote_ring: config.remote_ring()?,
            peers: config.peers()?,
            overwrite: config.overwrite(),
            window: config.time_window()?,
            batcher: config.batcher(),
            inventory,
            executor,
            state: RwLock::new(RunState::Init),
            metrics: Arc::new(SyncMetrics::new()),
        })
    }

    /// Share a metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Current stage.
    pub fn state(&self) -> RunState {
        *self.state.read()
    }

    /// The node being synchronized.
    pub fn local_node(&self) -> &Node {
        &self.local_node
    }

    /// Peers listed for supplies.
    pub fn peers(&self) -> &[Node] {
        &self.peers
    }

    fn transition(&self, next: RunState) {
        let mut state = self.state.write();
        debug!(from = ?*state, to = ?next, "Run state transition");
        *state = next;
    }

    /// Run the planning stages without transferring anything.
    pub async fn plan(&self) -> Result<SyncPlan> {
        self.transition(RunState::Planning);
        info!(
            node = %self.local_node,
            peers = self.peers.len(),
            overwrite = self.overwrite,
            "Planning synchronization"
        );

        let snapshot = self.inventory.collect(&self.peers).await?;
        let planner = OwnershipPlanner::new(
            &self.local_node,
            &self.local_ring,
            self.remote_ring.as_ref(),
            self.overwrite,
        );
        let items = planner.plan(&snapshot);
        let planned = items.len();

        self.transition(RunState::Filtering);
        let (items, filtered_out) = self.window.apply(items);
        if filtered_out > 0 {
            info!(
                dropped = filtered_out,
                start = self.window.start(),
                end = self.window.end(),
                "Time window dropped items"
            );
        }

        self.transition(RunState::Batching);
        let batches = self.batcher.batch(items);
        self.metrics.items_planned.set(batches.iter().map(Batch::len).sum::<usize>() as i64);

        let plan = SyncPlan {
            planned,
            filtered_out,
            batches,
            unreachable: snapshot.unreachable().clone(),
        };
        info!(
            items = plan.item_count(),
            batches = plan.batches.len(),
            unreachable = plan.unreachable.len(),
            "Transfer plan ready"
        );
        Ok(plan)
    }

    /// Run the whole pipeline.
    ///
    /// Returns `Err` only for errors before execution starts. Cancelling
    /// `cancel` during planning returns an interrupted result with nothing
    /// transferred; during execution it stops dispatching new batches.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunResult> {
        let started = Instant::now();

        let plan = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Run cancelled during planning");
                self.transition(RunState::Done);
                return Ok(RunResult::interrupted());
            }
            plan = self.plan() => plan,
        };
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                self.transition(RunState::Done);
                return Err(e);
            }
        };

        let mut result = self.execute(plan, cancel).await;
        let status = result.finalize();
        self.transition(RunState::Done);

        match status {
            RunStatus::Success => info!(
                transferred = result.transferred,
                elapsed = ?started.elapsed(),
                "Synchronization complete"
            ),
            _ => warn!(
                status = ?status,
                transferred = result.transferred,
                failed = result.failed,
                failed_batches = result.failed_batches(),
                unreachable = result.unreachable_nodes.len(),
                skipped = result.skipped,
                elapsed = ?started.elapsed(),
                "Synchronization finished with failures"
            ),
        }
        Ok(result)
    }

    /// Dispatch the plan and fold every outcome into a [`RunResult`].
    ///
    /// This loop is the only writer of the result.
    async fn execute(&self, plan: SyncPlan, cancel: CancellationToken) -> RunResult {
        self.transition(RunState::Executing);

        let mut result = RunResult::new();
        result.planned = plan.planned;
        result.filtered_out = plan.filtered_out;
        result.peers = self.peers.len();
        result.unreachable_nodes = plan.unreachable;

        let total: usize = plan.batches.iter().map(Batch::len).sum();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.executor.dispatch(plan.batches, cancel.clone(), tx);

        let mut done = 0usize;
        while let Some(outcome) = rx.recv().await {
            done += outcome.batch.len();
            result.record(&outcome);
            info!(
                done,
                total,
                "Progress {}/{} ({:.1}%)",
                done,
                total,
                done as f64 * 100.0 / total.max(1) as f64
            );
        }

        result.cancelled = cancel.is_cancelled();
        result
    }
}
