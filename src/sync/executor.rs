//! Execution of batches against the transfer facility.
//!
//! Batches for one (source, destination) pair form a lane and run strictly in
//! Batcher order. Lanes run concurrently, with at most `max_parallel`
//! invocations in flight. Each finished batch is sent to the aggregator as a
//! [`BatchOutcome`]; the executor itself keeps no run state.

use crate::error::{Error, Result};
use crate::metrics::SyncMetrics;
use crate::sync::{Batch, BatchOutcome, Direction, ItemOutcome, TransferRequest};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of concurrent transfer invocations.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Default timeout of a single transfer invocation.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(3600);

/// Copies files between nodes.
///
/// One call transfers every path of the request. The call is idempotent and
/// safe to retry wholesale; an `Err` marks the whole request as failed.
#[async_trait]
pub trait TransferFacility: Send + Sync + std::fmt::Debug {
    /// Transfer the request's files.
    async fn transfer(&self, request: &TransferRequest) -> Result<()>;
}

/// Runs batches and reports their outcomes.
#[derive(Debug, Clone)]
pub struct SyncExecutor {
    facility: Arc<dyn TransferFacility>,
    options: Vec<String>,
    transfer_timeout: Duration,
    max_parallel: usize,
    metrics: Arc<SyncMetrics>,
}

impl SyncExecutor {
    /// Create an executor over `facility`.
    pub fn new(facility: Arc<dyn TransferFacility>) -> Self {
        Self {
            facility,
            options: Vec::new(),
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            max_parallel: DEFAULT_MAX_PARALLEL,
            metrics: Arc::new(SyncMetrics::new()),
        }
    }

    /// Facility options passed through with every request.
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    /// Set the per-invocation timeout.
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Set the maximum number of concurrent invocations.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Share a metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Build the facility request for a batch.
    pub fn request_for(&self, batch: &Batch) -> TransferRequest {
        let direction = batch.items.first().map_or(Direction::Pull, |i| i.direction);
        TransferRequest {
            paths: batch.paths(),
            source: batch.source.clone(),
            destination: batch.destination.clone(),
            direction,
            mode: batch.mode(),
            options: self.options.clone(),
        }
    }

    /// Execute one batch.
    ///
    /// Never fails: facility errors and timeouts become a failed outcome
    /// shared by every item of the batch. An empty batch is not sent to the
    /// facility.
    pub async fn execute(&self, batch: Batch) -> BatchOutcome {
        let request = self.request_for(&batch);
        if batch.is_empty() {
            return BatchOutcome {
                mode: request.mode,
                batch,
                outcome: ItemOutcome::Transferred,
                duration: Duration::ZERO,
            };
        }

        let started = Instant::now();
        self.metrics.batches_started.inc();
        self.metrics.batches_by_mode.inc(&request.mode.to_string());

        debug!(
            sequence = batch.sequence,
            source = %batch.source,
            destination = %batch.destination,
            items = batch.len(),
            mode = %request.mode,
            "Transferring batch"
        );

        let result = {
            let _in_flight = self.metrics.transfers_in_flight.track();
            let transfer = self.facility.transfer(&request);
            match tokio::time::timeout(self.transfer_timeout, transfer).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(self.transfer_timeout)),
            }
        };
        let duration = started.elapsed();
        self.metrics.batch_duration.observe_duration(duration);

        let outcome = match result {
            Ok(()) => {
                self.metrics.batches_succeeded.inc();
                self.metrics.items_transferred.inc_by(batch.len() as u64);
                ItemOutcome::Transferred
            }
            Err(e) => {
                warn!(
                    sequence = batch.sequence,
                    source = %batch.source,
                    destination = %batch.destination,
                    items = batch.len(),
                    error = %e,
                    "Batch failed"
                );
                self.metrics.batches_failed.inc();
                self.metrics.items_failed.inc_by(batch.len() as u64);
                ItemOutcome::Failed(e.to_string())
            }
        };

        BatchOutcome {
            mode: request.mode,
            batch,
            outcome,
            duration,
        }
    }

    /// Dispatch every batch, sending each outcome to `outcomes`.
    ///
    /// Returns once all lanes are spawned; the channel closes when the last
    /// lane finishes. After `cancel` fires no new batch is started: in-flight
    /// batches finish or time out, and undispatched ones are reported as
    /// skipped.
    pub fn dispatch(
        &self,
        batches: Vec<Batch>,
        cancel: CancellationToken,
        outcomes: mpsc::UnboundedSender<BatchOutcome>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        for lane in lanes(batches) {
            let executor = self.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let outcomes = outcomes.clone();

            tokio::spawn(async move {
                let mut lane = lane.into_iter();
                while let Some(batch) = lane.next() {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        permit = semaphore.clone().acquire_owned() => permit.ok(),
                    };

                    let Some(_permit) = permit else {
                        for batch in std::iter::once(batch).chain(lane.by_ref()) {
                            executor.metrics.items_skipped.inc_by(batch.len() as u64);
                            let _ = outcomes.send(BatchOutcome {
                                mode: batch.mode(),
                                batch,
                                outcome: ItemOutcome::Skipped("run cancelled".to_string()),
                                duration: Duration::ZERO,
                            });
                        }
                        break;
                    };

                    let outcome = executor.execute(batch).await;
                    if outcomes.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
    }
}

/// Split batches into per-pair lanes, keeping order inside each lane.
fn lanes(batches: Vec<Batch>) -> Vec<Vec<Batch>> {
    let mut lanes: Vec<Vec<Batch>> = Vec::new();
    for batch in batches {
        match lanes.iter_mut().find(|lane| lane[0].pair() == batch.pair()) {
            Some(lane) => lane.push(batch),
            None => lanes.push(vec![batch]),
        }
    }
    lanes
}
