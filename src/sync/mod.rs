//! Synchronization pipeline: from a transfer set to executed transfers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RunCoordinator                          │
//! │                                                              │
//! │  items ─► TimeWindow ─► Batcher ─► SyncExecutor              │
//! │                                      │                       │
//! │             ┌──────────────┬─────────┴────┬──────────────┐   │
//! │             ▼              ▼              ▼              ▼   │
//! │         lane (c→b)     lane (d→b)     lane (e→b)       ...   │
//! │         batch 0,1,2    batch 3        batch 4,5              │
//! │             │              │              │                  │
//! │             └──────────────┴──── mpsc ────┘                  │
//! │                            ▼                                 │
//! │                  aggregator ─► RunResult                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lanes run concurrently under a shared limit; batches inside a lane run in
//! order. The aggregator is the only writer of the [`RunResult`].

mod batcher;
mod coordinator;
mod executor;
mod result;
mod transfer;
mod window;

pub use batcher::{Batch, Batcher, DEFAULT_BATCH_SIZE};
pub use coordinator::{RunCoordinator, RunState, SyncPlan};
pub use executor::{SyncExecutor, TransferFacility, DEFAULT_MAX_PARALLEL, DEFAULT_TRANSFER_TIMEOUT};
pub use result::{BatchOutcome, BatchReport, ItemFailure, ItemOutcome, RunResult, RunStatus};
pub use transfer::{Direction, TransferItem, TransferMode, TransferRequest};
pub use window::{now, TimeWindow};
