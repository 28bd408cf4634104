//! Ring-aware synchronization of carbon/whisper metric files.
//!
//! Every metric of a sharded carbon cluster is assigned to a subset of the
//! storage nodes by a consistent-hashing ring. This crate computes, for one
//! local node, which metrics it should hold, finds the nodes holding them,
//! and copies the missing or stale files in bounded batches.
//!
//! # Example
//!
//! ```rust,no_run
//! use ringsync::config::{ClusterConfig, SyncConfig};
//! use ringsync::inventory::{FsMetricLister, MetricInventory};
//! use ringsync::remote::{RsyncTransfer, SshMetricLister};
//! use ringsync::sync::{RunCoordinator, SyncExecutor};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let destinations = ["store1:2004:a", "store2:2004:a", "store3:2004:a"];
//!     let cluster = ClusterConfig::new("main", destinations)
//!         .with_replication_factor(2)
//!         .with_ssh_user("graphite");
//!     let config = SyncConfig::builder()
//!         .local_cluster(cluster)
//!         .local_node("store2")
//!         .build()?;
//!
//!     let inventory = MetricInventory::new(
//!         config.local_node()?,
//!         Arc::new(FsMetricLister::new(config.storage_dir())),
//!         Arc::new(SshMetricLister::new(config.storage_dir(), config.ssh_options().to_vec())),
//!         config.exclusion_filter()?,
//!     );
//!     let rsync = RsyncTransfer::new(config.storage_dir(), config.ssh_options().to_vec());
//!     let executor =
//!         SyncExecutor::new(Arc::new(rsync)).with_options(config.rsync_options().to_vec());
//!
//!     let result = RunCoordinator::new(&config, inventory, executor)?
//!         .run(CancellationToken::new())
//!         .await?;
//!     println!("transferred {} metrics, status {:?}", result.transferred, result.status);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │     SyncConfig (clusters, node, policy)     │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │              RunCoordinator                 │
//! │  Planning → Filtering → Batching → Executing│
//! └─────────────────────────────────────────────┘
//!                     │
//!     ┌───────────────┼───────────────┐
//!     ▼               ▼               ▼
//! ┌─────────┐   ┌──────────┐   ┌──────────┐
//! │Inventory│   │ HashRing │   │ Executor │
//! │ fs, ssh │   │ planner  │   │  rsync   │
//! └─────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Policy
//!
//! - A node only fetches metrics it owns; it never deletes anything.
//! - Without `overwrite`, a local copy is only replaced by a strictly newer
//!   one. With it, any local copy differing from the first owner's is replaced.
//! - A failed batch fails only its own items; the run carries on.

pub mod cli;
pub mod config;
pub mod error;
pub mod inventory;
pub mod metrics;
pub mod partitioning;
pub mod remote;
pub mod sync;
pub mod testing;
pub mod types;

pub use config::{ClusterConfig, ConfigFile, SyncConfig};
pub use error::{Error, Result};
pub use types::{MetricEntry, Node, NodeId, NodeRole, Timestamp};

pub use inventory::{ExclusionFilter, InventorySnapshot, MetricInventory, MetricLister};
pub use partitioning::{HashRing, OwnershipPlanner, OwnershipRole};
pub use sync::{
    Batch, Batcher, RunCoordinator, RunResult, RunState, RunStatus, SyncExecutor, TimeWindow,
    TransferFacility, TransferItem, TransferMode, TransferRequest,
};

pub use metrics::{MetricsSnapshot, SyncMetrics};
