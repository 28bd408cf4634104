//! Testing utilities for the synchronizer.
//!
//! The fakes stand in for the two external capabilities of a run:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RunCoordinator                          │
//! │                                                              │
//! │   MetricInventory ──► FakeLister     (listings in memory)    │
//! │   SyncExecutor    ──► FakeTransfer   (records requests,      │
//! │                                       copies between the     │
//! │                                       FakeLister's nodes)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use ringsync::testing::{FakeLister, FakeTransfer};
//! use ringsync::MetricEntry;
//! use std::sync::Arc;
//!
//! let storage = Arc::new(FakeLister::new());
//! storage.set("store2", vec![MetricEntry::new("servers.web1.cpu", 1_700_000_000, 4096)]);
//! storage.fail("store3");
//!
//! // Successful transfers copy entries between the lister's nodes.
//! let facility = FakeTransfer::backed_by(storage.clone());
//! facility.fail_source("store4");
//! ```

mod fakes;

pub use fakes::{FakeLister, FakeTransfer};
