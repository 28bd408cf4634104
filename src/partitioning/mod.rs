//! Partitioning module for resolving metric ownership across cluster nodes.
//!
//! The ring reproduces carbon's consistent-hashing router, so that:
//! - a metric has the same owners here as in the relays
//! - several instances on one host count as one owner
//! - owners come primary first, then backups
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     OwnershipPlanner                     │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │                      HashRing                      │  │
//! │  │  ┌──────┐ ┌──────┐ ┌──────┐ ┌──────┐ ┌──────┐      │  │
//! │  │  │a:x/0 │→│b:x/7 │→│c:x/3 │→│a:y/9 │→│b:x/1 │ ...  │  │
//! │  │  └──────┘ └──────┘ └──────┘ └──────┘ └──────┘      │  │
//! │  │      100 positions per (host, instance)            │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │                                                          │
//! │  "servers.web1.cpu" → md5 → next position → b (primary)  │
//! │                                            → a (backup)  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use ringsync::partitioning::HashRing;
//! use ringsync::Node;
//!
//! let nodes = vec![Node::new("a"), Node::new("b"), Node::new("c")];
//! let ring = HashRing::new(nodes, 2).unwrap();
//!
//! let owners = ring.owner_ids("servers.web1.cpu");
//! assert_eq!(owners, vec!["b", "a"]);
//! assert_eq!(owners[0], ring.primary("servers.web1.cpu").id);
//! ```

mod hashring;
mod ownership;

pub use hashring::{HashRing, HashType, RingMember, RingOptions, REPLICAS_PER_INSTANCE};
pub use ownership::{MetricOwnership, OwnershipPlanner, OwnershipRole};
