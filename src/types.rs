//! Core types used throughout the synchronizer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identifier in a cluster (the host name of a carbon destination).
pub type NodeId = String;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// File extension of metric files on disk.
pub const METRIC_FILE_EXT: &str = "wsp";

/// Whether a node is the one this run synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// The node being synchronized.
    Local,
    /// A peer node that supplies data.
    Remote,
}

/// A storage node reachable through the transfer facility.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within its cluster.
    pub id: NodeId,
    /// Host name or address used to reach the node.
    pub address: String,
    /// Remote user for ssh, if any.
    pub ssh_user: Option<String>,
    /// Role for the current run.
    pub role: NodeRole,
}

impl Node {
    /// Create a remote node whose address is its identifier.
    pub fn new(id: impl Into<NodeId>) -> Self {
        let id = id.into();
        Self {
            address: id.clone(),
            id,
            ssh_user: None,
            role: NodeRole::Remote,
        }
    }

    /// Set the ssh user.
    pub fn with_ssh_user(mut self, user: impl Into<String>) -> Self {
        self.ssh_user = Some(user.into());
        self
    }

    /// Set the role.
    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    /// Whether this is the local node.
    pub fn is_local(&self) -> bool {
        self.role == NodeRole::Local
    }

    /// The `user@host` target used by ssh and rsync.
    pub fn ssh_target(&self) -> String {
        match &self.ssh_user {
            Some(user) => format!("{}@{}", user, self.address),
            None => self.address.clone(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// A metric as seen in a node's listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricEntry {
    /// Dot-separated metric name.
    pub name: String,
    /// Last modification time of the metric file.
    pub mtime: Timestamp,
    /// File size in bytes.
    pub size: u64,
}

impl MetricEntry {
    /// Create a new entry.
    pub fn new(name: impl Into<String>, mtime: Timestamp, size: u64) -> Self {
        Self {
            name: name.into(),
            mtime,
            size,
        }
    }

    /// Whether two listings describe the same file contents (by metadata only).
    pub fn same_metadata(&self, other: &MetricEntry) -> bool {
        self.mtime == other.mtime && self.size == other.size
    }
}

/// Convert a metric name to its relative file path: `a.b.c` -> `a/b/c.wsp`.
pub fn metric_to_path(metric: &str) -> String {
    format!("{}.{}", metric.replace('.', "/"), METRIC_FILE_EXT)
}

/// Convert a relative file path back to a metric name.
///
/// Returns `None` for paths that are not metric files.
pub fn path_to_metric(path: &str) -> Option<String> {
    let path = path.trim_start_matches("./").trim_start_matches('/');
    let stem = path.strip_suffix(METRIC_FILE_EXT)?.strip_suffix('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(stem.replace('/', "."))
}
