//! Transfer types: planned items and the requests handed to the transfer
//! facility.

use crate::types::{metric_to_path, Node, NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a transfer relative to the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Remote/peer → local.
    Pull,
    /// Local → remote/peer.
    Push,
}

/// How the destination's existing data is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Only write files that are missing or newer at the source.
    UpdateOnly,
    /// Replace destination files regardless of relative recency.
    ForceOverwrite,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::UpdateOnly => f.write_str("update_only"),
            TransferMode::ForceOverwrite => f.write_str("force_overwrite"),
        }
    }
}

/// A planned copy of one metric between two nodes.
///
/// Items are never mutated once planned; outcomes are recorded separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    /// Metric name.
    pub metric: String,

    /// Node holding the data to copy.
    pub source: Node,

    /// Node receiving the data.
    pub destination: Node,

    /// Direction relative to the local node.
    pub direction: Direction,

    /// Whether the destination's existing copy may be replaced.
    pub overwrite: bool,

    /// Modification time of the source copy.
    pub source_mtime: Timestamp,
}

impl TransferItem {
    /// Create a pull of `metric` from `source` into `destination`.
    pub fn pull(
        metric: impl Into<String>,
        source: Node,
        destination: Node,
        source_mtime: Timestamp,
    ) -> Self {
        Self {
            metric: metric.into(),
            source,
            destination,
            direction: Direction::Pull,
            overwrite: false,
            source_mtime,
        }
    }

    /// Set the overwrite flag.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Relative file path of the metric.
    pub fn path(&self) -> String {
        metric_to_path(&self.metric)
    }

    /// The (source, destination) pair this item is batched under.
    pub fn pair(&self) -> (&NodeId, &NodeId) {
        (&self.source.id, &self.destination.id)
    }
}

/// One invocation of the transfer facility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Relative file paths to copy.
    pub paths: Vec<String>,

    /// Node the files are read from.
    pub source: Node,

    /// Node the files are written to.
    pub destination: Node,

    /// Direction relative to the local node.
    pub direction: Direction,

    /// Update-only or force-overwrite.
    pub mode: TransferMode,

    /// Facility options, passed through uninterpreted.
    pub options: Vec<String>,
}

impl TransferRequest {
    /// Number of files in the request.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the request has no files.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// The node on the other side of the local node.
    pub fn remote(&self) -> &Node {
        match self.direction {
            Direction::Pull => &self.source,
            Direction::Push => &self.destination,
        }
    }
}
