//! Partitioning of the transfer set into size-bounded batches.

use crate::sync::{TransferItem, TransferMode};
use crate::types::{Node, NodeId};
use std::collections::HashMap;
use std::num::NonZeroUsize;

/// Default number of metrics per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Items sharing one (source, destination) pair, copied in one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Position of the batch in the Batcher's output.
    pub sequence: u64,

    /// Node the items are read from.
    pub source: Node,

    /// Node the items are written to.
    pub destination: Node,

    /// Items in planner order.
    pub items: Vec<TransferItem>,
}

impl Batch {
    /// Get the number of items in the batch.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The (source, destination) pair.
    pub fn pair(&self) -> (&NodeId, &NodeId) {
        (&self.source.id, &self.destination.id)
    }

    /// Relative file paths of the items.
    pub fn paths(&self) -> Vec<String> {
        self.items.iter().map(TransferItem::path).collect()
    }

    /// Force-overwrite if any item may replace existing data.
    pub fn mode(&self) -> TransferMode {
        if self.items.iter().any(|i| i.overwrite) {
            TransferMode::ForceOverwrite
        } else {
            TransferMode::UpdateOnly
        }
    }
}

/// Slices a transfer set into [`Batch`]es.
#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    batch_size: NonZeroUsize,
}

impl Batcher {
    /// Create a batcher.
    pub fn new(batch_size: NonZeroUsize) -> Self {
        Self { batch_size }
    }

    /// Maximum items per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    /// Group items by pair in order of first appearance, keep planner order
    /// within each group, then cut each group into chunks.
    ///
    /// Every item lands in exactly one batch and identical input always
    /// yields identical batches.
    pub fn batch(&self, items: Vec<TransferItem>) -> Vec<Batch> {
        let mut groups: Vec<Vec<TransferItem>> = Vec::new();
        let mut index: HashMap<(NodeId, NodeId), usize> = HashMap::new();

        for item in items {
            let key = (item.source.id.clone(), item.destination.id.clone());
            let slot = *index.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(item);
        }

        let size = self.batch_size.get();
        let mut batches = Vec::new();
        let mut sequence = 0u64;

        for group in groups {
            let chunk_count = group.len().div_ceil(size);
            let mut remaining = group.into_iter();
            for _ in 0..chunk_count {
                let items: Vec<_> = remaining.by_ref().take(size).collect();
                let source = items[0].source.clone();
                let destination = items[0].destination.clone();
                batches.push(Batch {
                    sequence,
                    source,
                    destination,
                    items,
                });
                sequence += 1;
            }
        }

        batches
    }
}

impl Default for Batcher {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN))
    }
}
