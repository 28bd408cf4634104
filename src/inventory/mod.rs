//! Metric inventory: what each node holds.
//!
//! Listing is delegated to a [`MetricLister`] so the planner can be exercised
//! against fakes. The local node is usually listed from disk
//! ([`FsMetricLister`]) and peers over ssh
//! ([`SshMetricLister`](crate::remote::SshMetricLister)).
//!
//! The same [`ExclusionFilter`] is applied to every listing, so excluded
//! metrics never reach the planner from either side.

mod filter;
mod fs;

pub use filter::{ExclusionFilter, DEFAULT_EXCLUDE};
pub use fs::FsMetricLister;

use crate::error::{Error, Result};
use crate::metrics::SyncMetrics;
use crate::types::{MetricEntry, Node, NodeId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Lists the metrics held by a node.
///
/// Implementations must return an explicit error when the node cannot be
/// listed, never a partial list.
#[async_trait]
pub trait MetricLister: Send + Sync + std::fmt::Debug {
    /// List every metric on `node`.
    async fn list(&self, node: &Node) -> Result<Vec<MetricEntry>>;
}

/// Metrics known on the local node and its peers.
#[derive(Debug, Clone, Default)]
pub struct InventorySnapshot {
    local: HashMap<String, MetricEntry>,
    peers: HashMap<NodeId, HashMap<String, MetricEntry>>,
    unreachable: BTreeMap<NodeId, String>,
}

impl InventorySnapshot {
    /// Record a metric held locally.
    pub fn insert_local(&mut self, entry: MetricEntry) {
        self.local.insert(entry.name.clone(), entry);
    }

    /// Record a metric held by a peer.
    pub fn insert_peer(&mut self, node: &str, entry: MetricEntry) {
        self.peers
            .entry(node.to_string())
            .or_default()
            .insert(entry.name.clone(), entry);
    }

    /// Record that a peer could not be listed.
    pub fn mark_unreachable(&mut self, node: &str, reason: impl Into<String>) {
        self.unreachable.insert(node.to_string(), reason.into());
    }

    /// Local copy of a metric.
    pub fn local(&self, metric: &str) -> Option<&MetricEntry> {
        self.local.get(metric)
    }

    /// A peer's copy of a metric.
    pub fn peer(&self, node: &str, metric: &str) -> Option<&MetricEntry> {
        self.peers.get(node).and_then(|m| m.get(metric))
    }

    /// Every metric name seen anywhere. May repeat names.
    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.local
            .keys()
            .chain(self.peers.values().flat_map(|m| m.keys()))
            .map(String::as_str)
    }

    /// Number of local metrics.
    pub fn local_count(&self) -> usize {
        self.local.len()
    }

    /// Number of metrics listed on a peer.
    pub fn peer_count(&self, node: &str) -> usize {
        self.peers.get(node).map_or(0, |m| m.len())
    }

    /// Peers that could not be listed, with the reason.
    pub fn unreachable(&self) -> &BTreeMap<NodeId, String> {
        &self.unreachable
    }
}

/// Builds an [`InventorySnapshot`] from listers and an exclusion filter.
#[derive(Debug, Clone)]
pub struct MetricInventory {
    local_node: Node,
    local_lister: Arc<dyn MetricLister>,
    remote_lister: Arc<dyn MetricLister>,
    filter: ExclusionFilter,
    list_timeout: Duration,
    max_parallel: usize,
    metrics: Arc<SyncMetrics>,
}

impl MetricInventory {
    /// Create a new inventory.
    pub fn new(
        local_node: Node,
        local_lister: Arc<dyn MetricLister>,
        remote_lister: Arc<dyn MetricLister>,
        filter: ExclusionFilter,
    ) -> Self {
        Self {
            local_node,
            local_lister,
            remote_lister,
            filter,
            list_timeout: Duration::from_secs(300),
            max_parallel: 4,
            metrics: Arc::new(SyncMetrics::new()),
        }
    }

    /// Set the timeout for a single listing call.
    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    /// Set how many peers are listed concurrently.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Share a metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// List the local node, filtered.
    pub async fn list_local(&self) -> Result<Vec<MetricEntry>> {
        let entries = self.local_lister.list(&self.local_node).await?;
        Ok(self.filter.apply(entries))
    }

    /// List the local node and every peer.
    ///
    /// A failure to list the local node is returned; a failure to list a peer
    /// is recorded in the snapshot and does not stop the others.
    pub async fn collect(&self, peers: &[Node]) -> Result<InventorySnapshot> {
        let mut snapshot = InventorySnapshot::default();

        for entry in self.list_local().await? {
            snapshot.insert_local(entry);
        }
        info!(node = %self.local_node, metrics = snapshot.local_count(), "Listed local metrics");

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();
        for node in peers.iter().cloned() {
            let lister = self.remote_lister.clone();
            let timeout = self.list_timeout;
            let semaphore = semaphore.clone();
            let metrics = self.metrics.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let started = std::time::Instant::now();
                let result = list_with_timeout(lister.as_ref(), &node, timeout).await;
                metrics.listing_duration.observe_duration(started.elapsed());
                (node, result)
            });
        }

        let total = peers.len();
        let mut done = 0;
        while let Some(joined) = tasks.join_next().await {
            let (node, result) = joined.map_err(|e| Error::Io(std::io::Error::other(e)))?;
            done += 1;
            match result {
                Ok(entries) => {
                    for entry in self.filter.apply(entries) {
                        snapshot.insert_peer(&node.id, entry);
                    }
                    info!(
                        node = %node,
                        metrics = snapshot.peer_count(&node.id),
                        "Listed remote metrics ({}/{})",
                        done,
                        total
                    );
                    self.metrics.nodes_listed.inc();
                }
                Err(e) => {
                    warn!(node = %node, error = %e, "Failed to list node");
                    self.metrics.nodes_unreachable.inc();
                    snapshot.mark_unreachable(&node.id, e.to_string());
                }
            }
        }

        debug!(
            peers = total,
            unreachable = snapshot.unreachable().len(),
            "Inventory complete"
        );

        Ok(snapshot)
    }
}

/// Run a listing call, converting expiry and transport failures into
/// [`Error::NodeUnreachable`].
async fn list_with_timeout(
    lister: &dyn MetricLister,
    node: &Node,
    timeout: Duration,
) -> Result<Vec<MetricEntry>> {
    match tokio::time::timeout(timeout, lister.list(node)).await {
        Ok(Ok(entries)) => Ok(entries),
        Ok(Err(Error::NodeUnreachable { node, reason })) => {
            Err(Error::NodeUnreachable { node, reason })
        }
        Ok(Err(e)) => Err(Error::unreachable(&node.id, e.to_string())),
        Err(_) => Err(Error::unreachable(
            &node.id,
            Error::Timeout(timeout).to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeLister;

    fn inventory(lister: Arc<FakeLister>) -> MetricInventory {
        let filter = ExclusionFilter::new(DEFAULT_EXCLUDE).unwrap();
        MetricInventory::new(Node::new("local"), lister.clone(), lister, filter)
    }

    #[tokio::test]
    async fn test_exclusion_applies_to_both_sides() {
        let lister = Arc::new(FakeLister::new());
        lister.set(
            "local",
            vec![
                MetricEntry::new("carbon.agents.local", 1, 1),
                MetricEntry::new("app.a", 1, 1),
            ],
        );
        lister.set(
            "peer",
            vec![
                MetricEntry::new("carbon.agents.peer", 1, 1),
                MetricEntry::new("app.b", 1, 1),
            ],
        );

        let snapshot = inventory(lister).collect(&[Node::new("peer")]).await.unwrap();

        let mut names: Vec<_> = snapshot.metric_names().collect();
        names.sort();
        assert_eq!(names, vec!["app.a", "app.b"]);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_scoped() {
        let lister = Arc::new(FakeLister::new());
        lister.set("local", vec![]);
        lister.set("up", vec![MetricEntry::new("app.a", 1, 1)]);
        lister.fail("down");

        let snapshot = inventory(lister)
            .collect(&[Node::new("up"), Node::new("down")])
            .await
            .unwrap();

        assert_eq!(snapshot.peer_count("up"), 1);
        assert_eq!(snapshot.peer_count("down"), 0);
        assert!(snapshot.unreachable().contains_key("down"));
    }

    #[tokio::test]
    async fn test_local_failure_is_returned() {
        let lister = Arc::new(FakeLister::new());
        lister.fail("local");

        let result = inventory(lister).collect(&[]).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_timeout_marks_node_unreachable() {
        let lister = Arc::new(FakeLister::new());
        lister.set("local", vec![]);
        lister.set("slow", vec![MetricEntry::new("app.a", 1, 1)]);
        lister.delay("slow", Duration::from_secs(60));

        let inventory = inventory(lister).with_list_timeout(Duration::from_secs(1));
        let snapshot = inventory.collect(&[Node::new("slow")]).await.unwrap();
        assert!(snapshot.unreachable()["slow"].contains("timed out"));
        assert_eq!(snapshot.peer_count("slow"), 0);
    }
}
