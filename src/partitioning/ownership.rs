//! Metric ownership and transfer planning.
//!
//! Combines ring lookups with node inventories to decide which metrics the
//! local node must pull, and from where.

use crate::inventory::InventorySnapshot;
use crate::partitioning::hashring::HashRing;
use crate::sync::TransferItem;
use crate::types::{MetricEntry, Node, NodeId};
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// Role of a node for a specific metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipRole {
    /// Primary owner - first replica in ring order.
    Primary,
    /// Backup owner - holds a replica for fault tolerance.
    Backup,
    /// Not an owner - should not hold this metric.
    None,
}

/// Ownership information for a metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricOwnership {
    /// Primary owner node.
    pub primary: NodeId,

    /// Backup nodes (in order of preference).
    pub backups: Vec<NodeId>,
}

impl MetricOwnership {
    /// Resolve ownership of `metric` on `ring`.
    pub fn resolve(ring: &HashRing, metric: &str) -> Self {
        let mut owners = ring.owner_ids(metric).into_iter();
        // A ring always has at least one node.
        let primary = owners.next().unwrap_or_default();
        Self {
            primary,
            backups: owners.collect(),
        }
    }

    /// Get the role of a node for this metric.
    pub fn role(&self, node_id: &str) -> OwnershipRole {
        if self.primary == node_id {
            OwnershipRole::Primary
        } else if self.backups.iter().any(|b| b == node_id) {
            OwnershipRole::Backup
        } else {
            OwnershipRole::None
        }
    }
}

/// Computes the transfer set for the local node.
#[derive(Debug)]
pub struct OwnershipPlanner<'a> {
    /// The node being synchronized.
    local_node: &'a Node,

    /// Ring of the local node's cluster.
    local_ring: &'a HashRing,

    /// Ring of the peer cluster, when syncing from another cluster.
    remote_ring: Option<&'a HashRing>,

    /// Whether differing local copies may be replaced.
    overwrite: bool,
}

impl<'a> OwnershipPlanner<'a> {
    /// Create a planner.
    pub fn new(
        local_node: &'a Node,
        local_ring: &'a HashRing,
        remote_ring: Option<&'a HashRing>,
        overwrite: bool,
    ) -> Self {
        Self {
            local_node,
            local_ring,
            remote_ring,
            overwrite,
        }
    }

    /// Role of the local node for a metric in its own cluster.
    pub fn local_role(&self, metric: &str) -> OwnershipRole {
        MetricOwnership::resolve(self.local_ring, metric).role(&self.local_node.id)
    }

    /// Nodes that should supply `metric`, in replica priority order.
    pub fn suppliers(&self, metric: &str) -> Vec<&'a Node> {
        let ring = self.remote_ring.unwrap_or(self.local_ring);
        ring.owners(metric)
            .into_iter()
            .filter(|n| n.id != self.local_node.id)
            .collect()
    }

    /// Compute the transfer set.
    ///
    /// Items are produced in metric-name order. Metrics the local node does
    /// not own are ignored, whether or not it holds a copy.
    pub fn plan(&self, inventory: &InventorySnapshot) -> Vec<TransferItem> {
        let names: BTreeSet<&str> = inventory.metric_names().collect();
        let mut items = Vec::new();
        let mut not_owned = 0usize;

        for metric in names {
            if self.local_role(metric) == OwnershipRole::None {
                not_owned += 1;
                continue;
            }

            let local = inventory.local(metric);
            if let Some(item) = self.plan_metric(metric, local, inventory) {
                trace!(
                    metric,
                    source = %item.source,
                    overwrite = item.overwrite,
                    "Planned transfer"
                );
                items.push(item);
            }
        }

        debug!(
            local_node = %self.local_node,
            planned = items.len(),
            not_owned,
            "Computed ownership plan"
        );

        items
    }

    fn plan_metric(
        &self,
        metric: &str,
        local: Option<&MetricEntry>,
        inventory: &InventorySnapshot,
    ) -> Option<TransferItem> {
        let mut holders = self
            .suppliers(metric)
            .into_iter()
            .filter_map(|node| inventory.peer(&node.id, metric).map(|entry| (node, entry)));

        let (source, entry) = if self.overwrite {
            // The first holder in ring order is authoritative.
            let (source, entry) = holders.next()?;
            match local {
                Some(local) if local.same_metadata(entry) => return None,
                _ => (source, entry),
            }
        } else {
            holders.find(|(_, entry)| match local {
                None => true,
                Some(local) => entry.mtime > local.mtime,
            })?
        };

        let item = TransferItem::pull(metric, source.clone(), self.local_node.clone(), entry.mtime);
        Some(item.with_overwrite(self.overwrite && local.is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioning::{RingMember, RingOptions};
    use crate::sync::Direction;
    use crate::types::NodeRole;

    fn ring(ids: &[&str], replicas: usize) -> HashRing {
        HashRing::new(ids.iter().map(|id| Node::new(*id)).collect(), replicas).unwrap()
    }

    fn local(id: &str) -> Node {
        Node::new(id).with_role(NodeRole::Local)
    }

    /// Find a metric whose owners on `ring` are exactly `owners`, in order.
    fn metric_owned_by(ring: &HashRing, owners: &[&str]) -> String {
        (0..100_000)
            .map(|i| format!("test.metric.{}", i))
            .find(|m| ring.owner_ids(m) == owners)
            .expect("no metric with the requested owners")
    }

    #[test]
    fn test_metric_ownership_roles() {
        let ownership = MetricOwnership {
            primary: "a".into(),
            backups: vec!["b".into()],
        };

        assert_eq!(ownership.role("a"), OwnershipRole::Primary);
        assert_eq!(ownership.role("b"), OwnershipRole::Backup);
        assert_eq!(ownership.role("c"), OwnershipRole::None);
    }

    #[test]
    fn test_non_owner_plans_nothing() {
        let ring = ring(&["a", "b", "c"], 2);
        let metric = metric_owned_by(&ring, &["b", "c"]);
        let node_a = local("a");

        let mut inventory = InventorySnapshot::default();
        inventory.insert_peer("c", MetricEntry::new(&metric, 500, 10));
        inventory.insert_peer("b", MetricEntry::new(&metric, 500, 10));

        let planner = OwnershipPlanner::new(&node_a, &ring, None, false);
        assert_eq!(planner.local_role(&metric), OwnershipRole::None);
        assert!(planner.plan(&inventory).is_empty());
    }

    #[test]
    fn test_missing_metric_is_pulled_from_peer_owner() {
        let ring = ring(&["a", "b", "c"], 2);
        let metric = metric_owned_by(&ring, &["b", "c"]);
        let node_b = local("b");

        let mut inventory = InventorySnapshot::default();
        inventory.insert_peer("c", MetricEntry::new(&metric, 500, 10));

        let planner = OwnershipPlanner::new(&node_b, &ring, None, false);
        let items = planner.plan(&inventory);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].metric, metric);
        assert_eq!(items[0].source.id, "c");
        assert_eq!(items[0].destination.id, "b");
        assert_eq!(items[0].direction, Direction::Pull);
        assert!(!items[0].overwrite);
        assert_eq!(items[0].source_mtime, 500);
    }

    #[test]
    fn test_up_to_date_metric_is_skipped() {
        let ring = ring(&["a", "b", "c"], 2);
        let metric = metric_owned_by(&ring, &["b", "c"]);
        let node_b = local("b");

        let mut inventory = InventorySnapshot::default();
        inventory.insert_local(MetricEntry::new(&metric, 500, 10));
        inventory.insert_peer("c", MetricEntry::new(&metric, 500, 10));

        let planner = OwnershipPlanner::new(&node_b, &ring, None, false);
        assert!(planner.plan(&inventory).is_empty());

        // Older remote data never replaces newer local data.
        let mut inventory = InventorySnapshot::default();
        inventory.insert_local(MetricEntry::new(&metric, 900, 10));
        inventory.insert_peer("c", MetricEntry::new(&metric, 500, 10));
        assert!(planner.plan(&inventory).is_empty());
    }

    #[test]
    fn test_primary_supplier_preferred() {
        let local_ring = ring(&["l1", "l2"], 1);
        let remote_ring = ring(&["r1", "r2", "r3"], 2);
        let node = local("l1");

        let metric = (0..100_000)
            .map(|i| format!("app.{}", i))
            .find(|m| local_ring.is_owner(m, "l1"))
            .unwrap();
        let owners = remote_ring.owner_ids(&metric);

        let mut inventory = InventorySnapshot::default();
        inventory.insert_peer(&owners[1], MetricEntry::new(&metric, 100, 1));
        inventory.insert_peer(&owners[0], MetricEntry::new(&metric, 100, 1));

        let planner = OwnershipPlanner::new(&node, &local_ring, Some(&remote_ring), false);
        let items = planner.plan(&inventory);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source.id, owners[0]);
    }

    #[test]
    fn test_overwrite_flag_on_differing_copy() {
        let ring = ring(&["a", "b"], 2);
        let node_a = local("a");
        let metric = "web.requests";

        let mut inventory = InventorySnapshot::default();
        inventory.insert_local(MetricEntry::new(metric, 900, 10));
        inventory.insert_peer("b", MetricEntry::new(metric, 500, 12));

        let without = OwnershipPlanner::new(&node_a, &ring, None, false);
        assert!(without.plan(&inventory).is_empty());

        let with = OwnershipPlanner::new(&node_a, &ring, None, true);
        let items = with.plan(&inventory);
        assert_eq!(items.len(), 1);
        assert!(items[0].overwrite);

        // Identical metadata is left alone even with overwrite.
        let mut inventory = InventorySnapshot::default();
        inventory.insert_local(MetricEntry::new(metric, 500, 12));
        inventory.insert_peer("b", MetricEntry::new(metric, 500, 12));
        assert!(with.plan(&inventory).is_empty());

        // Missing locally: pulled, nothing to overwrite.
        let mut inventory = InventorySnapshot::default();
        inventory.insert_peer("b", MetricEntry::new(metric, 500, 12));
        let items = with.plan(&inventory);
        assert_eq!(items.len(), 1);
        assert!(!items[0].overwrite);
    }

    #[test]
    fn test_instances_on_one_host_count_once() {
        let members = [("a", "x"), ("a", "y"), ("b", "x"), ("c", "x")]
            .iter()
            .map(|(h, i)| RingMember::new(Node::new(*h), Some(i.to_string())))
            .collect::<Vec<_>>();
        let ring = HashRing::from_members(members.clone(), RingOptions::new(2)).unwrap();
        let metric = "app.requests.count";

        // Both replicas live on a: b holds a stray copy and does not own it.
        let mut inventory = InventorySnapshot::default();
        inventory.insert_peer("b", MetricEntry::new(metric, 500, 10));

        let node_a = local("a");
        let planner = OwnershipPlanner::new(&node_a, &ring, None, false);
        assert_eq!(planner.local_role(metric), OwnershipRole::Primary);
        assert!(planner.suppliers(metric).is_empty());
        assert!(planner.plan(&inventory).is_empty());

        let node_b = local("b");
        let planner = OwnershipPlanner::new(&node_b, &ring, None, false);
        assert_eq!(planner.local_role(metric), OwnershipRole::None);

        // Diverse replicas spread the metric over a and b.
        let options = RingOptions {
            diverse_replicas: true,
            ..RingOptions::new(2)
        };
        let diverse = HashRing::from_members(members, options).unwrap();
        let planner = OwnershipPlanner::new(&node_a, &diverse, None, false);
        let items = planner.plan(&inventory);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source.id, "b");
    }

    #[test]
    fn test_plan_is_ordered_by_metric_name() {
        let ring = ring(&["a", "b"], 2);
        let node_a = local("a");

        let mut inventory = InventorySnapshot::default();
        for name in ["z.last", "a.first", "m.middle"] {
            inventory.insert_peer("b", MetricEntry::new(name, 1, 1));
        }

        let planner = OwnershipPlanner::new(&node_a, &ring, None, false);
        let names: Vec<_> = planner.plan(&inventory).into_iter().map(|i| i.metric).collect();
        assert_eq!(names, vec!["a.first", "m.middle", "z.last"]);
    }
}
