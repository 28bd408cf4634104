//! Carbon-compatible consistent hashing.
//!
//! The ring places metrics exactly like carbon's `ConsistentHashingRouter`,
//! so ownership computed here matches where the relays actually write.
//!
//! Every destination `(host, instance)` contributes [`REPLICAS_PER_INSTANCE`]
//! positions in a 16-bit space. With `carbon_ch` the position of a key is the
//! first two bytes of its MD5 digest and replica `i` of a destination is keyed
//! `"('host', 'instance'):i"` (the Python repr of the tuple). With `fnv1a_ch`
//! the position is the folded FNV-1a hash and replica `i` is keyed
//! `"i-instance"`. A replica landing on a taken position moves up by one
//! until it finds a free slot.
//!
//! The ring is an immutable value: a sorted array of positions, each mapped
//! to one destination. A topology change builds a new ring.

use crate::error::{Error, Result};
use crate::types::{Node, NodeId};
use md5::{Digest, Md5};
use serde::Deserialize;
use std::collections::HashSet;

/// Positions per destination, as in carbon.
pub const REPLICAS_PER_INSTANCE: usize = 100;

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// Hash function of the ring, named as in carbon's `ROUTER_HASH_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum HashType {
    /// MD5-based ring, carbon's default.
    #[default]
    #[serde(rename = "carbon_ch")]
    CarbonCh,
    /// FNV-1a ring keyed on instance names only.
    #[serde(rename = "fnv1a_ch")]
    Fnv1aCh,
}

impl HashType {
    /// Position of a key on the ring.
    pub fn position(self, key: &str) -> u32 {
        match self {
            HashType::CarbonCh => {
                let digest = Md5::digest(key.as_bytes());
                (u32::from(digest[0]) << 8) | u32::from(digest[1])
            }
            HashType::Fnv1aCh => {
                let hash = fnv1a_32(key.as_bytes());
                (hash >> 16) ^ (hash & 0xffff)
            }
        }
    }

    /// Key of replica `replica` of the destination `(host, instance)`.
    pub fn replica_key(self, host: &str, instance: Option<&str>, replica: usize) -> String {
        match self {
            HashType::CarbonCh => format!(
                "({}, {}):{}",
                py_repr(host),
                instance.map_or_else(|| "None".to_string(), py_repr),
                replica
            ),
            HashType::Fnv1aCh => format!("{}-{}", replica, instance.unwrap_or("None")),
        }
    }
}

/// 32-bit FNV-1a.
fn fnv1a_32(data: &[u8]) -> u32 {
    let mut hash = FNV32_OFFSET_BASIS;
    for byte in data {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV32_PRIME);
    }
    hash
}

/// Python `repr()` of a string.
fn py_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// One carbon destination placed on the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingMember {
    /// Storage node (host) behind the destination.
    pub node: Node,
    /// Carbon instance name, if any.
    pub instance: Option<String>,
}

impl RingMember {
    pub fn new(node: Node, instance: Option<String>) -> Self {
        Self { node, instance }
    }
}

/// Placement settings of a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingOptions {
    /// Number of destinations each metric is written to.
    pub replication_factor: usize,
    /// Hash function.
    pub hash_type: HashType,
    /// Skip destinations on a host already chosen for the metric.
    pub diverse_replicas: bool,
}

impl RingOptions {
    /// `carbon_ch` without diverse replicas.
    pub fn new(replication_factor: usize) -> Self {
        Self {
            replication_factor,
            hash_type: HashType::default(),
            diverse_replicas: false,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    /// Index into `nodes`.
    node: usize,
    instance: Option<String>,
}

/// A consistent hash ring for distributing metrics across nodes.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Positions sorted ascending, each paired with an index into `slots`.
    positions: Vec<(u32, usize)>,

    /// Destinations in topology order.
    slots: Vec<Slot>,

    /// Distinct hosts in topology order.
    nodes: Vec<Node>,

    options: RingOptions,
}

impl HashRing {
    /// Build a `carbon_ch` ring with one destination per node and no
    /// instance names.
    pub fn new(nodes: Vec<Node>, replication_factor: usize) -> Result<Self> {
        let members = nodes.into_iter().map(|n| RingMember::new(n, None)).collect();
        Self::from_members(members, RingOptions::new(replication_factor))
    }

    /// Build a ring over carbon destinations.
    ///
    /// Fails with [`Error::Topology`] when there are no destinations or when
    /// one `(host, instance)` pair appears twice.
    pub fn from_members(members: Vec<RingMember>, options: RingOptions) -> Result<Self> {
        if members.is_empty() {
            return Err(Error::topology("ring has no nodes"));
        }

        let mut nodes: Vec<Node> = Vec::new();
        let mut slots = Vec::with_capacity(members.len());
        let mut seen = HashSet::with_capacity(members.len());
        for member in members {
            if !seen.insert((member.node.id.clone(), member.instance.clone())) {
                return Err(Error::topology(format!(
                    "duplicate destination ({}, {})",
                    member.node.id,
                    member.instance.as_deref().unwrap_or("None")
                )));
            }
            let node = match nodes.iter().position(|n| n.id == member.node.id) {
                Some(index) => index,
                None => {
                    nodes.push(member.node);
                    nodes.len() - 1
                }
            };
            slots.push(Slot {
                node,
                instance: member.instance,
            });
        }

        let mut taken = HashSet::with_capacity(slots.len() * REPLICAS_PER_INSTANCE);
        let mut positions = Vec::with_capacity(slots.len() * REPLICAS_PER_INSTANCE);
        for (index, slot) in slots.iter().enumerate() {
            let host = &nodes[slot.node].id;
            for replica in 0..REPLICAS_PER_INSTANCE {
                let key = options.hash_type.replica_key(host, slot.instance.as_deref(), replica);
                let mut position = options.hash_type.position(&key);
                while !taken.insert(position) {
                    position += 1;
                }
                positions.push((position, index));
            }
        }
        positions.sort_unstable();

        Ok(Self {
            positions,
            slots,
            nodes,
            options: RingOptions {
                replication_factor: options.replication_factor.max(1),
                ..options
            },
        })
    }

    /// Get the replication factor.
    pub fn replication_factor(&self) -> usize {
        self.options.replication_factor
    }

    /// Get the placement settings.
    pub fn options(&self) -> RingOptions {
        self.options
    }

    /// Get the number of distinct hosts in the ring.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get all hosts in topology order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Look up a host by identifier.
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Distinct destinations in ring order, starting at the metric's position.
    ///
    /// Like carbon, the walk stops one entry short of a full turn.
    fn walk<'a>(&'a self, metric: &str) -> impl Iterator<Item = usize> + 'a {
        let len = self.positions.len();
        let position = self.options.hash_type.position(metric);
        let start = self.positions.partition_point(|&(pos, _)| pos < position) % len;
        let steps = if self.slots.len() == 1 { 1 } else { len - 1 };
        let mut seen = vec![false; self.slots.len()];

        (0..steps)
            .map(move |step| self.positions[(start + step) % len].1)
            .filter(move |&slot| !std::mem::replace(&mut seen[slot], true))
            .take(self.slots.len())
    }

    /// The destinations (host, instance) carbon writes `metric` to, in order.
    ///
    /// Without diverse replicas this is the first `replication_factor`
    /// destinations on the walk, which may share a host. With them, at most
    /// one destination per host is taken.
    pub fn destinations(&self, metric: &str) -> Vec<(&Node, Option<&str>)> {
        let wanted = self.options.replication_factor;
        let mut chosen: Vec<usize> = Vec::with_capacity(wanted);
        let mut hosts: Vec<usize> = Vec::with_capacity(wanted);

        for slot in self.walk(metric) {
            let node = self.slots[slot].node;
            if self.options.diverse_replicas {
                if hosts.contains(&node) {
                    continue;
                }
                hosts.push(node);
            }
            chosen.push(slot);
            if chosen.len() >= wanted {
                break;
            }
        }

        chosen
            .into_iter()
            .map(|slot| {
                let slot = &self.slots[slot];
                (&self.nodes[slot.node], slot.instance.as_deref())
            })
            .collect()
    }

    /// Get the hosts owning a metric, primary first.
    ///
    /// Several instances on one host collapse into one owner, so a metric
    /// may have fewer owners than the replication factor.
    pub fn owners(&self, metric: &str) -> Vec<&Node> {
        let mut owners: Vec<&Node> = Vec::with_capacity(self.options.replication_factor);
        for (node, _) in self.destinations(metric) {
            if !owners.iter().any(|o| o.id == node.id) {
                owners.push(node);
            }
        }
        owners
    }

    /// Get the owner identifiers of a metric.
    pub fn owner_ids(&self, metric: &str) -> Vec<NodeId> {
        self.owners(metric).into_iter().map(|n| n.id.clone()).collect()
    }

    /// Get the primary owner of a metric.
    pub fn primary(&self, metric: &str) -> &Node {
        let slot = self.walk(metric).next().unwrap_or_default();
        &self.nodes[self.slots[slot].node]
    }

    /// Check if a node should own a metric.
    pub fn is_owner(&self, metric: &str, node_id: &str) -> bool {
        self.owners(metric).iter().any(|n| n.id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(ids: &[&str]) -> Vec<Node> {
        ids.iter().map(|id| Node::new(*id)).collect()
    }

    fn instances(pairs: &[(&str, &str)]) -> Vec<RingMember> {
        pairs
            .iter()
            .map(|(host, instance)| RingMember::new(Node::new(*host), Some(instance.to_string())))
            .collect()
    }

    fn ring_of(pairs: &[(&str, &str)], options: RingOptions) -> HashRing {
        HashRing::from_members(instances(pairs), options).unwrap()
    }

    #[test]
    fn test_empty_ring() {
        let err = HashRing::new(Vec::new(), 2).unwrap_err();
        assert!(matches!(err, Error::Topology(_)));
    }

    #[test]
    fn test_duplicate_destination() {
        let err = HashRing::new(nodes(&["a", "a"]), 2).unwrap_err();
        assert!(matches!(err, Error::Topology(_)));

        // Same host, other instance: a separate destination.
        let ring = ring_of(&[("a", "x"), ("a", "y")], RingOptions::new(1));
        assert_eq!(ring.node_count(), 1);
    }

    #[test]
    fn test_positions() {
        assert_eq!(HashType::CarbonCh.position("servers.web1.cpu"), 0x9739);
        assert_eq!(HashType::CarbonCh.position("('a', 'x'):0"), 50527);
        assert_eq!(HashType::CarbonCh.position("('a', None):0"), 30709);
        assert_eq!(HashType::CarbonCh.position("('store1', 'a'):99"), 55873);

        assert_eq!(fnv1a_32(b"0-x"), 0x9f83_697a);
        assert_eq!(HashType::Fnv1aCh.position("0-x"), 63225);
        assert_eq!(HashType::Fnv1aCh.position("servers.web1.cpu"), 16915);
    }

    #[test]
    fn test_replica_keys() {
        let carbon = HashType::CarbonCh;
        assert_eq!(carbon.replica_key("a", Some("x"), 0), "('a', 'x'):0");
        assert_eq!(carbon.replica_key("a", None, 7), "('a', None):7");
        assert_eq!(carbon.replica_key("it's", Some("x"), 1), "(\"it's\", 'x'):1");
        assert_eq!(HashType::Fnv1aCh.replica_key("a", Some("x"), 3), "3-x");
        assert_eq!(HashType::Fnv1aCh.replica_key("a", None, 3), "3-None");
    }

    #[test]
    fn test_known_placements() {
        let ring = ring_of(&[("a", "x"), ("b", "x"), ("c", "x")], RingOptions::new(2));

        assert_eq!(ring.owner_ids("servers.web1.cpu"), vec!["b", "c"]);
        assert_eq!(ring.owner_ids("carbon.agents.a.cpuUsage"), vec!["c", "b"]);
        assert_eq!(ring.owner_ids("app.requests.count"), vec!["a", "b"]);
        assert_eq!(ring.owner_ids("collectd.host1.load"), vec!["a", "c"]);

        let plain = HashRing::new(nodes(&["a", "b", "c"]), 2).unwrap();
        assert_eq!(plain.owner_ids("servers.web1.cpu"), vec!["b", "a"]);
        assert_eq!(plain.owner_ids("app.requests.count"), vec!["a", "b"]);
        assert_eq!(plain.owner_ids("collectd.host1.load"), vec!["b", "c"]);
    }

    #[test]
    fn test_instances_on_one_host() {
        let pairs = [("a", "x"), ("a", "y"), ("b", "x"), ("c", "x")];
        let ring = ring_of(&pairs, RingOptions::new(2));

        // Both replicas land on host a.
        assert_eq!(
            ring.destinations("app.requests.count")
                .into_iter()
                .map(|(n, i)| (n.id.as_str(), i))
                .collect::<Vec<_>>(),
            vec![("a", Some("y")), ("a", Some("x"))]
        );
        assert_eq!(ring.owner_ids("app.requests.count"), vec!["a"]);
        assert_eq!(ring.owner_ids("m.0"), vec!["a", "b"]);
        assert_eq!(ring.owner_ids("m.1"), vec!["c", "b"]);

        let diverse = ring_of(
            &pairs,
            RingOptions {
                diverse_replicas: true,
                ..RingOptions::new(2)
            },
        );
        assert_eq!(diverse.owner_ids("app.requests.count"), vec!["a", "b"]);
        assert_eq!(diverse.owner_ids("collectd.host1.load"), vec!["a", "c"]);
        assert_eq!(diverse.owner_ids("m.5"), vec!["a", "b"]);
    }

    #[test]
    fn test_fnv1a_placements() {
        let ring = ring_of(
            &[("a", "x"), ("b", "y")],
            RingOptions {
                hash_type: HashType::Fnv1aCh,
                ..RingOptions::new(1)
            },
        );
        assert_eq!(ring.owner_ids("servers.web1.cpu"), vec!["b"]);
        assert_eq!(ring.owner_ids("app.requests.count"), vec!["a"]);
        assert_eq!(ring.positions[..3], [(1588, 0), (1735, 1), (2298, 1)]);
    }

    #[test]
    fn test_position_collisions_move_up() {
        let pairs = [("store1", "a"), ("store2", "a"), ("store3", "a"), ("store4", "a")];
        let ring = ring_of(&pairs, RingOptions::new(1));

        assert_eq!(ring.positions.len(), 4 * REPLICAS_PER_INSTANCE);
        assert!(ring.positions.windows(2).all(|w| w[0].0 < w[1].0));
        // Replicas 19 and 25 of store2 both hash to 15439.
        assert!(ring.positions.contains(&(15439, 1)));
        assert!(ring.positions.contains(&(15440, 1)));
    }

    #[test]
    fn test_single_node() {
        let ring = HashRing::new(nodes(&["a"]), 2).unwrap();

        assert_eq!(ring.node_count(), 1);
        assert_eq!(ring.primary("key").id, "a");
        assert_eq!(ring.owner_ids("key"), vec!["a".to_string()]);
    }

    #[test]
    fn test_deterministic() {
        let ring = HashRing::new(nodes(&["a", "b", "c", "d"]), 3).unwrap();
        let rebuilt = HashRing::new(nodes(&["a", "b", "c", "d"]), 3).unwrap();

        // Fixed across builds and processes.
        assert_eq!(ring.owner_ids("servers.web1.cpu"), vec!["b", "a", "d"]);
        assert_eq!(ring.owner_ids("app.requests.count"), vec!["a", "b", "c"]);

        for i in 0..500 {
            let metric = format!("app.host{}.requests", i);
            let first = ring.owner_ids(&metric);
            assert_eq!(first, ring.owner_ids(&metric));
            assert_eq!(first, rebuilt.owner_ids(&metric));
            assert_eq!(first[0], ring.primary(&metric).id);
        }
    }

    #[test]
    fn test_replication_completeness() {
        let ring = HashRing::new(nodes(&["a", "b", "c", "d", "e"]), 3).unwrap();
        for i in 0..500 {
            let owners = ring.owner_ids(&format!("m.{}", i));
            assert_eq!(owners.len(), 3);
            let unique: HashSet<_> = owners.iter().collect();
            assert_eq!(unique.len(), 3);
        }

        // Fewer nodes than replicas: every node owns everything.
        let small = HashRing::new(nodes(&["a", "b"]), 3).unwrap();
        for i in 0..100 {
            let mut owners = small.owner_ids(&format!("m.{}", i));
            owners.sort();
            assert_eq!(owners, vec!["a".to_string(), "b".to_string()]);
        }
    }

    #[test]
    fn test_adding_a_node_only_moves_metrics_onto_it() {
        let ring = HashRing::new(nodes(&["a", "b", "c"]), 1).unwrap();
        let grown = HashRing::new(nodes(&["a", "b", "c", "d"]), 1).unwrap();

        for i in 0..1000 {
            let metric = format!("metric.{}", i);
            let before = ring.primary(&metric).id.clone();
            let after = grown.primary(&metric).id.clone();
            assert!(before == after || after == "d");
        }
    }

    #[test]
    fn test_ownership_check() {
        let ring = HashRing::new(nodes(&["a", "b"]), 2).unwrap();
        let primary = ring.primary("test.metric").id.clone();

        assert!(ring.is_owner("test.metric", &primary));
        assert!(!ring.is_owner("test.metric", "z"));
    }
}
