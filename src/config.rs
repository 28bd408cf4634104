//! Configuration types for the synchronizer.
//!
//! Clusters come from a TOML file listing each cluster's carbon destinations:
//!
//! ```toml
//! [clusters.main]
//! destinations = ["store1:2004:a", "store2:2004:a"]
//! replication_factor = 2
//! hash_type = "carbon_ch"
//! diverse_replicas = false
//! ssh_user = "graphite"
//! ```
//!
//! Everything else comes from the command line. Both are resolved into one
//! [`SyncConfig`], validated once by [`SyncConfigBuilder::build`] and then
//! only read.

use crate::error::{Error, Result};
use crate::inventory::{ExclusionFilter, DEFAULT_EXCLUDE};
use crate::partitioning::{HashRing, HashType, RingMember, RingOptions};
use crate::sync::{
    Batcher, TimeWindow, DEFAULT_BATCH_SIZE, DEFAULT_MAX_PARALLEL, DEFAULT_TRANSFER_TIMEOUT,
};
use crate::types::{Node, NodeId, NodeRole, Timestamp};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default whisper storage directory on every node.
pub const DEFAULT_STORAGE_DIR: &str = "/opt/graphite/storage/whisper";

/// Default configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "/opt/graphite/conf/carbonate.toml";

/// Default timeout of one node listing.
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(300);

/// Default ssh options, replaceable from the command line.
pub const DEFAULT_SSH_OPTIONS: &[&str] = &[
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "Compression=no",
];

/// Default rsync options, replaceable from the command line.
///
/// `--update`, `--ignore-times` and `--modify-window` are managed per batch
/// by the transfer mode.
pub const DEFAULT_RSYNC_OPTIONS: &[&str] = &["--archive", "--sparse", "--update"];

fn default_replication_factor() -> usize {
    1
}

/// A parsed carbon destination, `host[:port[:instance]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: Option<u16>,
    pub instance: Option<String>,
}

impl Destination {
    /// Parse a destination. IPv6 hosts must be bracketed (`[::1]:2004:a`).
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, rest) = match s.strip_prefix('[') {
            Some(bracketed) => {
                let (host, rest) = bracketed.split_once(']').ok_or_else(|| {
                    Error::config(format!("unterminated '[' in destination '{}'", s))
                })?;
                (host, rest.strip_prefix(':').unwrap_or(rest))
            }
            None => s.split_once(':').unwrap_or((s, "")),
        };

        if host.is_empty() {
            return Err(Error::config(format!("destination '{}' has no host", s)));
        }

        let mut parts = rest.splitn(2, ':');
        let port = match parts.next().filter(|p| !p.is_empty()) {
            Some(p) => Some(
                p.parse::<u16>()
                    .map_err(|_| Error::config(format!("invalid port in destination '{}'", s)))?,
            ),
            None => None,
        };
        let instance = parts.next().filter(|i| !i.is_empty()).map(str::to_string);

        Ok(Self {
            host: host.to_string(),
            port,
            instance,
        })
    }
}

/// Topology of one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Cluster name.
    pub name: String,

    /// Carbon destinations in configuration order.
    pub destinations: Vec<String>,

    /// Number of destinations each metric is written to.
    pub replication_factor: usize,

    /// Ring hash function of the relays.
    pub hash_type: HashType,

    /// Whether the relays spread replicas over distinct hosts.
    pub diverse_replicas: bool,

    /// User to ssh as on this cluster's nodes.
    pub ssh_user: Option<String>,
}

impl ClusterConfig {
    /// Create a cluster with replication factor 1.
    pub fn new<I, S>(name: impl Into<String>, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            destinations: destinations.into_iter().map(Into::into).collect(),
            replication_factor: default_replication_factor(),
            hash_type: HashType::default(),
            diverse_replicas: false,
            ssh_user: None,
        }
    }

    pub fn with_replication_factor(mut self, replication_factor: usize) -> Self {
        self.replication_factor = replication_factor;
        self
    }

    pub fn with_hash_type(mut self, hash_type: HashType) -> Self {
        self.hash_type = hash_type;
        self
    }

    pub fn with_diverse_replicas(mut self, diverse_replicas: bool) -> Self {
        self.diverse_replicas = diverse_replicas;
        self
    }

    pub fn with_ssh_user(mut self, user: impl Into<String>) -> Self {
        self.ssh_user = Some(user.into());
        self
    }

    fn node(&self, host: String) -> Node {
        let node = Node::new(host);
        match &self.ssh_user {
            Some(user) => node.with_ssh_user(user.clone()),
            None => node,
        }
    }

    /// Nodes of the cluster, one per distinct host, in destination order.
    ///
    /// Several carbon instances on one host share its storage directory, so
    /// they collapse into a single node.
    pub fn nodes(&self) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = Vec::new();
        for destination in &self.destinations {
            let destination = Destination::parse(destination)?;
            if nodes.iter().any(|n| n.id == destination.host) {
                continue;
            }
            nodes.push(self.node(destination.host));
        }
        Ok(nodes)
    }

    /// Ring members, one per destination, with their instance names.
    pub fn members(&self) -> Result<Vec<RingMember>> {
        self.destinations
            .iter()
            .map(|destination| {
                let destination = Destination::parse(destination)?;
                Ok(RingMember::new(self.node(destination.host), destination.instance))
            })
            .collect()
    }

    /// Build the cluster's ring.
    pub fn ring(&self) -> Result<HashRing> {
        self.ring_of(self.members()?)
    }

    fn ring_of(&self, members: Vec<RingMember>) -> Result<HashRing> {
        if self.replication_factor == 0 {
            return Err(Error::config(format!(
                "cluster '{}': replication factor must be at least 1",
                self.name
            )));
        }
        let options = RingOptions {
            replication_factor: self.replication_factor,
            hash_type: self.hash_type,
            diverse_replicas: self.diverse_replicas,
        };
        HashRing::from_members(members, options).map_err(|e| match e {
            Error::Topology(msg) => Error::topology(format!("cluster '{}': {}", self.name, msg)),
            other => other,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClusterEntry {
    destinations: Vec<String>,
    #[serde(default = "default_replication_factor")]
    replication_factor: usize,
    #[serde(default)]
    hash_type: HashType,
    #[serde(default)]
    diverse_replicas: bool,
    #[serde(default)]
    ssh_user: Option<String>,
}

/// The clusters declared in a configuration file.
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    clusters: BTreeMap<String, ClusterEntry>,
}

impl ConfigFile {
    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Names of the declared clusters.
    pub fn cluster_names(&self) -> impl Iterator<Item = &str> {
        self.clusters.keys().map(String::as_str)
    }

    /// Look up a cluster. Unknown names are a configuration error.
    pub fn cluster(&self, name: &str) -> Result<ClusterConfig> {
        let entry = self
            .clusters
            .get(name)
            .ok_or_else(|| {
                let known: Vec<_> = self.cluster_names().collect();
                Error::config(format!(
                    "unknown cluster '{}' (known: {})",
                    name,
                    known.join(", ")
                ))
            })?;
        Ok(ClusterConfig {
            name: name.to_string(),
            destinations: entry.destinations.clone(),
            replication_factor: entry.replication_factor,
            hash_type: entry.hash_type,
            diverse_replicas: entry.diverse_replicas,
            ssh_user: entry.ssh_user.clone(),
        })
    }
}

/// Fully resolved configuration of one run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    local_cluster: ClusterConfig,
    remote_cluster: Option<ClusterConfig>,
    local_node: NodeId,
    storage_dir: PathBuf,
    batch_size: NonZeroUsize,
    start_time: Timestamp,
    end_time: Option<Timestamp>,
    overwrite: bool,
    exclude: Vec<String>,
    ssh_options: Vec<String>,
    rsync_options: Vec<String>,
    max_parallel: usize,
    transfer_timeout: Duration,
    list_timeout: Duration,
}

impl SyncConfig {
    /// Start building a configuration.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    pub fn local_cluster(&self) -> &ClusterConfig {
        &self.local_cluster
    }

    /// The peer cluster, or `None` when syncing inside the local cluster.
    pub fn remote_cluster(&self) -> Option<&ClusterConfig> {
        self.remote_cluster.as_ref()
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    pub fn ssh_options(&self) -> &[String] {
        &self.ssh_options
    }

    pub fn rsync_options(&self) -> &[String] {
        &self.rsync_options
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn transfer_timeout(&self) -> Duration {
        self.transfer_timeout
    }

    pub fn list_timeout(&self) -> Duration {
        self.list_timeout
    }

    /// The local node, marked [`NodeRole::Local`].
    pub fn local_node(&self) -> Result<Node> {
        self.local_cluster
            .nodes()?
            .into_iter()
            .find(|n| n.id == self.local_node)
            .map(|n| n.with_role(NodeRole::Local))
            .ok_or_else(|| {
                Error::config(format!(
                    "node '{}' is not part of cluster '{}'",
                    self.local_node, self.local_cluster.name
                ))
            })
    }

    /// Ring of the local cluster, with the local node marked.
    pub fn local_ring(&self) -> Result<HashRing> {
        let local = self.local_node()?;
        let members = self
            .local_cluster
            .members()?
            .into_iter()
            .map(|m| {
                if m.node.id == local.id {
                    RingMember::new(local.clone(), m.instance)
                } else {
                    m
                }
            })
            .collect();
        self.local_cluster.ring_of(members)
    }

    /// Ring of the peer cluster, if one is configured.
    pub fn remote_ring(&self) -> Result<Option<HashRing>> {
        self.remote_cluster.as_ref().map(ClusterConfig::ring).transpose()
    }

    /// Nodes to list for supplies: the peer cluster's nodes, or the local
    /// cluster's other nodes.
    pub fn peers(&self) -> Result<Vec<Node>> {
        let cluster = self.remote_cluster.as_ref().unwrap_or(&self.local_cluster);
        Ok(cluster
            .nodes()?
            .into_iter()
            .filter(|n| n.id != self.local_node)
            .collect())
    }

    /// Compiled exclusion patterns.
    pub fn exclusion_filter(&self) -> Result<ExclusionFilter> {
        ExclusionFilter::new(&self.exclude)
    }

    /// The time window, reading the wall clock when no end was given.
    pub fn time_window(&self) -> Result<TimeWindow> {
        match self.end_time {
            Some(end) => TimeWindow::new(self.start_time, end),
            None => TimeWindow::until_now(self.start_time),
        }
    }

    pub fn batcher(&self) -> Batcher {
        Batcher::new(self.batch_size)
    }
}

/// Builder for [`SyncConfig`].
#[derive(Debug, Clone)]
pub struct SyncConfigBuilder {
    local_cluster: Option<ClusterConfig>,
    remote_cluster: Option<ClusterConfig>,
    local_node: Option<NodeId>,
    storage_dir: PathBuf,
    batch_size: usize,
    start_time: Timestamp,
    end_time: Option<Timestamp>,
    overwrite: bool,
    exclude: Vec<String>,
    ssh_options: Vec<String>,
    rsync_options: Vec<String>,
    max_parallel: usize,
    transfer_timeout: Duration,
    list_timeout: Duration,
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self {
            local_cluster: None,
            remote_cluster: None,
            local_node: None,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            batch_size: DEFAULT_BATCH_SIZE,
            start_time: 0,
            end_time: None,
            overwrite: false,
            exclude: DEFAULT_EXCLUDE.iter().map(|s| s.to_string()).collect(),
            ssh_options: DEFAULT_SSH_OPTIONS.iter().map(|s| s.to_string()).collect(),
            rsync_options: DEFAULT_RSYNC_OPTIONS.iter().map(|s| s.to_string()).collect(),
            max_parallel: DEFAULT_MAX_PARALLEL,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            list_timeout: DEFAULT_LIST_TIMEOUT,
        }
    }
}

impl SyncConfigBuilder {
    pub fn local_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.local_cluster = Some(cluster);
        self
    }

    /// Set the peer cluster. A cluster with the local cluster's name is
    /// treated as no peer cluster at all.
    pub fn remote_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.remote_cluster = Some(cluster);
        self
    }

    pub fn local_node(mut self, node: impl Into<NodeId>) -> Self {
        self.local_node = Some(node.into());
        self
    }

    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn start_time(mut self, start: Timestamp) -> Self {
        self.start_time = start;
        self
    }

    pub fn end_time(mut self, end: Timestamp) -> Self {
        self.end_time = Some(end);
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn exclude(mut self, patterns: Vec<String>) -> Self {
        self.exclude = patterns;
        self
    }

    pub fn ssh_options(mut self, options: Vec<String>) -> Self {
        self.ssh_options = options;
        self
    }

    pub fn rsync_options(mut self, options: Vec<String>) -> Self {
        self.rsync_options = options;
        self
    }

    pub fn max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<SyncConfig> {
        let local_cluster = self
            .local_cluster
            .ok_or_else(|| Error::config("no local cluster given"))?;
        let local_node = self
            .local_node
            .ok_or_else(|| Error::config("no local node given"))?;
        let batch_size = NonZeroUsize::new(self.batch_size)
            .ok_or_else(|| Error::config("batch size must be greater than 0"))?;
        if self.max_parallel == 0 {
            return Err(Error::config("max parallel must be greater than 0"));
        }
        if let Some(end) = self.end_time {
            TimeWindow::new(self.start_time, end)?;
        }
        ExclusionFilter::new(&self.exclude)?;

        let remote_cluster = self
            .remote_cluster
            .filter(|remote| remote.name != local_cluster.name);

        let config = SyncConfig {
            local_cluster,
            remote_cluster,
            local_node,
            storage_dir: self.storage_dir,
            batch_size,
            start_time: self.start_time,
            end_time: self.end_time,
            overwrite: self.overwrite,
            exclude: self.exclude,
            ssh_options: self.ssh_options,
            rsync_options: self.rsync_options,
            max_parallel: self.max_parallel,
            transfer_timeout: self.transfer_timeout,
            list_timeout: self.list_timeout,
        };

        // Topology must resolve before anything runs.
        config.local_ring()?;
        config.remote_ring()?;

        Ok(config)
    }
}
