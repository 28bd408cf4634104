//! In-memory listers and transfer facilities.

use crate::error::{Error, Result};
use crate::inventory::MetricLister;
use crate::sync::{TransferFacility, TransferMode, TransferRequest};
use crate::types::{path_to_metric, MetricEntry, Node, NodeId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// A [`MetricLister`] serving listings from memory.
///
/// Nodes without a listing return an empty one.
#[derive(Debug, Default)]
pub struct FakeLister {
    listings: Mutex<HashMap<NodeId, BTreeMap<String, MetricEntry>>>,
    failing: Mutex<HashSet<NodeId>>,
    delays: Mutex<HashMap<NodeId, Duration>>,
}

impl FakeLister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a node's listing.
    pub fn set(&self, node: &str, entries: Vec<MetricEntry>) {
        let entries = entries.into_iter().map(|e| (e.name.clone(), e)).collect();
        self.listings.lock().insert(node.to_string(), entries);
    }

    /// Add or replace one metric on a node.
    pub fn upsert(&self, node: &str, entry: MetricEntry) {
        self.listings
            .lock()
            .entry(node.to_string())
            .or_default()
            .insert(entry.name.clone(), entry);
    }

    /// A node's current listing, ordered by name.
    pub fn entries(&self, node: &str) -> Vec<MetricEntry> {
        self.listings
            .lock()
            .get(node)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Look up one metric on a node.
    pub fn get(&self, node: &str, metric: &str) -> Option<MetricEntry> {
        self.listings.lock().get(node)?.get(metric).cloned()
    }

    /// Make listing `node` fail.
    pub fn fail(&self, node: &str) {
        self.failing.lock().insert(node.to_string());
    }

    /// Make listing `node` take `delay`.
    pub fn delay(&self, node: &str, delay: Duration) {
        self.delays.lock().insert(node.to_string(), delay);
    }
}

#[async_trait]
impl MetricLister for FakeLister {
    async fn list(&self, node: &Node) -> Result<Vec<MetricEntry>> {
        let delay = self.delays.lock().get(&node.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(&node.id) {
            return Err(Error::unreachable(&node.id, "connection refused"));
        }
        Ok(self.entries(&node.id))
    }
}

/// A [`TransferFacility`] that records requests.
///
/// When backed by a [`FakeLister`], successful requests copy the source's
/// entries to the destination the way `rsync --archive` would, honouring the
/// request mode.
#[derive(Debug, Default)]
pub struct FakeTransfer {
    calls: Mutex<Vec<TransferRequest>>,
    failing_sources: Mutex<HashSet<NodeId>>,
    delay: Mutex<Option<Duration>>,
    storage: Option<Arc<FakeLister>>,
}

impl FakeTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy entries inside `storage` on success.
    pub fn backed_by(storage: Arc<FakeLister>) -> Self {
        Self {
            storage: Some(storage),
            ..Self::default()
        }
    }

    /// Fail every request reading from `node`.
    pub fn fail_source(&self, node: &str) {
        self.failing_sources.lock().insert(node.to_string());
    }

    /// Make every request take `delay`.
    pub fn delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Requests received so far, in arrival order.
    pub fn calls(&self) -> Vec<TransferRequest> {
        self.calls.lock().clone()
    }

    fn apply(&self, storage: &FakeLister, request: &TransferRequest) {
        for path in &request.paths {
            let Some(metric) = path_to_metric(path) else {
                continue;
            };
            let Some(source) = storage.get(&request.source.id, &metric) else {
                continue;
            };
            let replace = match (request.mode, storage.get(&request.destination.id, &metric)) {
                (_, None) | (TransferMode::ForceOverwrite, Some(_)) => true,
                (TransferMode::UpdateOnly, Some(existing)) => source.mtime > existing.mtime,
            };
            if replace {
                storage.upsert(&request.destination.id, source);
            }
        }
    }
}

#[async_trait]
impl TransferFacility for FakeTransfer {
    async fn transfer(&self, request: &TransferRequest) -> Result<()> {
        self.calls.lock().push(request.clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing_sources.lock().contains(&request.source.id) {
            return Err(Error::TransferFailure {
                status: Some(23),
                output: format!(
                    "rsync: some files could not be transferred from {}",
                    request.source
                ),
            });
        }

        if let Some(storage) = &self.storage {
            self.apply(storage, request);
        }
        Ok(())
    }
}
