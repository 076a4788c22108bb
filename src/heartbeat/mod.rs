//! Background topology tracking for primary/standby clusters
//!
//! This module provides:
//! - `HeartbeatEngine`: live `master -> standbys` edges plus failover records
//! - Three passes per tick: master probing, failed-master recovery,
//!   failed-cluster rediscovery
//! - `ClusterNodeCache`: the periodic loop that drives the engine
//!
//! Every probe runs without holding a lock; locks are taken only to snapshot
//! state and to publish results.

mod failure_cluster;
mod failure_master;
mod master;
mod node_cache;
mod probe;

pub use node_cache::{ClusterNodeCache, DEFAULT_HEARTBEAT_PERIOD};
pub use probe::Prober;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::connector::{ConnectionTracker, Connector};
use crate::host::{ConnectionProperties, HostSpec, HostStatusRegistry};

/// A cluster that lost its primary and has no confirmed replacement yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCluster {
    pub former_master: HostSpec,
    pub standbys: BTreeSet<HostSpec>,
    pub properties: Vec<ConnectionProperties>,
    pub created_at_millis: u64,
}

/// Point-in-time copy of the engine state
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    pub edges: BTreeMap<HostSpec, BTreeSet<HostSpec>>,
    pub redirects: BTreeMap<HostSpec, HostSpec>,
    pub failure_clusters: Vec<FailureCluster>,
}

/// Tracks primaries and reacts to failover
///
/// Each collection has its own lock so the passes do not serialize on a
/// single global lock.
pub struct HeartbeatEngine {
    prober: Prober,
    tracker: Arc<dyn ConnectionTracker>,
    /// master -> standbys; a standby set never contains its own key
    edges: Mutex<HashMap<HostSpec, BTreeSet<HostSpec>>>,
    /// failed master -> promoted replacement
    failure_masters: Mutex<HashMap<HostSpec, HostSpec>>,
    failure_clusters: Mutex<Vec<FailureCluster>>,
}

impl HeartbeatEngine {
    pub fn new(
        connector: Arc<dyn Connector>,
        status: Arc<HostStatusRegistry>,
        tracker: Arc<dyn ConnectionTracker>,
    ) -> Self {
        Self {
            prober: Prober::new(connector, status),
            tracker,
            edges: Mutex::new(HashMap::new()),
            failure_masters: Mutex::new(HashMap::new()),
            failure_clusters: Mutex::new(Vec::new()),
        }
    }

    pub fn prober(&self) -> &Prober {
        &self.prober
    }

    /// Start tracking a verified primary and the other hosts of its cluster
    pub fn register(&self, master: &HostSpec, hosts: &[HostSpec], props: &ConnectionProperties) {
        self.prober.add_properties(master, props);
        for host in hosts {
            self.prober.add_properties(host, props);
        }

        // The caller verified `master` is primary, so any redirect away from it is stale
        self.failure_masters.lock().remove(master);
        self.failure_clusters
            .lock()
            .retain(|c| c.former_master != *master && !c.standbys.contains(master));

        let mut edges = self.edges.lock();
        let standbys = edges.entry(master.clone()).or_default();
        standbys.extend(hosts.iter().filter(|h| *h != master).cloned());
        debug!(master = %master, standbys = standbys.len(), "Registered cluster for heartbeat");
    }

    /// Run one tick: all three passes
    pub async fn tick(&self) {
        tokio::join!(
            self.check_failure_masters(),
            self.probe_masters(),
            self.check_failure_clusters(),
        );
    }

    /// Follow failover redirects from `host` to the current primary
    pub fn resolve_master(&self, host: &HostSpec) -> HostSpec {
        follow_redirects(&self.failure_masters.lock(), host)
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        TopologySnapshot {
            edges: self
                .edges
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            redirects: self
                .failure_masters
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            failure_clusters: self.failure_clusters.lock().clone(),
        }
    }

    /// Drop every edge, redirect, pending cluster and credential set
    pub fn clear(&self) {
        self.edges.lock().clear();
        self.failure_masters.lock().clear();
        self.failure_clusters.lock().clear();
        self.prober.clear();
        info!("Heartbeat state cleared");
    }

    /// Record `failed -> promoted`
    ///
    /// `promoted` was just verified as primary, so its own redirect is dropped;
    /// with that, a new record can never close a cycle.
    fn add_redirect(&self, failed: &HostSpec, promoted: &HostSpec) {
        if failed == promoted {
            return;
        }
        let mut redirects = self.failure_masters.lock();
        redirects.remove(promoted);
        redirects.insert(failed.clone(), promoted.clone());
    }

    /// Fold `hosts` into the standby set of `master`
    fn merge_standbys<'a>(&self, master: &HostSpec, hosts: impl IntoIterator<Item = &'a HostSpec>) {
        let mut edges = self.edges.lock();
        let standbys = edges.entry(master.clone()).or_default();
        standbys.extend(hosts.into_iter().filter(|h| *h != master).cloned());
    }

    fn park_failure_cluster(&self, former_master: &HostSpec, standbys: BTreeSet<HostSpec>) {
        let properties = self.prober.properties_for(former_master);
        let mut clusters = self.failure_clusters.lock();
        if clusters.iter().any(|c| c.former_master == *former_master) {
            return;
        }
        clusters.push(FailureCluster {
            former_master: former_master.clone(),
            standbys,
            properties,
            created_at_millis: now_millis(),
        });
    }
}

/// Follow redirects until a host without one, a self-mapping, or a revisit
pub(crate) fn follow_redirects(redirects: &HashMap<HostSpec, HostSpec>, start: &HostSpec) -> HostSpec {
    let mut current = start.clone();
    let mut visited = HashSet::new();
    visited.insert(current.clone());

    while let Some(next) = redirects.get(&current) {
        if *next == current || !visited.insert(next.clone()) {
            break;
        }
        current = next.clone();
    }
    current
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
