//! Cluster-level status for dual-cluster (disaster-recovery) configurations
//!
//! A connection string may span two independent clusters. The first logical
//! connection that discovers which one currently holds the primary publishes
//! it here, keyed by the logical URL, so later connections try that cluster
//! first.

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::host::{ClusterKey, HostSpec};

/// Role of a whole cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusterStatus {
    #[default]
    Unknown,
    ConnectFail,
    MasterCluster,
    SecondaryCluster,
}

/// Registry of cluster roles and published master clusters
pub struct ClusterTopologyRegistry {
    /// Cluster key -> last known role
    statuses: DashMap<ClusterKey, ClusterStatus>,
    /// Logical URL key -> master cluster, one watch channel per key
    master_clusters: DashMap<String, watch::Sender<Option<ClusterKey>>>,
    /// Logical URL keys whose master cluster is being discovered right now
    discovering: DashMap<String, ()>,
}

impl Default for ClusterTopologyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterTopologyRegistry {
    pub fn new() -> Self {
        Self {
            statuses: DashMap::new(),
            master_clusters: DashMap::new(),
            discovering: DashMap::new(),
        }
    }

    pub fn report_cluster_status(&self, cluster: ClusterKey, status: ClusterStatus) {
        debug!(cluster = %cluster, status = ?status, "Cluster status reported");
        self.statuses.insert(cluster, status);
    }

    pub fn cluster_status(&self, hosts: &[HostSpec]) -> ClusterStatus {
        let key = ClusterKey::from_hosts(hosts);
        self.statuses.get(&key).map(|s| *s).unwrap_or_default()
    }

    /// Publish the cluster that currently holds the primary for a logical URL
    pub fn report_master_cluster(&self, url_key: &str, cluster: ClusterKey) {
        info!(url = %url_key, cluster = %cluster, "Master cluster published");
        self.master_clusters
            .entry(url_key.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(cluster));
    }

    /// Look up the master cluster published for a logical URL
    ///
    /// With `wait = None` this returns immediately. Otherwise it waits up to
    /// `wait` for another connection to publish the value and returns `None`
    /// on timeout; callers then keep the configured host order.
    pub async fn resolve_master_cluster_key(
        &self,
        url_key: &str,
        wait: Option<Duration>,
    ) -> Option<ClusterKey> {
        let mut rx = self
            .master_clusters
            .entry(url_key.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();

        let Some(wait) = wait else {
            let current = rx.borrow().clone();
            return current;
        };

        let resolved = match tokio::time::timeout(wait, rx.wait_for(|v| v.is_some())).await {
            Ok(Ok(value)) => (*value).clone(),
            Ok(Err(_)) => None,
            Err(_) => {
                warn!(
                    url = %url_key,
                    wait_ms = wait.as_millis() as u64,
                    "Timed out waiting for master cluster, using configured order"
                );
                None
            }
        };
        resolved
    }

    /// Claim master-cluster discovery for a logical URL
    ///
    /// Only the first caller gets a claim. Later callers should wait for the
    /// claimant to publish instead of racing it. The claim is released when
    /// dropped, including when the claimant's future is cancelled.
    pub fn claim_discovery(&self, url_key: &str) -> Option<DiscoveryClaim<'_>> {
        if self.discovering.insert(url_key.to_string(), ()).is_some() {
            return None;
        }
        Some(DiscoveryClaim {
            registry: self,
            url_key: url_key.to_string(),
        })
    }

    /// Forget every cluster status and published master cluster
    pub fn clear(&self) {
        self.statuses.clear();
        self.master_clusters.clear();
        self.discovering.clear();
    }
}

/// Held while one connection discovers the master cluster for a URL
pub struct DiscoveryClaim<'a> {
    registry: &'a ClusterTopologyRegistry,
    url_key: String,
}

impl Drop for DiscoveryClaim<'_> {
    fn drop(&mut self) {
        self.registry.discovering.remove(&self.url_key);
        debug!(url = %self.url_key, "Master cluster discovery released");
    }
}

/// Split a host list into its two clusters, known master cluster first
///
/// The first `priority_index` hosts form one cluster and the rest the other.
/// `hosts` must still be in configuration order.
pub fn split_hosts_by_priority(
    hosts: &[HostSpec],
    priority_index: usize,
    known_master: Option<&ClusterKey>,
) -> (Vec<HostSpec>, Vec<HostSpec>) {
    let split = priority_index.min(hosts.len());
    let first = hosts[..split].to_vec();
    let second = hosts[split..].to_vec();

    match known_master {
        Some(master) if *master == ClusterKey::from_hosts(&second) => (second, first),
        _ => (first, second),
    }
}
