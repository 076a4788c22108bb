//! Master probing pass
//!
//! Polls every tracked primary. A primary that is unreachable or no longer
//! reports itself primary triggers failover handling for its cluster.

use std::collections::BTreeSet;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::host::HostSpec;

use super::HeartbeatEngine;

impl HeartbeatEngine {
    /// Probe every tracked `master -> standbys` edge
    pub(crate) async fn probe_masters(&self) {
        let edges: Vec<(HostSpec, BTreeSet<HostSpec>)> = self
            .edges
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        join_all(
            edges
                .into_iter()
                .map(|(master, standbys)| self.check_master(master, standbys)),
        )
        .await;
    }

    async fn check_master(&self, master: HostSpec, standbys: BTreeSet<HostSpec>) {
        let result = self.prober.probe(&master).await;
        if result.is_primary() {
            debug!(addr = %master, "Master still primary");
            return;
        }

        info!(addr = %master, result = ?result, "Master lost primary role, searching standbys");
        self.cache_process(&master, standbys).await;
    }

    /// Handle a primary that went away
    ///
    /// Promotes the first standby that reports primary and leaves a redirect
    /// from the old master to it. With no new primary the cluster is parked
    /// as a failure cluster.
    pub(crate) async fn cache_process(&self, old_master: &HostSpec, standbys: BTreeSet<HostSpec>) {
        let closed = self.tracker.close_all_for(old_master);
        debug!(addr = %old_master, closed = closed, "Closed connections to former master");

        let results = join_all(standbys.iter().map(|h| self.prober.probe(h))).await;
        let promoted = standbys
            .iter()
            .zip(results)
            .find(|(_, r)| r.is_primary())
            .map(|(h, _)| h.clone());

        match promoted {
            Some(new_master) => {
                {
                    let mut edges = self.edges.lock();
                    edges.remove(old_master);
                    let entry = edges.entry(new_master.clone()).or_default();
                    entry.extend(standbys.iter().filter(|h| **h != new_master).cloned());
                    entry.remove(old_master);
                }
                self.add_redirect(old_master, &new_master);
                info!(
                    old_master = %old_master,
                    new_master = %new_master,
                    "Failover detected, standby promoted"
                );
            }
            None => {
                self.edges.lock().remove(old_master);
                self.park_failure_cluster(old_master, standbys);
                warn!(addr = %old_master, "No primary found among standbys, cluster parked");
            }
        }
    }
}
