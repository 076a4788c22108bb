//! Failed-master recovery pass
//!
//! Re-probes every demoted master that has a redirect to its replacement.
//! A recovered host is folded back into the live topology.

use tracing::{debug, info, warn};

use crate::connector::{HostRole, ProbeResult};
use crate::host::HostSpec;

use super::HeartbeatEngine;

impl HeartbeatEngine {
    pub(crate) async fn check_failure_masters(&self) {
        let records: Vec<(HostSpec, HostSpec)> = self
            .failure_masters
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (failed, promoted) in records {
            self.check_failure_master(&failed, &promoted).await;
        }
    }

    async fn check_failure_master(&self, failed: &HostSpec, promoted: &HostSpec) {
        let role = match self.prober.probe(failed).await {
            ProbeResult::Reachable(role) => role,
            other => {
                debug!(addr = %failed, result = ?other, "Failed master still down");
                return;
            }
        };

        {
            let mut redirects = self.failure_masters.lock();
            if redirects.get(failed) != Some(promoted) {
                // Rewritten by another pass since the snapshot
                return;
            }
            redirects.remove(failed);
        }

        let target = self.resolve_master(promoted);
        if target == *failed {
            debug!(addr = %failed, "Redirect chain leads back to recovered host");
            return;
        }

        if !self.edges.lock().contains_key(&target) {
            self.fold_into_parked(failed, promoted, &target, role);
            return;
        }

        match role {
            HostRole::Standby => {
                self.merge_standbys(&target, [failed]);
                info!(addr = %failed, master = %target, "Former master rejoined as standby");
            }
            HostRole::Primary => {
                if self.prober.probe(&target).await.is_primary() {
                    // Both claim primary; the host in the live topology keeps the edge
                    self.merge_standbys(&target, [failed]);
                    warn!(
                        addr = %failed,
                        master = %target,
                        "Recovered host reports primary while current master does too"
                    );
                } else {
                    self.reclaim_edge(failed, &target);
                    info!(addr = %failed, former = %target, "Former master is primary again");
                }
            }
        }
    }

    /// Attach a recovered host whose redirect target has no live edge
    ///
    /// A parked target keeps the host as a pending standby, or hands its
    /// cluster over when the host came back primary. Without a parked record
    /// the redirect stays for the next tick.
    fn fold_into_parked(
        &self,
        failed: &HostSpec,
        promoted: &HostSpec,
        target: &HostSpec,
        role: HostRole,
    ) {
        match role {
            HostRole::Standby => {
                let mut clusters = self.failure_clusters.lock();
                if let Some(record) = clusters.iter_mut().find(|c| c.former_master == *target) {
                    record.standbys.insert(failed.clone());
                    info!(addr = %failed, parked = %target, "Former master joined parked cluster");
                    return;
                }
            }
            HostRole::Primary => {
                let record = {
                    let mut clusters = self.failure_clusters.lock();
                    clusters
                        .iter()
                        .position(|c| c.former_master == *target)
                        .map(|idx| clusters.remove(idx))
                };
                if let Some(record) = record {
                    let mut members = record.standbys;
                    members.insert(target.clone());
                    self.add_redirect(target, failed);
                    self.merge_standbys(failed, members.iter());
                    info!(addr = %failed, parked = %target, "Former master took over parked cluster");
                    return;
                }
            }
        }

        self.failure_masters
            .lock()
            .entry(failed.clone())
            .or_insert_with(|| promoted.clone());
        debug!(addr = %failed, target = %target, "Redirect target not tracked, keeping record");
    }

    /// Move the edge of `from` under `to`, demoting `from` to a standby
    fn reclaim_edge(&self, to: &HostSpec, from: &HostSpec) {
        let mut edges = self.edges.lock();
        let mut standbys = edges.remove(from).unwrap_or_default();
        standbys.insert(from.clone());
        standbys.remove(to);
        edges.entry(to.clone()).or_default().extend(standbys);
    }
}
