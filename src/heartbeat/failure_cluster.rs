//! Failed-cluster rediscovery pass
//!
//! Clusters parked without a primary are retried every tick until the former
//! master comes back as primary or a standby is promoted. Nothing here is
//! ever escalated to a caller.

use std::collections::BTreeSet;

use futures::future::join_all;
use tracing::{debug, info};

use crate::host::HostSpec;

use super::{FailureCluster, HeartbeatEngine};

impl HeartbeatEngine {
    pub(crate) async fn check_failure_clusters(&self) {
        let records: Vec<FailureCluster> = self.failure_clusters.lock().clone();
        for record in records {
            self.check_failure_cluster(record).await;
        }
    }

    async fn check_failure_cluster(&self, record: FailureCluster) {
        let former = &record.former_master;
        for props in &record.properties {
            self.prober.add_properties(former, props);
        }

        let master_result = self.prober.probe(former).await;
        if master_result.is_primary() {
            self.resolve_failure_cluster(former, former, record.standbys.iter());
            info!(addr = %former, "Former master is primary again, edge restored");
            return;
        }

        let results = join_all(record.standbys.iter().map(|h| self.prober.probe(h))).await;
        if !master_result.is_reachable() && results.iter().all(|r| !r.is_reachable()) {
            debug!(addr = %former, "Whole cluster still unreachable");
            return;
        }

        let promoted = record
            .standbys
            .iter()
            .zip(results.iter())
            .find(|(_, r)| r.is_primary())
            .map(|(h, _)| h.clone());

        let Some(new_master) = promoted else {
            debug!(addr = %former, "Cluster reachable but still without primary");
            return;
        };

        let mut members: BTreeSet<HostSpec> = record.standbys.clone();
        if master_result.is_reachable() {
            members.insert(former.clone());
        } else {
            self.add_redirect(former, &new_master);
        }
        self.resolve_failure_cluster(former, &new_master, members.iter());
        info!(
            former_master = %former,
            new_master = %new_master,
            "Parked cluster found a new primary"
        );
    }

    /// Turn a parked cluster back into a topology edge under `master`
    fn resolve_failure_cluster<'a>(
        &self,
        former: &HostSpec,
        master: &HostSpec,
        members: impl IntoIterator<Item = &'a HostSpec>,
    ) {
        self.failure_clusters
            .lock()
            .retain(|c| c.former_master != *former);
        self.merge_standbys(master, members);
    }
}
