//! Last observed status per host
//!
//! Written only by the probing path. Connection setup reads it to filter
//! candidate hosts, tolerating stale entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::connector::{ConnectionTracker, NoopTracker};

use super::{HostRequirement, HostSpec, HostStatus};

#[derive(Debug, Clone, Copy)]
struct StatusEntry {
    status: HostStatus,
    last_updated: Instant,
}

/// Registry of last observed status per host
pub struct HostStatusRegistry {
    statuses: Mutex<HashMap<HostSpec, StatusEntry>>,
    tracker: Arc<dyn ConnectionTracker>,
}

impl Default for HostStatusRegistry {
    fn default() -> Self {
        Self::new(Arc::new(NoopTracker))
    }
}

impl HostStatusRegistry {
    pub fn new(tracker: Arc<dyn ConnectionTracker>) -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            tracker,
        }
    }

    /// Record the status observed for a host
    ///
    /// A Secondary -> Master transition closes the connections opened against
    /// the host under its old role. The close runs inside the same critical
    /// section as the upsert, so no reader sees the new status first.
    ///
    /// Per-host credentials are not kept here; `Prober::add_properties`
    /// stores them for the heartbeat passes.
    pub fn report_status(&self, host: &HostSpec, status: HostStatus) {
        let mut statuses = self.statuses.lock();
        let previous = statuses.insert(
            host.clone(),
            StatusEntry {
                status,
                last_updated: Instant::now(),
            },
        );

        let previous = previous.map(|e| e.status).unwrap_or_default();
        if previous == HostStatus::Secondary && status == HostStatus::Master {
            let closed = self.tracker.close_all_for(host);
            info!(
                addr = %host,
                closed = closed,
                "Host promoted to master, closed connections opened as secondary"
            );
        } else if previous != status {
            debug!(addr = %host, from = ?previous, to = ?status, "Host status changed");
        }
    }

    /// Last recorded status, `Unknown` if never observed
    pub fn status(&self, host: &HostSpec) -> HostStatus {
        self.statuses
            .lock()
            .get(host)
            .map(|e| e.status)
            .unwrap_or_default()
    }

    /// Filter hosts that may satisfy `requirement`
    ///
    /// Keeps hosts that were never observed, whose entry is older than
    /// `stale_after`, or whose recorded status satisfies the requirement.
    /// Input order is preserved.
    pub fn candidate_hosts(
        &self,
        hosts: &[HostSpec],
        requirement: HostRequirement,
        stale_after: Duration,
    ) -> Vec<HostSpec> {
        let statuses = self.statuses.lock();
        hosts
            .iter()
            .filter(|host| match statuses.get(*host) {
                None => true,
                Some(entry) => {
                    entry.last_updated.elapsed() > stale_after || requirement.allows(entry.status)
                }
            })
            .cloned()
            .collect()
    }

    /// Forget every recorded status
    pub fn clear(&self) {
        self.statuses.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.statuses.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.lock().is_empty()
    }
}
