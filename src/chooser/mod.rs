//! Host selection for new connections and routed statements
//!
//! Filters the configured hosts through the `HostStatusRegistry`, then orders
//! the survivors with the configured load-balancing strategy.

mod strategy;

pub use strategy::{LoadBalance, RoundRobinCounters};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::connector::LeastConnSource;
use crate::host::{HostRequirement, HostSpec, HostStatusRegistry};

/// Per-call inputs that do not change between calls of one logical connection
#[derive(Debug, Clone)]
pub struct LoadBalanceContext {
    /// Key of the logical URL; round-robin counters are shared per key
    pub url_key: String,
    pub strategy: LoadBalance,
    /// Recorded statuses older than this are ignored
    pub stale_after: Duration,
}

impl LoadBalanceContext {
    pub fn new(url_key: impl Into<String>, strategy: LoadBalance, stale_after: Duration) -> Self {
        Self {
            url_key: url_key.into(),
            strategy,
            stale_after,
        }
    }
}

/// Chooses the order in which hosts are tried
pub struct HostChooser {
    status: Arc<HostStatusRegistry>,
    counters: Arc<RoundRobinCounters>,
    least_conn: Option<Arc<dyn LeastConnSource>>,
}

impl HostChooser {
    pub fn new(status: Arc<HostStatusRegistry>, counters: Arc<RoundRobinCounters>) -> Self {
        Self {
            status,
            counters,
            least_conn: None,
        }
    }

    pub fn with_least_conn(mut self, source: Arc<dyn LeastConnSource>) -> Self {
        self.least_conn = Some(source);
        self
    }

    /// Candidate hosts in the order they should be tried
    ///
    /// Falls back to the full host list when no host passes the status
    /// filter, so a caller without topology information still makes progress.
    pub fn choose(
        &self,
        hosts: &[HostSpec],
        requirement: HostRequirement,
        ctx: &LoadBalanceContext,
    ) -> Vec<HostSpec> {
        let ordered = if requirement == HostRequirement::PreferSecondary {
            self.prefer_secondary(hosts, ctx)
        } else {
            let candidates = self.status.candidate_hosts(hosts, requirement, ctx.stale_after);
            self.apply(candidates, hosts, ctx)
        };

        if ordered.is_empty() {
            debug!(requirement = ?requirement, "No candidate hosts, falling back to full list");
            return self.apply(hosts.to_vec(), hosts, ctx);
        }
        ordered
    }

    /// Secondaries first, then any host, without trying the same host twice in a row
    fn prefer_secondary(&self, hosts: &[HostSpec], ctx: &LoadBalanceContext) -> Vec<HostSpec> {
        let secondaries = self.apply(
            self.status
                .candidate_hosts(hosts, HostRequirement::Secondary, ctx.stale_after),
            hosts,
            ctx,
        );
        let any = self.apply(
            self.status
                .candidate_hosts(hosts, HostRequirement::Any, ctx.stale_after),
            hosts,
            ctx,
        );

        let mut ordered = secondaries;
        if let (Some(last), Some(first)) = (ordered.last(), any.first()) {
            if last == first {
                ordered.pop();
            }
        }
        ordered.extend(any);
        ordered
    }

    /// Order `hosts`, the filtered subset of `configured`
    fn apply(
        &self,
        hosts: Vec<HostSpec>,
        configured: &[HostSpec],
        ctx: &LoadBalanceContext,
    ) -> Vec<HostSpec> {
        if hosts.len() < 2 {
            return hosts;
        }
        match ctx.strategy {
            LoadBalance::None => hosts,
            LoadBalance::Shuffle => strategy::shuffle(hosts),
            LoadBalance::RoundRobin => {
                strategy::round_robin(hosts, self.counters.next(&ctx.url_key))
            }
            LoadBalance::PriorityRoundRobin(priority) => strategy::priority_round_robin(
                hosts,
                configured,
                priority,
                self.counters.next(&ctx.url_key),
            ),
            LoadBalance::LeastConn => match &self.least_conn {
                Some(source) => source.sort_by_least_connections(hosts),
                None => {
                    warn!("leastconn requested without a connection-count source, shuffling");
                    strategy::shuffle(hosts)
                }
            },
        }
    }
}
