//! Connection setup over a cluster-aware host list
//!
//! `ClusterContext` owns one explicitly scoped set of registries (host status,
//! cluster topology, heartbeat) and wires them into every connection it opens:
//!
//! 1. validate the configuration
//! 2. order candidate hosts with the `HostChooser`
//! 3. connect, verify the live role against the requirement, publish status
//! 4. register the primary and its cluster with the heartbeat loop
//!
//! With `enableStatementLoadBalance` the result is a `ReadWriteRouter`
//! instead of a single session.

use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chooser::{HostChooser, LoadBalanceContext, RoundRobinCounters};
use crate::cluster::{split_hosts_by_priority, ClusterStatus, ClusterTopologyRegistry};
use crate::config::{ClusterConfig, ConfigError};
use crate::connector::{
    ConnectError, ConnectionTracker, Connector, DbSession, HostRole, LeastConnSource, ProbeResult,
    StatementClassifier,
};
use crate::heartbeat::{ClusterNodeCache, HeartbeatEngine};
use crate::host::{
    ClusterKey, ConnectionProperties, HostRequirement, HostSpec, HostStatus, HostStatusRegistry,
};
use crate::router::{
    describe_failures, ConnectionManager, ReadWriteRouter, RouterError, SqlClassifier,
    TargetServerType,
};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No host available: {}", describe_failures(.0))]
    NoHostAvailable(Vec<(HostSpec, ConnectError)>),

    #[error(transparent)]
    Router(#[from] RouterError),
}

/// A single physical session chosen by connection setup
pub struct DirectConnection {
    pub host: HostSpec,
    pub role: HostRole,
    pub session: Box<dyn DbSession>,
}

/// Result of a successful connect
pub enum ClusterConnection {
    Direct(DirectConnection),
    Split(ReadWriteRouter),
}

impl ClusterConnection {
    /// The connected host, or the write host of a split connection
    pub fn host(&self) -> &HostSpec {
        match self {
            ClusterConnection::Direct(conn) => &conn.host,
            ClusterConnection::Split(router) => router.write_host(),
        }
    }

    pub fn router(&self) -> Option<&ReadWriteRouter> {
        match self {
            ClusterConnection::Direct(_) => None,
            ClusterConnection::Split(router) => Some(router),
        }
    }

    pub async fn close(self) {
        match self {
            ClusterConnection::Direct(mut conn) => conn.session.close().await,
            ClusterConnection::Split(router) => router.close().await,
        }
    }
}

/// Shared cluster state plus the collaborators used to open connections
pub struct ClusterContext {
    connector: Arc<dyn Connector>,
    status: Arc<HostStatusRegistry>,
    topology: Arc<ClusterTopologyRegistry>,
    node_cache: ClusterNodeCache,
    counters: Arc<RoundRobinCounters>,
    chooser: Arc<HostChooser>,
    classifier: Arc<dyn StatementClassifier>,
}

impl ClusterContext {
    pub fn new(connector: Arc<dyn Connector>, tracker: Arc<dyn ConnectionTracker>) -> Self {
        let status = Arc::new(HostStatusRegistry::new(tracker.clone()));
        let engine = Arc::new(HeartbeatEngine::new(
            connector.clone(),
            status.clone(),
            tracker,
        ));
        let counters = Arc::new(RoundRobinCounters::new());

        Self {
            chooser: Arc::new(HostChooser::new(status.clone(), counters.clone())),
            node_cache: ClusterNodeCache::new(engine),
            topology: Arc::new(ClusterTopologyRegistry::new()),
            classifier: Arc::new(SqlClassifier::new()),
            connector,
            status,
            counters,
        }
    }

    /// Replace the default `sqlparser` classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn StatementClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Enable `autoBalance=leastconn` with the given connection-count source
    pub fn with_least_conn(mut self, source: Arc<dyn LeastConnSource>) -> Self {
        self.chooser = Arc::new(
            HostChooser::new(self.status.clone(), self.counters.clone()).with_least_conn(source),
        );
        self
    }

    pub fn status(&self) -> &Arc<HostStatusRegistry> {
        &self.status
    }

    pub fn topology(&self) -> &Arc<ClusterTopologyRegistry> {
        &self.topology
    }

    pub fn node_cache(&self) -> &ClusterNodeCache {
        &self.node_cache
    }

    pub fn engine(&self) -> &Arc<HeartbeatEngine> {
        self.node_cache.engine()
    }

    /// Open a logical connection
    pub async fn connect(&self, config: &ClusterConfig) -> Result<ClusterConnection, DriverError> {
        config.validate()?;
        let hosts = config.host_specs()?;
        let props = config.connection_properties();

        if config.enable_statement_load_balance {
            let router = self.connect_split(config, &hosts, &props).await?;
            return Ok(ClusterConnection::Split(router));
        }

        let requirement = config.target_server_type()?;
        let ctx = LoadBalanceContext::new(
            config.url_key(),
            config.load_balance()?,
            config.stale_after(),
        );

        let conn = match config.priority_servers {
            Some(priority) => {
                self.connect_dual(config, &hosts, priority, requirement, &ctx, &props)
                    .await?
            }
            None => self
                .connect_cluster(&hosts, requirement, &ctx, &props, config)
                .await
                .map_err(DriverError::NoHostAvailable)?,
        };
        Ok(ClusterConnection::Direct(conn))
    }

    /// Stop monitoring and forget every observed status
    pub async fn shutdown(&self) {
        self.node_cache.stop().await;
        self.status.clear();
        self.topology.clear();
    }

    /// Two clusters behind one URL: try the known master cluster first
    async fn connect_dual(
        &self,
        config: &ClusterConfig,
        hosts: &[HostSpec],
        priority: usize,
        requirement: HostRequirement,
        ctx: &LoadBalanceContext,
        props: &ConnectionProperties,
    ) -> Result<DirectConnection, DriverError> {
        let url_key = config.url_key();
        let claim = self.topology.claim_discovery(&url_key);
        let wait = match claim {
            Some(_) => None,
            None => Some(config.master_cluster_wait()),
        };
        let known = self.topology.resolve_master_cluster_key(&url_key, wait).await;

        // `hosts` is still in configuration order here
        let (first, second) = split_hosts_by_priority(hosts, priority, known.as_ref());

        let mut failures = Vec::new();
        let mut connected = None;
        for cluster in [first, second] {
            let key = ClusterKey::from_hosts(&cluster);
            match self
                .connect_cluster(&cluster, requirement, ctx, props, config)
                .await
            {
                Ok(conn) => {
                    if conn.role == HostRole::Primary {
                        self.topology
                            .report_cluster_status(key.clone(), ClusterStatus::MasterCluster);
                        self.topology.report_master_cluster(&url_key, key);
                    }
                    connected = Some(conn);
                    break;
                }
                Err(errors) => {
                    let reachable = cluster
                        .iter()
                        .any(|h| self.status.status(h) == HostStatus::Secondary);
                    let status = if reachable {
                        ClusterStatus::SecondaryCluster
                    } else {
                        ClusterStatus::ConnectFail
                    };
                    self.topology.report_cluster_status(key, status);
                    failures.extend(errors);
                }
            }
        }

        drop(claim);
        connected.ok_or(DriverError::NoHostAvailable(failures))
    }

    /// Try candidate hosts in chooser order until one satisfies `requirement`
    async fn connect_cluster(
        &self,
        hosts: &[HostSpec],
        requirement: HostRequirement,
        ctx: &LoadBalanceContext,
        props: &ConnectionProperties,
        config: &ClusterConfig,
    ) -> Result<DirectConnection, Vec<(HostSpec, ConnectError)>> {
        let mut candidates = self.chooser.choose(hosts, requirement, ctx);

        // A failed-over master redirects to its replacement
        if requirement == HostRequirement::Master {
            if let Some(first) = candidates.first().cloned() {
                let resolved = self.engine().resolve_master(&first);
                if let Some(pos) = candidates.iter().position(|h| *h == resolved) {
                    if pos > 0 {
                        let host = candidates.remove(pos);
                        debug!(from = %first, to = %host, "Following failover redirect");
                        candidates.insert(0, host);
                    }
                }
            }
        }

        let mut failures = Vec::new();
        for host in candidates {
            let (session, role) = match self.open(&host, props).await {
                Ok(opened) => opened,
                Err(e) => {
                    if !matches!(e, ConnectError::AuthRejected(_)) {
                        self.status.report_status(&host, HostStatus::ConnectFail);
                    }
                    debug!(addr = %host, error = %e, "Connect attempt failed");
                    failures.push((host, e));
                    continue;
                }
            };

            let status = match role {
                HostRole::Primary => HostStatus::Master,
                HostRole::Standby => HostStatus::Secondary,
            };
            self.status.report_status(&host, status);

            if !requirement.allows(status) {
                debug!(addr = %host, role = ?role, requirement = ?requirement, "Role does not match");
                self.connector.close(session).await;
                failures.push((
                    host.clone(),
                    ConnectError::Session(format!("{} is {:?}, need {:?}", host, role, requirement)),
                ));
                continue;
            }

            if role == HostRole::Primary {
                self.node_cache
                    .register(&host, hosts, props, Some(config.heartbeat_period()));
            }
            info!(addr = %host, role = ?role, "Connected");
            return Ok(DirectConnection {
                host,
                role,
                session,
            });
        }

        Err(failures)
    }

    /// Connect and query the role, bounded by the connect timeout
    async fn open(
        &self,
        host: &HostSpec,
        props: &ConnectionProperties,
    ) -> Result<(Box<dyn DbSession>, HostRole), ConnectError> {
        let attempt = async {
            let mut session = self.connector.connect(host, props).await?;
            match self.connector.is_primary(session.as_mut()).await {
                Ok(true) => Ok((session, HostRole::Primary)),
                Ok(false) => Ok((session, HostRole::Standby)),
                Err(e) => {
                    self.connector.close(session).await;
                    Err(e)
                }
            }
        };

        tokio::time::timeout(props.connect_timeout, attempt)
            .await
            .map_err(|_| ConnectError::Timeout)?
    }

    async fn connect_split(
        &self,
        config: &ClusterConfig,
        hosts: &[HostSpec],
        props: &ConnectionProperties,
    ) -> Result<ReadWriteRouter, DriverError> {
        let write_host = match config.write_host()? {
            Some(host) => host,
            None => self.discover_write_host(hosts, props).await?,
        };

        let router = ReadWriteRouter::new(
            write_host.clone(),
            hosts,
            TargetServerType::from(config.target_server_type()?),
            self.chooser.clone(),
            LoadBalanceContext::new(
                format!("{}:read", config.url_key()),
                config.load_balance()?,
                config.stale_after(),
            ),
            self.classifier.clone(),
            ConnectionManager::new(self.connector.clone(), props.clone()),
        );
        router.manager().get_or_connect(&write_host).await?;

        self.node_cache
            .register(&write_host, hosts, props, Some(config.heartbeat_period()));
        info!(
            write = %write_host,
            reads = router.read_hosts().len(),
            "Read-write split connection ready"
        );
        Ok(router)
    }

    /// Probe every host and pick the first, in configuration order, that reports primary
    async fn discover_write_host(
        &self,
        hosts: &[HostSpec],
        props: &ConnectionProperties,
    ) -> Result<HostSpec, DriverError> {
        let prober = self.engine().prober();
        for host in hosts {
            prober.add_properties(host, props);
        }

        let results = join_all(hosts.iter().map(|h| prober.probe(h))).await;

        let mut failures = Vec::new();
        for (host, result) in hosts.iter().zip(results) {
            let error = match result {
                ProbeResult::Reachable(HostRole::Primary) => return Ok(host.clone()),
                ProbeResult::Reachable(HostRole::Standby) => {
                    ConnectError::Session(format!("{} is not primary", host))
                }
                ProbeResult::Unreachable => ConnectError::Unreachable(host.addr()),
                ProbeResult::AuthRejected => ConnectError::AuthRejected(props.user.clone()),
            };
            failures.push((host.clone(), error));
        }

        warn!(hosts = hosts.len(), "No primary found among configured hosts");
        Err(DriverError::NoHostAvailable(failures))
    }
}
