//! In-memory cluster used by the integration tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gauss_cluster::connector::IsolationLevel;
use gauss_cluster::{
    ConnectError, ConnectionProperties, ConnectionTracker, Connector, DbSession, HostSpec,
};
use parking_lot::Mutex;

#[derive(Debug, Clone, Default)]
struct HostState {
    reachable: bool,
    primary: bool,
    failing: bool,
}

#[derive(Debug, Clone)]
pub struct SessionLog {
    pub auto_commit: bool,
    pub read_only: bool,
    pub isolation: Option<IsolationLevel>,
    pub commits: usize,
    pub closed: bool,
}

impl Default for SessionLog {
    fn default() -> Self {
        Self {
            auto_commit: true,
            read_only: false,
            isolation: None,
            commits: 0,
            closed: false,
        }
    }
}

type Hosts = Arc<Mutex<HashMap<HostSpec, HostState>>>;

/// Scripted cluster: reachability and role per host
#[derive(Default)]
pub struct MockCluster {
    hosts: Hosts,
    connects: Mutex<HashMap<HostSpec, usize>>,
    closes: Mutex<HashMap<HostSpec, usize>>,
    sessions: Mutex<Vec<(HostSpec, Arc<Mutex<SessionLog>>)>>,
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn up(&self, host: &HostSpec, primary: bool) {
        let mut hosts = self.hosts.lock();
        let state = hosts.entry(host.clone()).or_default();
        state.reachable = true;
        state.primary = primary;
    }

    pub fn down(&self, host: &HostSpec) {
        self.hosts.lock().entry(host.clone()).or_default().reachable = false;
    }

    pub fn set_failing(&self, host: &HostSpec, failing: bool) {
        self.hosts.lock().entry(host.clone()).or_default().failing = failing;
    }

    pub fn connect_count(&self, host: &HostSpec) -> usize {
        self.connects.lock().get(host).copied().unwrap_or(0)
    }

    pub fn tracker_closes(&self, host: &HostSpec) -> usize {
        self.closes.lock().get(host).copied().unwrap_or(0)
    }

    pub fn sessions_for(&self, host: &HostSpec) -> Vec<SessionLog> {
        self.sessions
            .lock()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, log)| log.lock().clone())
            .collect()
    }
}

struct MockSession {
    host: HostSpec,
    hosts: Hosts,
    log: Arc<Mutex<SessionLog>>,
}

impl MockSession {
    fn check(&self) -> Result<(), ConnectError> {
        match self.hosts.lock().get(&self.host) {
            Some(state) if state.reachable && !state.failing => Ok(()),
            _ => Err(ConnectError::Session(format!("{} failed", self.host))),
        }
    }
}

#[async_trait]
impl DbSession for MockSession {
    async fn is_primary(&mut self) -> Result<bool, ConnectError> {
        self.check()?;
        Ok(self
            .hosts
            .lock()
            .get(&self.host)
            .map(|s| s.primary)
            .unwrap_or(false))
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), ConnectError> {
        self.check()?;
        self.log.lock().auto_commit = auto_commit;
        Ok(())
    }

    async fn set_transaction_isolation(
        &mut self,
        level: IsolationLevel,
    ) -> Result<(), ConnectError> {
        self.check()?;
        self.log.lock().isolation = Some(level);
        Ok(())
    }

    async fn set_schema(&mut self, _schema: &str) -> Result<(), ConnectError> {
        self.check()
    }

    async fn set_read_only(&mut self, read_only: bool) -> Result<(), ConnectError> {
        self.check()?;
        self.log.lock().read_only = read_only;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), ConnectError> {
        self.check()?;
        self.log.lock().commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ConnectError> {
        self.check()
    }

    async fn close(&mut self) {
        self.log.lock().closed = true;
    }
}

#[async_trait]
impl Connector for MockCluster {
    async fn connect(
        &self,
        host: &HostSpec,
        _props: &ConnectionProperties,
    ) -> Result<Box<dyn DbSession>, ConnectError> {
        *self.connects.lock().entry(host.clone()).or_default() += 1;

        let reachable = self
            .hosts
            .lock()
            .get(host)
            .map(|s| s.reachable)
            .unwrap_or(false);
        if !reachable {
            return Err(ConnectError::Unreachable(host.addr()));
        }

        let log = Arc::new(Mutex::new(SessionLog::default()));
        self.sessions.lock().push((host.clone(), log.clone()));
        Ok(Box::new(MockSession {
            host: host.clone(),
            hosts: self.hosts.clone(),
            log,
        }))
    }
}

impl ConnectionTracker for MockCluster {
    fn close_all_for(&self, host: &HostSpec) -> usize {
        *self.closes.lock().entry(host.clone()).or_default() += 1;
        0
    }

    fn active_sessions_for(&self, _host: &HostSpec) -> Vec<u64> {
        Vec::new()
    }
}
