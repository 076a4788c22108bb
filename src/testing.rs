//! In-memory collaborators for unit tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connector::{
    ConnectError, ConnectionTracker, Connector, DbSession, IsolationLevel,
};
use crate::host::{ConnectionProperties, HostSpec};

#[derive(Debug, Clone, Default)]
pub(crate) struct MockHost {
    pub reachable: bool,
    pub primary: bool,
    pub rejected_users: Vec<String>,
    /// Session-level calls fail on this host
    pub failing: bool,
    /// Connection attempts never complete
    pub stalled: bool,
}

/// Session state as seen by the mock server
#[derive(Debug, Clone)]
pub(crate) struct SessionLog {
    pub auto_commit: bool,
    pub read_only: bool,
    pub schema: Option<String>,
    pub isolation: Option<IsolationLevel>,
    pub commits: usize,
    pub rollbacks: usize,
    pub closed: bool,
}

impl Default for SessionLog {
    fn default() -> Self {
        Self {
            auto_commit: true,
            read_only: false,
            schema: None,
            isolation: None,
            commits: 0,
            rollbacks: 0,
            closed: false,
        }
    }
}

type HostMap = Arc<Mutex<HashMap<HostSpec, MockHost>>>;

/// Scripted cluster: reachability and role per host
#[derive(Default)]
pub(crate) struct MockCluster {
    hosts: HostMap,
    connects: Mutex<HashMap<HostSpec, usize>>,
    tracker_closes: Mutex<HashMap<HostSpec, usize>>,
    sessions: Mutex<Vec<(HostSpec, Arc<Mutex<SessionLog>>)>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_host(&self, host: &HostSpec, reachable: bool, primary: bool) {
        let mut hosts = self.hosts.lock();
        let entry = hosts.entry(host.clone()).or_default();
        entry.reachable = reachable;
        entry.primary = primary;
    }

    pub fn reject_user(&self, host: &HostSpec, user: &str) {
        self.hosts
            .lock()
            .entry(host.clone())
            .or_default()
            .rejected_users
            .push(user.to_string());
    }

    pub fn set_failing(&self, host: &HostSpec, failing: bool) {
        self.hosts.lock().entry(host.clone()).or_default().failing = failing;
    }

    pub fn set_stalled(&self, host: &HostSpec, stalled: bool) {
        self.hosts.lock().entry(host.clone()).or_default().stalled = stalled;
    }

    pub fn connect_count(&self, host: &HostSpec) -> usize {
        self.connects.lock().get(host).copied().unwrap_or(0)
    }

    pub fn tracker_closes(&self, host: &HostSpec) -> usize {
        self.tracker_closes.lock().get(host).copied().unwrap_or(0)
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
    hosts: HostMap,
    log: Arc<Mutex<SessionLog>>,
}

impl MockSession {
    fn check(&self) -> Result<(), ConnectError> {
        let hosts = self.hosts.lock();
        match hosts.get(&self.host) {
            Some(h) if h.reachable && !h.failing => Ok(()),
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
            .map(|h| h.primary)
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

    async fn set_schema(&mut self, schema: &str) -> Result<(), ConnectError> {
        self.check()?;
        self.log.lock().schema = Some(schema.to_string());
        Ok(())
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
        self.check()?;
        self.log.lock().rollbacks += 1;
        Ok(())
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
        props: &ConnectionProperties,
    ) -> Result<Box<dyn DbSession>, ConnectError> {
        *self.connects.lock().entry(host.clone()).or_default() += 1;

        let state = self.hosts.lock().get(host).cloned().unwrap_or_default();
        if state.stalled {
            futures::future::pending::<()>().await;
        }
        if !state.reachable {
            return Err(ConnectError::Unreachable(host.addr()));
        }
        if state.rejected_users.contains(&props.user) {
            return Err(ConnectError::AuthRejected(props.user.clone()));
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
        *self.tracker_closes.lock().entry(host.clone()).or_default() += 1;
        0
    }

    fn active_sessions_for(&self, _host: &HostSpec) -> Vec<u64> {
        Vec::new()
    }
}
