use std::collections::BTreeMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connector::{ConnectError, Connector, DbSession, IsolationLevel};
use crate::host::{ConnectionProperties, HostSpec};

use super::RouterError;

/// A physical session shared between the router and its callers
pub type SharedSession = Arc<Mutex<Box<dyn DbSession>>>;

/// Session-level call recorded for replay onto lazily created sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    AutoCommit(bool),
    TransactionIsolation(IsolationLevel),
    Schema(String),
    ReadOnly(bool),
}

impl SessionCall {
    fn same_kind(&self, other: &SessionCall) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }

    async fn apply(&self, session: &mut dyn DbSession) -> Result<(), ConnectError> {
        match self {
            SessionCall::AutoCommit(v) => session.set_auto_commit(*v).await,
            SessionCall::TransactionIsolation(level) => {
                session.set_transaction_isolation(*level).await
            }
            SessionCall::Schema(schema) => session.set_schema(schema).await,
            SessionCall::ReadOnly(v) => session.set_read_only(*v).await,
        }
    }
}

/// Operation broadcast to every open session
enum SessionOp {
    Call(SessionCall),
    Commit,
    Rollback,
}

impl SessionOp {
    async fn apply(&self, session: &mut dyn DbSession) -> Result<(), ConnectError> {
        match self {
            SessionOp::Call(call) => call.apply(session).await,
            SessionOp::Commit => session.commit().await,
            SessionOp::Rollback => session.rollback().await,
        }
    }
}

/// Physical sessions behind one logical read-write connection
///
/// At most one session per host, created on first use. Session-level calls
/// are kept in a ledger (latest value per kind) and replayed onto every new
/// session before it is handed out, so all sessions agree on auto-commit,
/// isolation, schema and read-only.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    props: ConnectionProperties,
    sessions: Mutex<BTreeMap<HostSpec, SharedSession>>,
    ledger: parking_lot::Mutex<Vec<SessionCall>>,
    auto_commit: AtomicBool,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, props: ConnectionProperties) -> Self {
        Self {
            connector,
            props,
            sessions: Mutex::new(BTreeMap::new()),
            ledger: parking_lot::Mutex::new(Vec::new()),
            auto_commit: AtomicBool::new(true),
        }
    }

    /// Get the session for `host`, connecting and replaying the ledger if needed
    pub async fn get_or_connect(&self, host: &HostSpec) -> Result<SharedSession, RouterError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(host) {
            return Ok(session.clone());
        }

        let mut session = self
            .connector
            .connect(host, &self.props)
            .await
            .map_err(|source| RouterError::Connect {
                host: host.clone(),
                source,
            })?;

        let replay = self.ledger.lock().clone();
        for call in &replay {
            if let Err(source) = call.apply(session.as_mut()).await {
                warn!(host = %host, call = ?call, error = %source, "Session replay failed");
                self.connector.close(session).await;
                return Err(RouterError::Connect {
                    host: host.clone(),
                    source,
                });
            }
        }

        debug!(host = %host, replayed = replay.len(), "Session opened");
        let session = Arc::new(Mutex::new(session));
        sessions.insert(host.clone(), session.clone());
        Ok(session)
    }

    /// Hosts with an open session
    pub async fn hosts(&self) -> Vec<HostSpec> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Recorded session-level calls, oldest first
    pub fn ledger(&self) -> Vec<SessionCall> {
        self.ledger.lock().clone()
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::Acquire)
    }

    pub async fn set_auto_commit(&self, auto_commit: bool) -> Result<(), RouterError> {
        self.auto_commit.store(auto_commit, Ordering::Release);
        self.record_and_apply(SessionCall::AutoCommit(auto_commit))
            .await
    }

    pub async fn set_read_only(&self, read_only: bool) -> Result<(), RouterError> {
        self.record_and_apply(SessionCall::ReadOnly(read_only)).await
    }

    pub async fn set_transaction_isolation(
        &self,
        level: IsolationLevel,
    ) -> Result<(), RouterError> {
        self.record_and_apply(SessionCall::TransactionIsolation(level))
            .await
    }

    pub async fn set_schema(&self, schema: &str) -> Result<(), RouterError> {
        self.record_and_apply(SessionCall::Schema(schema.to_string()))
            .await
    }

    pub async fn commit(&self) -> Result<(), RouterError> {
        self.apply_to_all(&SessionOp::Commit).await
    }

    pub async fn rollback(&self) -> Result<(), RouterError> {
        self.apply_to_all(&SessionOp::Rollback).await
    }

    /// Close every session and forget them
    pub async fn close(&self) {
        let sessions = mem::take(&mut *self.sessions.lock().await);
        for (host, session) in sessions {
            session.lock().await.close().await;
            debug!(host = %host, "Session closed");
        }
    }

    async fn record_and_apply(&self, call: SessionCall) -> Result<(), RouterError> {
        {
            let mut ledger = self.ledger.lock();
            ledger.retain(|recorded| !recorded.same_kind(&call));
            ledger.push(call.clone());
        }
        self.apply_to_all(&SessionOp::Call(call)).await
    }

    /// Apply `op` to every open session, collecting all failures
    async fn apply_to_all(&self, op: &SessionOp) -> Result<(), RouterError> {
        let sessions: Vec<(HostSpec, SharedSession)> = self
            .sessions
            .lock()
            .await
            .iter()
            .map(|(host, session)| (host.clone(), session.clone()))
            .collect();

        let mut failures = Vec::new();
        for (host, session) in sessions {
            let mut guard = session.lock().await;
            if let Err(e) = op.apply(guard.as_mut()).await {
                warn!(host = %host, error = %e, "Session call failed");
                failures.push((host, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RouterError::Aggregate(failures))
        }
    }
}
