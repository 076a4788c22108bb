//! Collaborator interfaces consumed by the cluster core
//!
//! The wire protocol, statement model and connection bookkeeping live outside
//! this crate. They are plugged in through the traits below.

use async_trait::async_trait;

use crate::host::{ConnectionProperties, HostSpec};

/// Role reported by a live server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRole {
    Primary,
    Standby,
}

/// Outcome of a single probe against one host
///
/// These are expected, frequent outcomes and never surface as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Reachable(HostRole),
    Unreachable,
    AuthRejected,
}

impl ProbeResult {
    pub fn is_primary(&self) -> bool {
        matches!(self, ProbeResult::Reachable(HostRole::Primary))
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeResult::Reachable(_))
    }
}

/// Errors from a connector or a physical session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Connection timed out")]
    Timeout,

    #[error("Session error: {0}")]
    Session(String),
}

/// Transaction isolation levels replayed onto physical sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// A physical connection to one host
#[async_trait]
pub trait DbSession: Send {
    /// Query whether the server currently acts as the primary
    async fn is_primary(&mut self) -> Result<bool, ConnectError>;

    async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), ConnectError>;

    async fn set_transaction_isolation(&mut self, level: IsolationLevel)
        -> Result<(), ConnectError>;

    async fn set_schema(&mut self, schema: &str) -> Result<(), ConnectError>;

    async fn set_read_only(&mut self, read_only: bool) -> Result<(), ConnectError>;

    async fn commit(&mut self) -> Result<(), ConnectError>;

    async fn rollback(&mut self) -> Result<(), ConnectError>;

    async fn close(&mut self);
}

/// Factory for physical sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        host: &HostSpec,
        props: &ConnectionProperties,
    ) -> Result<Box<dyn DbSession>, ConnectError>;

    async fn is_primary(&self, session: &mut dyn DbSession) -> Result<bool, ConnectError> {
        session.is_primary().await
    }

    async fn close(&self, mut session: Box<dyn DbSession>) {
        session.close().await;
    }
}

/// Tracks application connections opened against each host
///
/// Calls happen while registry locks are held, so implementations must not block.
pub trait ConnectionTracker: Send + Sync {
    /// Close every tracked connection to `host`, returning how many were closed
    fn close_all_for(&self, host: &HostSpec) -> usize;

    /// Identifiers of the connections currently open against `host`
    fn active_sessions_for(&self, host: &HostSpec) -> Vec<u64>;
}

/// Tracker used when the application does not track connections
#[derive(Debug, Default)]
pub struct NoopTracker;

impl ConnectionTracker for NoopTracker {
    fn close_all_for(&self, _host: &HostSpec) -> usize {
        0
    }

    fn active_sessions_for(&self, _host: &HostSpec) -> Vec<u64> {
        Vec::new()
    }
}

/// Whether a statement needs the write node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    WriteRequired,
    ReadSafe,
}

/// Statement classification failure (parse error, unsupported syntax)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("Failed to parse SQL: {0}")]
    ParseError(String),

    #[error("Empty statement")]
    EmptyStatement,
}

pub trait StatementClassifier: Send + Sync {
    fn classify(&self, sql: &str) -> Result<StatementKind, ClassifyError>;

    fn has_lock_clause(&self, sql: &str) -> Result<bool, ClassifyError>;
}

/// Orders hosts by how many connections they currently carry
pub trait LeastConnSource: Send + Sync {
    fn sort_by_least_connections(&self, hosts: Vec<HostSpec>) -> Vec<HostSpec>;
}
