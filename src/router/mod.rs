//! Read-write routing for one logical connection
//!
//! Statements are classified and sent either to the write host or to one of
//! the read hosts. The physical sessions behind the logical connection are
//! owned by a [`ConnectionManager`].

mod classifier;
mod manager;
mod rw_split;

pub use classifier::SqlClassifier;
pub use manager::{ConnectionManager, SessionCall, SharedSession};
pub use rw_split::{RouteTarget, RwSplitter, TargetServerType};

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::chooser::{HostChooser, LoadBalanceContext};
use crate::connector::{ConnectError, StatementClassifier};
use crate::host::{HostRequirement, HostSpec};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Failed to connect to {host}: {source}")]
    Connect {
        host: HostSpec,
        #[source]
        source: ConnectError,
    },

    #[error("Session call failed on {} host(s): {}", .0.len(), describe_failures(.0))]
    Aggregate(Vec<(HostSpec, ConnectError)>),
}

pub(crate) fn describe_failures(failures: &[(HostSpec, ConnectError)]) -> String {
    failures
        .iter()
        .map(|(host, e)| format!("{} ({})", host, e))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Routes statements between the write host and the read hosts
pub struct ReadWriteRouter {
    write_host: HostSpec,
    read_hosts: Vec<HostSpec>,
    pin: TargetServerType,
    chooser: Arc<HostChooser>,
    read_ctx: LoadBalanceContext,
    classifier: Arc<dyn StatementClassifier>,
    manager: ConnectionManager,
}

impl ReadWriteRouter {
    /// Build a router over `hosts`; every host except `write_host` serves reads
    pub fn new(
        write_host: HostSpec,
        hosts: &[HostSpec],
        pin: TargetServerType,
        chooser: Arc<HostChooser>,
        read_ctx: LoadBalanceContext,
        classifier: Arc<dyn StatementClassifier>,
        manager: ConnectionManager,
    ) -> Self {
        let read_hosts = hosts
            .iter()
            .filter(|h| **h != write_host)
            .cloned()
            .collect();
        Self {
            write_host,
            read_hosts,
            pin,
            chooser,
            read_ctx,
            classifier,
            manager,
        }
    }

    pub fn write_host(&self) -> &HostSpec {
        &self.write_host
    }

    pub fn read_hosts(&self) -> &[HostSpec] {
        &self.read_hosts
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Host that should execute `sql`
    pub fn route(&self, sql: &str, auto_commit: bool) -> HostSpec {
        match RwSplitter::route(self.classifier.as_ref(), sql, auto_commit, self.pin) {
            RouteTarget::Write => self.write_host.clone(),
            RouteTarget::Read => self.choose_read_host(),
        }
    }

    /// Route `sql` with the current auto-commit mode and return its session
    pub async fn session_for(&self, sql: &str) -> Result<(HostSpec, SharedSession), RouterError> {
        let host = self.route(sql, self.manager.auto_commit());
        let session = self.manager.get_or_connect(&host).await?;
        Ok((host, session))
    }

    pub async fn close(&self) {
        self.manager.close().await;
    }

    fn choose_read_host(&self) -> HostSpec {
        if self.read_hosts.is_empty() {
            return self.write_host.clone();
        }
        let ordered = self
            .chooser
            .choose(&self.read_hosts, HostRequirement::Secondary, &self.read_ctx);
        match ordered.into_iter().next() {
            Some(host) => host,
            None => {
                debug!("No read host available, using write host");
                self.write_host.clone()
            }
        }
    }
}
