//! Primary/standby role probing
//!
//! Connects to a host with each credential set recorded for it and asks the
//! server whether it is the primary. The outcome is published to the
//! `HostStatusRegistry`, which only this path writes.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::connector::{ConnectError, Connector, HostRole, ProbeResult};
use crate::host::{ConnectionProperties, HostSpec, HostStatus, HostStatusRegistry};

/// Probes hosts with the credentials recorded for them
pub struct Prober {
    connector: Arc<dyn Connector>,
    status: Arc<HostStatusRegistry>,
    /// Credential sets per host (several datasources may share a node)
    properties: DashMap<HostSpec, Vec<ConnectionProperties>>,
}

impl Prober {
    pub fn new(connector: Arc<dyn Connector>, status: Arc<HostStatusRegistry>) -> Self {
        Self {
            connector,
            status,
            properties: DashMap::new(),
        }
    }

    /// Record a credential set that worked against `host`
    pub fn add_properties(&self, host: &HostSpec, props: &ConnectionProperties) {
        let mut entry = self.properties.entry(host.clone()).or_default();
        if !entry.contains(props) {
            entry.push(props.clone());
        }
    }

    /// Credential sets currently recorded for `host`
    pub fn properties_for(&self, host: &HostSpec) -> Vec<ConnectionProperties> {
        self.properties
            .get(host)
            .map(|p| p.value().clone())
            .unwrap_or_default()
    }

    fn remove_properties(&self, host: &HostSpec, props: &ConnectionProperties) {
        if let Some(mut entry) = self.properties.get_mut(host) {
            entry.retain(|p| p != props);
        }
    }

    pub fn clear(&self) {
        self.properties.clear();
    }

    /// Probe a host and publish the observed status
    ///
    /// Credential sets rejected by the server are dropped. A host with no
    /// usable credentials is reported `AuthRejected` and left untouched in
    /// the status registry.
    pub async fn probe(&self, host: &HostSpec) -> ProbeResult {
        let candidates = self.properties_for(host);
        if candidates.is_empty() {
            debug!(addr = %host, "No connection properties recorded, skipping probe");
            return ProbeResult::AuthRejected;
        }

        let mut result = ProbeResult::AuthRejected;
        for props in candidates {
            match self.probe_with(host, &props).await {
                Ok(role) => {
                    result = ProbeResult::Reachable(role);
                    break;
                }
                Err(ConnectError::AuthRejected(msg)) => {
                    warn!(addr = %host, user = %props.user, error = %msg, "Credentials rejected, dropping them");
                    self.remove_properties(host, &props);
                }
                Err(e) => {
                    debug!(addr = %host, error = %e, "Probe failed");
                    result = ProbeResult::Unreachable;
                    break;
                }
            }
        }

        match result {
            ProbeResult::Reachable(HostRole::Primary) => {
                self.status.report_status(host, HostStatus::Master)
            }
            ProbeResult::Reachable(HostRole::Standby) => {
                self.status.report_status(host, HostStatus::Secondary)
            }
            ProbeResult::Unreachable => self.status.report_status(host, HostStatus::ConnectFail),
            ProbeResult::AuthRejected => {}
        }
        debug!(addr = %host, result = ?result, "Probe finished");
        result
    }

    /// Connect, query the role, close. Bounded by the connect timeout.
    async fn probe_with(
        &self,
        host: &HostSpec,
        props: &ConnectionProperties,
    ) -> Result<HostRole, ConnectError> {
        let attempt = async {
            let mut session = self.connector.connect(host, props).await?;
            let primary = self.connector.is_primary(session.as_mut()).await;
            self.connector.close(session).await;
            primary
        };

        let primary = tokio::time::timeout(props.connect_timeout, attempt)
            .await
            .map_err(|_| ConnectError::Timeout)??;

        Ok(if primary {
            HostRole::Primary
        } else {
            HostRole::Standby
        })
    }
}
