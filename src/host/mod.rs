//! Host identity and per-host status types
//!
//! This module provides:
//! - `HostSpec`: the identity key for every topology map
//! - `ClusterKey`: order-independent identity of a set of cooperating hosts
//! - `HostStatus` / `HostRequirement`: last observed role and what a caller needs
//! - `ConnectionProperties`: credentials last used successfully against a host

mod status;

pub use status::HostStatusRegistry;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A physical database endpoint
///
/// Ordered lexicographically by host, then port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostSpec {
    pub host: String,
    pub port: u16,
}

impl HostSpec {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the address string (host:port)
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error parsing a "host:port" string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid host address: {0}")]
pub struct ParseHostError(pub String);

impl FromStr for HostSpec {
    type Err = ParseHostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseHostError(s.to_string()))?;
        if host.is_empty() {
            return Err(ParseHostError(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ParseHostError(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// Order-independent identity of a set of hosts
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterKey(String);

impl ClusterKey {
    pub fn from_hosts<'a>(hosts: impl IntoIterator<Item = &'a HostSpec>) -> Self {
        let mut sorted: Vec<&HostSpec> = hosts.into_iter().collect();
        sorted.sort();
        sorted.dedup();
        let joined = sorted
            .iter()
            .map(|h| h.addr())
            .collect::<Vec<_>>()
            .join(",");
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

/// Last observed status of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostStatus {
    #[default]
    Unknown,
    ConnectFail,
    Master,
    Secondary,
}

/// What role a caller needs from the host it connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostRequirement {
    #[default]
    Any,
    Master,
    Secondary,
    PreferSecondary,
}

impl HostRequirement {
    /// Whether a host with the given recorded status satisfies this requirement
    pub fn allows(&self, status: HostStatus) -> bool {
        match self {
            HostRequirement::Any | HostRequirement::PreferSecondary => {
                status != HostStatus::ConnectFail
            }
            HostRequirement::Master => status == HostStatus::Master,
            HostRequirement::Secondary => status == HostStatus::Secondary,
        }
    }
}

impl FromStr for HostRequirement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "any" => Ok(HostRequirement::Any),
            "master" | "primary" => Ok(HostRequirement::Master),
            "secondary" | "standby" | "slave" => Ok(HostRequirement::Secondary),
            "prefersecondary" | "preferstandby" | "preferslave" => {
                Ok(HostRequirement::PreferSecondary)
            }
            other => Err(format!("Invalid targetServerType value: {}", other)),
        }
    }
}

/// Connection parameters last used successfully against a host
///
/// Several sets may be recorded per host when multiple logical datasources
/// share a physical node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionProperties {
    pub user: String,
    pub password: String,
    pub database: Option<String>,
    pub connect_timeout: Duration,
    /// Driver-specific options passed through to the connector
    pub options: BTreeMap<String, String>,
}

impl ConnectionProperties {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            ..Self::default()
        }
    }
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            database: None,
            connect_timeout: Duration::from_millis(3000),
            options: BTreeMap::new(),
        }
    }
}
