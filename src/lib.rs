//! Cluster awareness for a primary/standby database client
//!
//! Tracks which host of a cluster is the primary, follows failover, orders
//! candidate hosts for new connections and routes statements between a write
//! host and read hosts. The wire protocol is plugged in through the traits in
//! [`connector`].

pub mod chooser;
pub mod cluster;
pub mod config;
pub mod connector;
pub mod driver;
pub mod heartbeat;
pub mod host;
pub mod router;

#[cfg(test)]
mod testing;

pub use chooser::{HostChooser, LoadBalance, LoadBalanceContext, RoundRobinCounters};
pub use cluster::{ClusterStatus, ClusterTopologyRegistry, DiscoveryClaim};
pub use config::{load_config, ClusterConfig, ConfigError};
pub use connector::{
    ConnectError, ConnectionTracker, Connector, DbSession, HostRole, ProbeResult,
    StatementClassifier,
};
pub use driver::{ClusterConnection, ClusterContext, DirectConnection, DriverError};
pub use heartbeat::{ClusterNodeCache, HeartbeatEngine};
pub use host::{ClusterKey, ConnectionProperties, HostRequirement, HostSpec, HostStatus, HostStatusRegistry};
pub use router::{ConnectionManager, ReadWriteRouter, RouterError, SqlClassifier};
