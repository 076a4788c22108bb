//! Integration test entry point
//!
//! Drives connection setup, failover handling and read-write routing through
//! the public API against an in-memory cluster.
//!
//! Run with: cargo test --test integration
//! Set RUST_LOG=gauss_cluster=debug to see the topology logs.

mod failover;
mod mock;
mod routing;

use std::collections::HashMap;
use std::sync::{Arc, Once};

use gauss_cluster::{ClusterConfig, ClusterContext, HostSpec};
use tracing_subscriber::EnvFilter;

use mock::MockCluster;

static INIT_TRACING: Once = Once::new();

/// Install a test subscriber once per binary
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn hosts(names: &[&str]) -> Vec<HostSpec> {
    names.iter().map(|h| HostSpec::new(*h, 5432)).collect()
}

pub fn config(hosts: &[HostSpec], options: &[(&str, &str)]) -> ClusterConfig {
    let addrs: Vec<String> = hosts.iter().map(|h| h.to_string()).collect();
    let options: HashMap<String, String> = options
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ClusterConfig::from_options(&addrs, &options).expect("options should parse")
}

pub fn context() -> (Arc<MockCluster>, ClusterContext) {
    init_tracing();
    let cluster = MockCluster::new();
    let ctx = ClusterContext::new(cluster.clone(), cluster.clone());
    (cluster, ctx)
}
