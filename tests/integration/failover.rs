//! Failover scenarios driven through the heartbeat engine

use std::collections::BTreeSet;
use std::time::Duration;

use gauss_cluster::{HostRequirement, HostSpec, HostStatus};

use crate::{config, context, hosts};

#[tokio::test]
async fn test_master_failover_redirects_new_connections() {
    let (cluster, ctx) = context();
    let hosts = hosts(&["a", "b", "c"]);
    cluster.up(&hosts[0], true);
    cluster.up(&hosts[1], false);
    cluster.up(&hosts[2], false);
    let config = config(&hosts, &[("targetServerType", "master")]);

    let conn = ctx.connect(&config).await.unwrap();
    assert_eq!(conn.host(), &hosts[0]);

    // b is seen as a standby before the failover
    ctx.engine().prober().probe(&hosts[1]).await;
    assert_eq!(ctx.status().status(&hosts[1]), HostStatus::Secondary);

    cluster.down(&hosts[0]);
    cluster.up(&hosts[1], true);
    ctx.engine().tick().await;

    let snapshot = ctx.engine().snapshot();
    assert!(!snapshot.edges.contains_key(&hosts[0]));
    let standbys: BTreeSet<HostSpec> = [hosts[2].clone()].into_iter().collect();
    assert_eq!(snapshot.edges.get(&hosts[1]), Some(&standbys));
    assert_eq!(snapshot.redirects.get(&hosts[0]), Some(&hosts[1]));
    assert_eq!(ctx.engine().resolve_master(&hosts[0]), hosts[1]);

    let masters =
        ctx.status()
            .candidate_hosts(&hosts, HostRequirement::Master, Duration::from_secs(60));
    assert_eq!(masters, vec![hosts[1].clone()]);

    // Connections to the old master and to b in its old role are closed once each
    assert_eq!(cluster.tracker_closes(&hosts[0]), 1);
    assert_eq!(cluster.tracker_closes(&hosts[1]), 1);

    let next = ctx.connect(&config).await.unwrap();
    assert_eq!(next.host(), &hosts[1]);

    conn.close().await;
    next.close().await;
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_whole_cluster_down_then_master_returns() {
    let (cluster, ctx) = context();
    let hosts = hosts(&["a", "b", "c"]);
    cluster.up(&hosts[0], true);
    cluster.up(&hosts[1], false);
    cluster.up(&hosts[2], false);

    let conn = ctx
        .connect(&config(&hosts, &[("targetServerType", "master")]))
        .await
        .unwrap();

    for host in &hosts {
        cluster.down(host);
    }
    ctx.engine().tick().await;

    let snapshot = ctx.engine().snapshot();
    assert!(snapshot.edges.is_empty());
    assert_eq!(snapshot.failure_clusters.len(), 1);
    let parked = &snapshot.failure_clusters[0];
    assert_eq!(parked.former_master, hosts[0]);
    let standbys: BTreeSet<HostSpec> = hosts[1..].iter().cloned().collect();
    assert_eq!(parked.standbys, standbys);

    // Still down: nothing changes
    ctx.engine().tick().await;
    assert_eq!(ctx.engine().snapshot().failure_clusters.len(), 1);

    cluster.up(&hosts[0], true);
    ctx.engine().tick().await;

    let snapshot = ctx.engine().snapshot();
    assert!(snapshot.failure_clusters.is_empty());
    assert_eq!(snapshot.edges.get(&hosts[0]).map(|s| s.len()), Some(2));

    conn.close().await;
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_redirect_chain_follows_repeated_failover() {
    let (cluster, ctx) = context();
    let hosts = hosts(&["a", "b", "c"]);
    cluster.up(&hosts[0], true);
    cluster.up(&hosts[1], false);
    cluster.up(&hosts[2], false);

    let conn = ctx
        .connect(&config(&hosts, &[("targetServerType", "master")]))
        .await
        .unwrap();

    cluster.down(&hosts[0]);
    cluster.up(&hosts[1], true);
    ctx.engine().tick().await;
    assert_eq!(ctx.engine().resolve_master(&hosts[0]), hosts[1]);

    cluster.down(&hosts[1]);
    cluster.up(&hosts[2], true);
    ctx.engine().tick().await;

    assert_eq!(ctx.engine().resolve_master(&hosts[0]), hosts[2]);
    assert_eq!(ctx.engine().resolve_master(&hosts[1]), hosts[2]);
    assert_eq!(ctx.engine().resolve_master(&hosts[2]), hosts[2]);

    conn.close().await;
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_recovered_master_rejoins_as_standby() {
    let (cluster, ctx) = context();
    let hosts = hosts(&["a", "b", "c"]);
    cluster.up(&hosts[0], true);
    cluster.up(&hosts[1], false);
    cluster.up(&hosts[2], false);

    let conn = ctx
        .connect(&config(&hosts, &[("targetServerType", "master")]))
        .await
        .unwrap();

    cluster.down(&hosts[0]);
    cluster.up(&hosts[1], true);
    ctx.engine().tick().await;

    // a comes back, demoted
    cluster.up(&hosts[0], false);
    ctx.engine().tick().await;

    let snapshot = ctx.engine().snapshot();
    assert!(snapshot.redirects.is_empty());
    let standbys = snapshot.edges.get(&hosts[1]).cloned().unwrap_or_default();
    assert!(standbys.contains(&hosts[0]));
    assert!(standbys.contains(&hosts[2]));

    conn.close().await;
    ctx.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_loop_detects_failover() {
    let (cluster, ctx) = context();
    let hosts = hosts(&["a", "b"]);
    cluster.up(&hosts[0], true);
    cluster.up(&hosts[1], false);

    let conn = ctx
        .connect(&config(
            &hosts,
            &[("targetServerType", "master"), ("heartbeatPeriod", "1000")],
        ))
        .await
        .unwrap();
    assert!(ctx.node_cache().is_running());
    assert_eq!(ctx.node_cache().period(), Duration::from_millis(1000));

    cluster.down(&hosts[0]);
    cluster.up(&hosts[1], true);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(ctx.engine().resolve_master(&hosts[0]), hosts[1]);

    conn.close().await;
    ctx.shutdown().await;
    assert!(!ctx.node_cache().is_running());
    assert!(ctx.engine().snapshot().edges.is_empty());
}
