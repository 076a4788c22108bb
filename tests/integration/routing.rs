//! Read-write split connections

use gauss_cluster::connector::IsolationLevel;
use gauss_cluster::{ClusterConnection, RouterError};

use crate::{config, context, hosts};

const SPLIT: (&str, &str) = ("enableStatementLoadBalance", "true");

fn router(conn: &ClusterConnection) -> &gauss_cluster::ReadWriteRouter {
    conn.router().expect("split connection")
}

#[tokio::test]
async fn test_transaction_pins_write_host() {
    let (cluster, ctx) = context();
    let hosts = hosts(&["w", "r1", "r2"]);
    cluster.up(&hosts[0], true);
    cluster.up(&hosts[1], false);
    cluster.up(&hosts[2], false);

    let conn = ctx.connect(&config(&hosts, &[SPLIT])).await.unwrap();
    let router = router(&conn);
    assert_eq!(router.write_host(), &hosts[0]);

    router.manager().set_auto_commit(false).await.unwrap();
    for sql in ["SELECT * FROM t", "SELECT 1", "UPDATE t SET a = 1"] {
        assert_eq!(router.route(sql, router.manager().auto_commit()), hosts[0]);
    }

    router.manager().set_auto_commit(true).await.unwrap();
    let read = router.route("SELECT * FROM t", router.manager().auto_commit());
    assert!(router.read_hosts().contains(&read));
    assert_eq!(
        router.route("SELECT * FROM t FOR UPDATE", true),
        hosts[0]
    );

    conn.close().await;
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_lazy_connection_inherits_session_state() {
    let (cluster, ctx) = context();
    let hosts = hosts(&["w", "r1", "r2"]);
    cluster.up(&hosts[0], true);
    cluster.up(&hosts[1], false);
    cluster.up(&hosts[2], false);

    let conn = ctx.connect(&config(&hosts, &[SPLIT])).await.unwrap();
    let router = router(&conn);

    let (read, _) = router.session_for("SELECT 1").await.unwrap();
    assert_eq!(read, hosts[1]);
    assert_eq!(router.manager().hosts().await.len(), 2);

    router.manager().set_auto_commit(false).await.unwrap();
    router
        .manager()
        .set_transaction_isolation(IsolationLevel::RepeatableRead)
        .await
        .unwrap();

    // Third physical connection, created after the calls
    router.manager().get_or_connect(&hosts[2]).await.unwrap();
    let late = &cluster.sessions_for(&hosts[2])[0];
    assert!(!late.auto_commit);
    assert_eq!(late.isolation, Some(IsolationLevel::RepeatableRead));

    conn.close().await;
    assert!(cluster.sessions_for(&hosts[2])[0].closed);
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_commit_failure_is_aggregated() {
    let (cluster, ctx) = context();
    let hosts = hosts(&["w", "r1", "r2"]);
    cluster.up(&hosts[0], true);
    cluster.up(&hosts[1], false);
    cluster.up(&hosts[2], false);

    let conn = ctx.connect(&config(&hosts, &[SPLIT])).await.unwrap();
    let router = router(&conn);
    router.manager().get_or_connect(&hosts[1]).await.unwrap();
    router.manager().get_or_connect(&hosts[2]).await.unwrap();

    cluster.set_failing(&hosts[1], true);
    match router.manager().commit().await {
        Err(RouterError::Aggregate(failures)) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, hosts[1]);
        }
        other => panic!("expected aggregate error, got {:?}", other),
    }
    // Every other session was still committed
    assert_eq!(cluster.sessions_for(&hosts[0])[0].commits, 1);
    assert_eq!(cluster.sessions_for(&hosts[2])[0].commits, 1);

    conn.close().await;
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_explicit_write_host_skips_discovery() {
    let (cluster, ctx) = context();
    let hosts = hosts(&["w", "r1"]);
    cluster.up(&hosts[0], true);
    cluster.up(&hosts[1], false);

    let conn = ctx
        .connect(&config(
            &hosts,
            &[SPLIT, ("writeDataSourceAddress", "w:5432")],
        ))
        .await
        .unwrap();

    assert_eq!(router(&conn).write_host(), &hosts[0]);
    assert_eq!(cluster.connect_count(&hosts[1]), 0);

    conn.close().await;
    ctx.shutdown().await;
}
