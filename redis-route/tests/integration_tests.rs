//! Integration tests for redis-route
//!
//! Most tests run against the scripted server in `common`. Tests marked
//! `#[ignore]` need a real Redis instance: set REDIS_URL or use the default
//! redis://localhost:6379 and run with `--ignored`.

mod common;

use common::{
    bulk, closed_port, cluster_node_line, MockServer, Reply, CLUSTER_INFO, STANDALONE_INFO,
};
use redis_route::{
    cmd, Client, ConnectionConfig, PipelineReply, PoolConfig, RedisError, RespValue, TopologyMode,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

fn config_for(servers: &[&MockServer]) -> ConnectionConfig {
    let addresses: Vec<String> = servers.iter().map(|s| s.address()).collect();
    ConnectionConfig::new(addresses.join(","))
        .with_connect_timeout(Duration::from_millis(500))
        .with_operation_timeout(Duration::from_millis(500))
}

#[tokio::test]
async fn test_standalone_basic_commands() {
    let server = MockServer::start(STANDALONE_INFO).await;
    let client = Client::connect(config_for(&[&server])).await.unwrap();

    assert_eq!(client.mode().await.unwrap(), TopologyMode::Standalone);
    assert_eq!(client.ping().await.unwrap(), "PONG");

    assert!(client.set("greeting", "hello").await.unwrap());
    assert_eq!(client.get("greeting").await.unwrap().as_deref(), Some("hello"));
    assert_eq!(client.exists(&["greeting", "missing"]).await.unwrap(), 1);

    assert_eq!(client.incr("hits").await.unwrap(), 1);
    assert_eq!(client.incr_by("hits", 9).await.unwrap(), 10);

    assert_eq!(client.del(&["greeting", "hits"]).await.unwrap(), 2);
    assert_eq!(client.get("greeting").await.unwrap(), None);
}

#[tokio::test]
async fn test_set_with_expiration() {
    let server = MockServer::start(STANDALONE_INFO).await;
    let client = Client::connect(config_for(&[&server])).await.unwrap();

    assert!(client
        .set_ex("session", "abc", Duration::from_millis(150))
        .await
        .unwrap());
    assert!(server
        .commands()
        .contains(&vec!["SET".into(), "session".into(), "abc".into(), "PX".into(), "150".into()]));
    assert_eq!(client.get("session").await.unwrap().as_deref(), Some("abc"));
    assert_eq!(client.ttl("session").await.unwrap(), Some(1));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.get("session").await.unwrap(), None);
    assert_eq!(client.ttl("session").await.unwrap(), None);
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    visits: u32,
}

#[tokio::test]
async fn test_json_values() {
    let server = MockServer::start(STANDALONE_INFO).await;
    let client = Client::connect(config_for(&[&server])).await.unwrap();

    let profile = Profile {
        name: "ada".to_string(),
        visits: 3,
    };
    assert!(client.set_json("profile:1", &profile, None).await.unwrap());
    assert_eq!(
        client.get_json::<Profile>("profile:1").await.unwrap(),
        Some(profile)
    );
    assert_eq!(client.get_json::<Profile>("profile:2").await.unwrap(), None);
}

#[tokio::test]
async fn test_pipeline_sizes() {
    let server = MockServer::start(STANDALONE_INFO).await;
    let client = Client::connect(config_for(&[&server])).await.unwrap();

    for n in [0usize, 1, 2, 100] {
        let key = format!("counter:{}", n);
        let mut pipeline = client.start_pipeline();
        let mut queued = Vec::with_capacity(n);
        for _ in 0..n {
            queued.push(pipeline.incr(&key).await.unwrap());
        }
        assert_eq!(pipeline.len(), n);

        let mut results = pipeline.commit(true).await.unwrap();
        assert_eq!(results.len(), n);
        for (i, reply) in queued.into_iter().enumerate() {
            assert_eq!(results.take(reply).unwrap(), i as i64 + 1);
        }
    }
    assert_eq!(server.count("INCR"), 103);
}

#[tokio::test]
async fn test_pipeline_read_flushes_writes() {
    let server = MockServer::start(STANDALONE_INFO).await;
    let client = Client::connect(config_for(&[&server])).await.unwrap();

    let mut pipeline = client.start_pipeline();
    let set = pipeline.set("color", "blue").await.unwrap();
    assert_eq!(pipeline.len(), 1);
    assert_eq!(server.count("SET"), 0);

    let reply = pipeline
        .execute::<Option<String>>(Some(&b"color"[..]), cmd("GET").arg("color"), false)
        .await
        .unwrap();
    match reply {
        PipelineReply::Ready(value) => assert_eq!(value.as_deref(), Some("blue")),
        PipelineReply::Queued(_) => panic!("read was buffered"),
    }
    assert!(pipeline.is_empty());

    let mut results = pipeline.commit(true).await.unwrap();
    results.take(set).unwrap();
}

#[tokio::test]
async fn test_pipeline_set_ex_keeps_milliseconds() {
    let server = MockServer::start(STANDALONE_INFO).await;
    let client = Client::connect(config_for(&[&server])).await.unwrap();

    let mut pipeline = client.start_pipeline();
    let set = pipeline
        .set_ex("token", "t", Duration::from_millis(1500))
        .await
        .unwrap();
    pipeline.commit(true).await.unwrap().take(set).unwrap();

    assert!(server
        .commands()
        .contains(&vec!["SET".into(), "token".into(), "t".into(), "PX".into(), "1500".into()]));
}

#[tokio::test]
async fn test_auto_pipeline_threshold() {
    let server = MockServer::start(STANDALONE_INFO).await;
    let client = Client::connect(config_for(&[&server]).with_auto_pipeline(3))
        .await
        .unwrap();

    let mut pipeline = client.start_pipeline();
    for i in 0..3 {
        pipeline.set(&format!("k{}", i), i as i64).await.unwrap();
    }
    assert!(pipeline.is_empty());
    assert_eq!(server.count("SET"), 3);

    pipeline.set("k3", 3i64).await.unwrap();
    assert_eq!(pipeline.len(), 1);
    let results = pipeline.commit(false).await.unwrap();
    assert!(results.is_empty());
    assert_eq!(server.count("SET"), 4);
}

#[tokio::test]
async fn test_pipeline_error_reply_stays_in_place() {
    let server = MockServer::start_with(STANDALONE_INFO, |args| {
        if args[0] == "INCR" && args[1] == "bad" {
            Reply::Raw("-ERR value is not an integer or out of range\r\n".to_string())
        } else {
            Reply::Default
        }
    })
    .await;
    let client = Client::connect(config_for(&[&server])).await.unwrap();

    let mut pipeline = client.start_pipeline();
    let first = pipeline.incr("good").await.unwrap();
    let failed = pipeline.incr("bad").await.unwrap();
    let second = pipeline.incr("good").await.unwrap();

    let mut results = pipeline.commit(true).await.unwrap();
    assert_eq!(results.take(first).unwrap(), 1);
    assert!(matches!(results.take(failed), Err(RedisError::Server(_))));
    assert_eq!(results.take(second).unwrap(), 2);
}

#[tokio::test]
async fn test_failed_flush_keeps_placeholders_aligned() {
    let server = MockServer::start_with(STANDALONE_INFO, |args| {
        if args[0] == "INCR" && args[1] == "boom" {
            Reply::Close
        } else {
            Reply::Default
        }
    })
    .await;
    let client = Client::connect(config_for(&[&server]).with_retry(0))
        .await
        .unwrap();

    let mut pipeline = client.start_pipeline();
    let lost = pipeline.incr("boom").await.unwrap();
    let flushed = pipeline
        .execute::<Option<String>>(Some(&b"other"[..]), cmd("GET").arg("other"), false)
        .await;
    assert!(flushed.is_err());
    assert!(pipeline.is_empty());

    let counted = pipeline.incr("n").await.unwrap();
    let mut results = pipeline.commit(true).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(matches!(results.take(lost), Err(RedisError::Server(_))));
    assert_eq!(results.take(counted).unwrap(), 1);
}

#[tokio::test]
async fn test_fails_over_to_next_endpoint() {
    let dead = closed_port().await;
    let server = MockServer::start(STANDALONE_INFO).await;
    let config = ConnectionConfig::new(format!("127.0.0.1:{},{}", dead, server.address()))
        .with_topology_mode(TopologyMode::Standalone)
        .with_connect_timeout(Duration::from_millis(500));
    let client = Client::connect(config).await.unwrap();

    assert!(client.set("key", "value").await.unwrap());
    assert_eq!(client.get("key").await.unwrap().as_deref(), Some("value"));
    assert_eq!(server.count("SET"), 1);
    assert_eq!(server.count("GET"), 1);
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let server = MockServer::start_with(STANDALONE_INFO, |args| {
        if args[0] == "BOOM" {
            Reply::Raw("-ERR boom\r\n".to_string())
        } else {
            Reply::Default
        }
    })
    .await;
    let client = Client::connect(config_for(&[&server])).await.unwrap();

    let err = client
        .execute::<RespValue>(None, true, &cmd("BOOM"))
        .await
        .unwrap_err();
    assert!(matches!(err, RedisError::Server(ref msg) if msg.contains("boom")));
    assert_eq!(server.count("BOOM"), 1);

    // the connection is still usable
    assert_eq!(client.ping().await.unwrap(), "PONG");
}

#[tokio::test]
async fn test_timeout_is_retried_then_surfaced() {
    let server = MockServer::start_with(STANDALONE_INFO, |args| {
        if args[0] == "SLOW" {
            Reply::Hang
        } else {
            Reply::Default
        }
    })
    .await;
    let config = config_for(&[&server])
        .with_operation_timeout(Duration::from_millis(100))
        .with_retry(1);
    let client = Client::connect(config).await.unwrap();

    let err = client
        .execute::<RespValue>(None, true, &cmd("SLOW"))
        .await
        .unwrap_err();
    assert!(matches!(err, RedisError::Timeout));
    assert_eq!(server.count("SLOW"), 2);

    // the timed-out connections were discarded, not reused out of sync
    assert_eq!(client.ping().await.unwrap(), "PONG");
}

#[tokio::test]
async fn test_best_effort_write_returns_default() {
    let server = MockServer::start_with(STANDALONE_INFO, |args| {
        if args[0] == "SET" {
            Reply::Close
        } else {
            Reply::Default
        }
    })
    .await;
    let config = config_for(&[&server])
        .with_retry(1)
        .with_throw_on_failure(false);
    let client = Client::connect(config).await.unwrap();

    assert!(!client.set("key", "value").await.unwrap());
    assert_eq!(server.count("SET"), 2);
}

#[tokio::test]
async fn test_oversized_value_is_never_sent() {
    let server = MockServer::start(STANDALONE_INFO).await;
    let client = Client::connect(config_for(&[&server]).with_max_message_size(1024))
        .await
        .unwrap();

    let err = client.set("big", "x".repeat(2048)).await.unwrap_err();
    assert!(matches!(err, RedisError::Capacity { size: 2048, max: 1024 }));
    assert_eq!(server.count("SET"), 0);

    assert!(client.set("small", "x".repeat(512)).await.unwrap());
}

#[tokio::test]
async fn test_cancelled_before_sending() {
    let server = MockServer::start(STANDALONE_INFO).await;
    let client = Client::connect(config_for(&[&server])).await.unwrap();

    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let err = client
        .execute_cancellable::<RespValue>(None, false, &cmd("PING"), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, RedisError::Cancelled));
    assert_eq!(server.count("PING"), 0);
}

#[tokio::test]
async fn test_pool_connections_are_never_shared() {
    let server = MockServer::start(STANDALONE_INFO).await;
    let config = config_for(&[&server]).with_pool_config(PoolConfig {
        max_size: 2,
        ..PoolConfig::default()
    });
    let client = Client::connect(config).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move { client.incr("shared").await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(client.get("shared").await.unwrap().as_deref(), Some("20"));
    // one short-lived detection connection plus at most two pooled ones
    assert!(server.connections() <= 3);
    let stats = client.pool_stats().await.unwrap();
    assert_eq!(stats.len(), 1);
    assert!(stats[0].1.total <= 2);
}

/// Start a seed node `a` owning `a_slots` and a second node `b` owning
/// `b_slots`; both answer `CLUSTER NODES` with the same layout
async fn cluster_pair<F, G>(
    a_slots: &'static str,
    b_slots: &'static str,
    a_hook: F,
    b_hook: G,
) -> (MockServer, MockServer)
where
    F: Fn(&[String], u16) -> Reply + Send + Sync + 'static,
    G: Fn(&[String]) -> Reply + Send + Sync + 'static,
{
    let layout: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
    let nodes_reply = |layout: &Arc<OnceLock<String>>, args: &[String]| {
        (args[0] == "CLUSTER" && args.get(1).map(String::as_str) == Some("NODES"))
            .then(|| Reply::Raw(bulk(layout.get().map_or("", String::as_str))))
    };

    let b = MockServer::start_with(CLUSTER_INFO, {
        let layout = layout.clone();
        move |args| nodes_reply(&layout, args).unwrap_or_else(|| b_hook(args))
    })
    .await;
    let b_port = b.endpoint.port;

    let a = MockServer::start_with(CLUSTER_INFO, {
        let layout = layout.clone();
        move |args| nodes_reply(&layout, args).unwrap_or_else(|| a_hook(args, b_port))
    })
    .await;

    let nodes = cluster_node_line("a0", a.endpoint.port, true, a_slots)
        + &cluster_node_line("b0", b_port, false, b_slots);
    layout.set(nodes).unwrap();
    (a, b)
}

#[tokio::test]
async fn test_cluster_moved_updates_slot_map() {
    let (a, b) = cluster_pair(
        "0-16383",
        "",
        |args, b_port| {
            if args[0] == "GET" {
                // slot of "foo"
                Reply::Raw(format!("-MOVED 12182 127.0.0.1:{}\r\n", b_port))
            } else {
                Reply::Default
            }
        },
        |args| {
            if args[0] == "GET" {
                Reply::Raw(bulk("from-b"))
            } else {
                Reply::Default
            }
        },
    )
    .await;
    let client = Client::connect(config_for(&[&a])).await.unwrap();
    assert_eq!(client.mode().await.unwrap(), TopologyMode::Cluster);

    assert_eq!(client.get("foo").await.unwrap().as_deref(), Some("from-b"));
    assert_eq!(client.get("foo").await.unwrap().as_deref(), Some("from-b"));
    assert_eq!(a.count("GET"), 1);
    assert_eq!(b.count("GET"), 2);
}

#[tokio::test]
async fn test_cluster_ask_is_one_shot() {
    let (a, b) = cluster_pair(
        "0-16383",
        "",
        |args, b_port| {
            if args[0] == "GET" {
                Reply::Raw(format!("-ASK 12182 127.0.0.1:{}\r\n", b_port))
            } else {
                Reply::Default
            }
        },
        |args| {
            if args[0] == "GET" {
                Reply::Raw(bulk("importing"))
            } else {
                Reply::Default
            }
        },
    )
    .await;
    let client = Client::connect(config_for(&[&a])).await.unwrap();

    assert_eq!(client.get("foo").await.unwrap().as_deref(), Some("importing"));
    assert_eq!(client.get("foo").await.unwrap().as_deref(), Some("importing"));
    // the slot stays with the seed node; each GET is asked for again
    assert_eq!(a.count("GET"), 2);
    assert_eq!(b.count("ASKING"), 2);
    assert_eq!(b.count("GET"), 2);
}

#[tokio::test]
async fn test_cluster_pipeline_splits_by_node() {
    let (a, b) = cluster_pair("0-8191", "8192-16383", |_, _| Reply::Default, |_| Reply::Default).await;
    let client = Client::connect(config_for(&[&a])).await.unwrap();

    let mut pipeline = client.start_pipeline();
    // "bar" hashes to slot 5061, "foo" to 12182
    let bar = pipeline.incr("bar").await.unwrap();
    let foo = pipeline.incr("foo").await.unwrap();
    let bar_again = pipeline.incr("bar").await.unwrap();

    let mut results = pipeline.commit(true).await.unwrap();
    assert_eq!(results.take(bar).unwrap(), 1);
    assert_eq!(results.take(foo).unwrap(), 1);
    assert_eq!(results.take(bar_again).unwrap(), 2);
    assert_eq!(a.count("INCR"), 2);
    assert_eq!(b.count("INCR"), 1);
}

#[tokio::test]
async fn test_cluster_admin_commands() {
    let (a, b) = cluster_pair("0-16383", "", |_, _| Reply::Default, |args| {
        if args[0] == "CLUSTER" {
            Reply::Raw("+OK\r\n".to_string())
        } else {
            Reply::Default
        }
    })
    .await;
    let client = Client::connect(config_for(&[&a])).await.unwrap();

    let nodes = client.cluster_nodes().await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert!(nodes.iter().any(|n| n.endpoint == a.endpoint));

    client.cluster_add_slots(&b.endpoint, &[1, 2, 3]).await.unwrap();
    client.cluster_meet(&b.endpoint, "127.0.0.1", a.endpoint.port).await.unwrap();
    let admin: Vec<Vec<String>> = b
        .commands()
        .into_iter()
        .filter(|args| args[0] == "CLUSTER" && args[1] != "NODES")
        .collect();
    assert_eq!(admin.len(), 2);
    assert_eq!(admin[0], vec!["CLUSTER", "ADDSLOTS", "1", "2", "3"]);
    assert_eq!(admin[1][1], "MEET");

    let err = client.cluster_del_slots(&b.endpoint, &[]).await.unwrap_err();
    assert!(matches!(err, RedisError::Config(_)));
}

fn master_info(replica_port: u16) -> String {
    format!(
        "# Replication\r\nrole:master\r\nconnected_slaves:1\r\nslave0:ip=127.0.0.1,port={},state=online,offset=1,lag=0\r\n",
        replica_port
    )
}

const REPLICA_INFO: &str = "# Replication\r\nrole:slave\r\nmaster_link_status:up\r\n";

#[tokio::test]
async fn test_replication_splits_reads_and_writes() {
    let replica = MockServer::start_with(REPLICA_INFO, |args| {
        if args[0] == "GET" {
            Reply::Raw(bulk("from-replica"))
        } else {
            Reply::Default
        }
    })
    .await;
    let master = MockServer::start(&master_info(replica.endpoint.port)).await;
    let client = Client::connect(config_for(&[&master, &replica])).await.unwrap();

    assert_eq!(client.mode().await.unwrap(), TopologyMode::Replication);
    assert!(client.set("k", "v").await.unwrap());
    assert_eq!(client.get("k").await.unwrap().as_deref(), Some("from-replica"));
    assert_eq!(master.count("SET"), 1);
    assert_eq!(master.count("GET"), 0);
    assert_eq!(replica.count("SET"), 0);
}

#[tokio::test]
async fn test_readonly_master_gives_up_after_bounded_hops() {
    let replica = MockServer::start(REPLICA_INFO).await;
    let master = MockServer::start_with(&master_info(replica.endpoint.port), |args| {
        if args[0] == "SET" {
            Reply::Raw("-READONLY You can't write against a read only replica.\r\n".to_string())
        } else {
            Reply::Default
        }
    })
    .await;
    let client = Client::connect(config_for(&[&master, &replica]).with_max_redirects(1))
        .await
        .unwrap();

    let err = client.set("k", "v").await.unwrap_err();
    // two nodes plus one extra redirect
    assert!(matches!(err, RedisError::MaxRedirects(3)));
    assert_eq!(master.count("SET"), 4);
}

#[tokio::test]
async fn test_sentinel_resolves_master() {
    let master = MockServer::start(STANDALONE_INFO).await;
    let sentinel_info = format!(
        "# Server\r\nredis_mode:sentinel\r\n# Sentinel\r\nsentinel_masters:2\r\nmaster0:name=other,status=ok,address=127.0.0.1:1,slaves=0,sentinels=1\r\nmaster1:name=mymaster,status=ok,address={},slaves=0,sentinels=1\r\n",
        master.address()
    );
    let sentinel = MockServer::start(&sentinel_info).await;
    let config = config_for(&[&sentinel]).with_master_name("mymaster");
    let client = Client::connect(config).await.unwrap();

    assert_eq!(client.mode().await.unwrap(), TopologyMode::Sentinel);
    assert!(client.set("k", "v").await.unwrap());
    assert_eq!(client.get("k").await.unwrap().as_deref(), Some("v"));
    assert_eq!(master.count("SET"), 1);
    assert_eq!(sentinel.count("SET"), 0);
}

#[tokio::test]
async fn test_sentinel_without_password_is_detected() {
    let master = MockServer::start(STANDALONE_INFO).await;
    let sentinel_info = format!(
        "# Server\r\nredis_mode:sentinel\r\n# Sentinel\r\nmaster0:name=mymaster,status=ok,address={},slaves=0,sentinels=1\r\n",
        master.address()
    );
    let sentinel = MockServer::start_with(&sentinel_info, |args| {
        if args[0] == "AUTH" {
            Reply::Raw(
                "-ERR AUTH <password> called without any password configured for the default user\r\n"
                    .to_string(),
            )
        } else {
            Reply::Default
        }
    })
    .await;
    let config = config_for(&[&sentinel]).with_password("secret");
    let client = Client::connect(config).await.unwrap();

    assert_eq!(client.mode().await.unwrap(), TopologyMode::Sentinel);
    assert!(client.set("k", "v").await.unwrap());
    assert_eq!(master.count("SET"), 1);
    assert!(master.count("AUTH") >= 1);
    // only the first detection attempt carried the password
    assert_eq!(sentinel.count("AUTH"), 1);
}

#[test]
fn test_blocking_client() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(MockServer::start(STANDALONE_INFO));
    let config = config_for(&[&server]);

    let client = redis_route::blocking::Client::connect(config).unwrap();
    assert!(client.set("sync", "yes").unwrap());
    assert_eq!(client.get("sync").unwrap().as_deref(), Some("yes"));

    let mut pipeline = client.start_pipeline();
    pipeline
        .execute::<i64>(Some(&b"n"[..]), cmd("INCR").arg("n"), true)
        .unwrap();
    assert_eq!(pipeline.commit(true).unwrap().into_values(), vec![RespValue::Integer(1)]);

    drop(client);
    drop(server);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_blocking_client_dropped_in_async_context() {
    let server = MockServer::start(STANDALONE_INFO).await;
    let config = config_for(&[&server]);

    let client = tokio::task::spawn_blocking(move || {
        let client = redis_route::blocking::Client::connect(config).unwrap();
        assert!(client.set("sync", "yes").unwrap());
        client
    })
    .await
    .unwrap();

    let pipeline = client.start_pipeline();
    drop(client);
    drop(pipeline);
    assert_eq!(server.count("SET"), 1);
}

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

#[tokio::test]
#[ignore]
async fn test_live_set_get_expire() {
    let client = Client::connect(ConnectionConfig::new(redis_url()))
        .await
        .expect("Failed to connect");

    client
        .set_ex("test:live:key", "value", Duration::from_secs(1))
        .await
        .expect("SET failed");
    assert_eq!(
        client.get("test:live:key").await.unwrap().as_deref(),
        Some("value")
    );

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(client.get("test:live:key").await.unwrap(), None);
}

#[tokio::test]
#[ignore]
async fn test_live_pipeline() {
    let client = Client::connect(ConnectionConfig::new(redis_url()))
        .await
        .expect("Failed to connect");
    client.del(&["test:live:counter"]).await.unwrap();

    let mut pipeline = client.start_pipeline();
    let replies: Vec<_> = {
        let mut replies = Vec::new();
        for _ in 0..50 {
            replies.push(pipeline.incr("test:live:counter").await.unwrap());
        }
        replies
    };
    let mut results = pipeline.commit(true).await.unwrap();
    for (i, reply) in replies.into_iter().enumerate() {
        assert_eq!(results.take(reply).unwrap(), i as i64 + 1);
    }
    client.del(&["test:live:counter"]).await.unwrap();
}
