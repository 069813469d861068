//! Routing of commands to server nodes
//!
//! A [`Topology`] maps a command key to the node that should serve it and
//! reacts to routing signals (MOVED, ASK, READONLY) reported by servers.
//! Each implementation publishes immutable snapshots through an atomic
//! swap, so routing never waits on a refresh in progress.
//!
//! Standalone deployments use no topology at all; the executor rotates over
//! the configured endpoints instead.

pub mod cluster;
pub mod info;
pub mod replica_set;
pub mod replication;
pub mod sentinel;

pub use cluster::{calculate_slot, ClusterTopology, CLUSTER_SLOTS};
pub use info::Info;
pub use replication::ReplicationTopology;
pub use sentinel::SentinelTopology;

use crate::connection::RedisConnection;
use crate::node::{Node, NodeRegistry};
use crate::protocol::Cmd;
use async_trait::async_trait;
use redis_route_core::{
    config::{ConnectionConfig, TopologyMode},
    error::{RedisError, RedisResult},
    types::{Endpoint, NodeRole},
};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where to send a command after a routing signal
#[derive(Debug, Clone)]
pub struct Reroute {
    /// Node to retry on
    pub node: Arc<Node>,
    /// Send `ASKING` before the command
    pub asking: bool,
}

impl Reroute {
    /// Retry on `node` without ASKING
    pub fn to(node: Arc<Node>) -> Self {
        Self { node, asking: false }
    }
}

/// Node selection strategy for one deployment kind
#[async_trait]
pub trait Topology: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Pick the node for a command on `key` (`None` for keyless commands)
    fn select_node(&self, key: Option<&[u8]>, write: bool) -> RedisResult<Arc<Node>>;

    /// Resolve a routing signal returned by `node`.
    ///
    /// Returns `None` when `err` is not a signal this topology handles; the
    /// error is then surfaced to the caller.
    async fn reselect(
        &self,
        key: Option<&[u8]>,
        write: bool,
        node: &Arc<Node>,
        err: &RedisError,
    ) -> RedisResult<Option<Reroute>>;

    /// Re-read the deployment layout from the servers
    async fn refresh(&self) -> RedisResult<()>;

    /// Every node in the current snapshot
    fn nodes(&self) -> Vec<Arc<Node>>;
}

/// Work out the deployment kind from an `INFO` reply of the first reachable endpoint
pub async fn detect_mode(
    config: &Arc<ConnectionConfig>,
    endpoints: &[Endpoint],
) -> RedisResult<TopologyMode> {
    let mut last_error = None;
    for endpoint in endpoints {
        // sentinels usually run without the data nodes' password
        let reply = match fetch_info(endpoint, config, None).await {
            Err(RedisError::Auth(reason)) if has_credentials(config) => {
                debug!("{} rejected credentials ({}), retrying without", endpoint, reason);
                fetch_info(endpoint, &without_credentials(config), None).await
            }
            other => other,
        };
        let info = match reply {
            Ok(info) => info,
            Err(e) => {
                debug!("Mode detection could not reach {}: {}", endpoint, e);
                last_error = Some(e);
                continue;
            }
        };

        let mode = classify(&info, endpoints.len());
        info!("Detected {:?} deployment via {}", mode, endpoint);
        return Ok(mode);
    }

    Err(last_error.unwrap_or_else(|| RedisError::Config("No endpoints specified".to_string())))
}

fn classify(info: &Info, endpoint_count: usize) -> TopologyMode {
    match info.redis_mode() {
        Some("cluster") => TopologyMode::Cluster,
        Some("sentinel") => TopologyMode::Sentinel,
        _ => {
            let replicated =
                info.role() == Some(NodeRole::Slave) || info.connected_slaves() > 0;
            if replicated && endpoint_count > 1 {
                TopologyMode::Replication
            } else {
                TopologyMode::Standalone
            }
        }
    }
}

fn has_credentials(config: &ConnectionConfig) -> bool {
    config.username.is_some() || config.password.is_some()
}

/// Copy of `config` that skips AUTH, for talking to sentinels
pub(crate) fn without_credentials(config: &ConnectionConfig) -> Arc<ConnectionConfig> {
    let mut anonymous = config.clone();
    anonymous.username = None;
    anonymous.password = None;
    Arc::new(anonymous)
}

/// Run `INFO [section]` on a short-lived connection
pub(crate) async fn fetch_info(
    endpoint: &Endpoint,
    config: &Arc<ConnectionConfig>,
    section: Option<&str>,
) -> RedisResult<Info> {
    let mut conn = RedisConnection::connect(endpoint.clone(), config.clone(), false).await?;
    let mut cmd = Cmd::new("INFO");
    if let Some(section) = section {
        cmd = cmd.arg(section);
    }
    let reply = conn.query(&cmd).await;
    conn.close();
    Ok(Info::parse(&reply?.as_string()?))
}

/// Run `INFO [section]` through a node's pool
pub(crate) async fn node_info(node: &Node, section: &str) -> RedisResult<Info> {
    let mut conn = node.get().await?;
    let reply = conn.query(&Cmd::new("INFO").arg(section)).await?;
    Ok(Info::parse(&reply.as_string()?))
}

/// Build the topology for `mode`, loading its first snapshot.
///
/// Returns `None` for standalone deployments.
pub async fn create(
    mode: TopologyMode,
    config: &Arc<ConnectionConfig>,
    registry: &Arc<NodeRegistry>,
) -> RedisResult<Option<Arc<dyn Topology>>> {
    let seeds = config.endpoints()?;
    let topology: Arc<dyn Topology> = match mode {
        TopologyMode::Standalone | TopologyMode::Auto => return Ok(None),
        TopologyMode::Cluster => Arc::new(ClusterTopology::new(registry.clone(), seeds)),
        TopologyMode::Sentinel => Arc::new(SentinelTopology::new(
            registry.clone(),
            seeds,
            config.master_name.clone(),
        )),
        TopologyMode::Replication => {
            Arc::new(ReplicationTopology::new(registry.clone(), seeds))
        }
    };
    topology.refresh().await?;
    Ok(Some(topology))
}

/// Refresh `topology` in the background until it is dropped
pub fn spawn_refresh(
    topology: &Arc<dyn Topology>,
    first: Duration,
    every: Duration,
) -> JoinHandle<()> {
    let weak: Weak<dyn Topology> = Arc::downgrade(topology);
    tokio::spawn(async move {
        let mut delay = first;
        loop {
            tokio::time::sleep(delay).await;
            delay = every;

            let Some(topology) = weak.upgrade() else {
                break;
            };
            match topology.refresh().await {
                Ok(()) => debug!("Refreshed {} topology", topology.name()),
                Err(e) => warn!("Failed to refresh {} topology: {}", topology.name(), e),
            }
        }
    })
}
