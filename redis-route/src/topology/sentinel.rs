//! Redis Sentinel support
//!
//! Sentinels are asked for the current master with `INFO Sentinel`; the
//! master is then asked for its online replicas with `INFO Replication`.
//! A `-READONLY` reply to a write means a failover demoted our master, so
//! the layout is refreshed before the command is retried.

use super::info::SentinelMaster;
use super::replica_set::ReplicaSet;
use super::{fetch_info, node_info, without_credentials, Reroute, Topology};
use crate::node::{Node, NodeRegistry};
use async_trait::async_trait;
use redis_route_core::{
    error::{RedisError, RedisResult},
    types::Endpoint,
    ConnectionConfig,
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Topology discovered through sentinels
pub struct SentinelTopology {
    sentinels: Vec<Endpoint>,
    sentinel_config: Arc<ConnectionConfig>,
    master_name: Option<String>,
    replicas: ReplicaSet,
}

impl SentinelTopology {
    /// Create a topology; `sentinels` are the configured endpoints
    pub fn new(
        registry: Arc<NodeRegistry>,
        sentinels: Vec<Endpoint>,
        master_name: Option<String>,
    ) -> Self {
        // data-node AUTH is never sent to sentinels
        let sentinel_config = without_credentials(registry.config());
        Self {
            sentinels,
            sentinel_config,
            master_name,
            replicas: ReplicaSet::new(registry),
        }
    }

    /// Current master endpoint
    #[must_use]
    pub fn master(&self) -> Option<Endpoint> {
        self.replicas.master()
    }

    /// Current replica endpoints
    #[must_use]
    pub fn slaves(&self) -> Vec<Endpoint> {
        self.replicas.slaves()
    }

    /// Pick the monitored master this client follows
    pub fn choose_master<'a>(
        &self,
        masters: &'a [SentinelMaster],
    ) -> RedisResult<&'a SentinelMaster> {
        let chosen = match &self.master_name {
            Some(name) => masters.iter().find(|m| &m.name == name),
            None => masters.iter().find(|m| m.healthy).or_else(|| masters.first()),
        };
        chosen.ok_or_else(|| {
            RedisError::Sentinel(format!(
                "Sentinel does not monitor master {:?}",
                self.master_name
            ))
        })
    }

    fn replicas_config(&self) -> &Arc<ConnectionConfig> {
        self.replicas.config()
    }

    async fn discover_master(&self) -> RedisResult<Endpoint> {
        let mut last_error = None;
        for sentinel in &self.sentinels {
            let info = match fetch_info(sentinel, &self.sentinel_config, Some("Sentinel")).await {
                Ok(info) => info,
                Err(e) => {
                    debug!("Sentinel {} unreachable: {}", sentinel, e);
                    last_error = Some(e);
                    continue;
                }
            };
            match self.choose_master(&info.sentinel_masters()) {
                Ok(master) => {
                    if !master.healthy {
                        warn!("Sentinel {} reports master {} as unhealthy", sentinel, master.name);
                    }
                    return Ok(master.address.clone());
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| RedisError::Sentinel("No sentinel configured".to_string())))
    }
}

#[async_trait]
impl Topology for SentinelTopology {
    fn name(&self) -> &'static str {
        "sentinel"
    }

    fn select_node(&self, _key: Option<&[u8]>, write: bool) -> RedisResult<Arc<Node>> {
        self.replicas.select_at(write, Instant::now())
    }

    async fn reselect(
        &self,
        key: Option<&[u8]>,
        write: bool,
        node: &Arc<Node>,
        err: &RedisError,
    ) -> RedisResult<Option<Reroute>> {
        if err.is_readonly() {
            warn!("{} is read-only, refreshing master", node.endpoint());
            self.refresh().await?;
            return self.select_node(key, write).map(|n| Some(Reroute::to(n)));
        }
        Ok(self.replicas.redirect(err))
    }

    async fn refresh(&self) -> RedisResult<()> {
        let master = self.discover_master().await?;
        let master_node = self.replicas.nodes().into_iter().find(|n| n.endpoint() == &master);
        let slaves = match master_node {
            Some(node) => node_info(&node, "Replication").await,
            None => fetch_info(&master, self.replicas_config(), Some("Replication")).await,
        }
        .map(|info| info.online_slaves())
        .unwrap_or_else(|e| {
            warn!("Could not list replicas of {}: {}", master, e);
            Vec::new()
        });

        self.replicas.publish(Some(&master), &slaves, &[]);
        Ok(())
    }

    fn nodes(&self) -> Vec<Arc<Node>> {
        self.replicas.nodes()
    }
}
