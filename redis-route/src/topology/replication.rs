//! Master/replica deployments without sentinels
//!
//! The configured endpoints are asked for `INFO Replication`. The first node
//! reporting `role:master` takes writes; replicas it lists as online, plus
//! configured endpoints reporting `role:slave`, serve reads.

use super::info::Info;
use super::replica_set::ReplicaSet;
use super::{node_info, Reroute, Topology};
use crate::node::{Node, NodeRegistry};
use async_trait::async_trait;
use redis_route_core::{
    error::{RedisError, RedisResult},
    types::{Endpoint, NodeRole},
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Static master/replica topology
pub struct ReplicationTopology {
    registry: Arc<NodeRegistry>,
    seeds: Vec<Endpoint>,
    replicas: ReplicaSet,
}

impl ReplicationTopology {
    /// Create a topology over the configured endpoints
    pub fn new(registry: Arc<NodeRegistry>, seeds: Vec<Endpoint>) -> Self {
        Self {
            replicas: ReplicaSet::new(registry.clone()),
            registry,
            seeds,
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

    /// Publish the layout described by the `INFO Replication` replies of each endpoint
    pub fn load(&self, reports: &[(Endpoint, Info)]) -> RedisResult<()> {
        let mut master = None;
        let mut slaves: Vec<Endpoint> = Vec::new();
        let mut followed = None;

        for (endpoint, info) in reports {
            match info.role() {
                Some(NodeRole::Master) if master.is_none() => {
                    master = Some(endpoint.clone());
                    slaves.extend(info.online_slaves());
                }
                Some(NodeRole::Master) => {
                    warn!("{} also reports role:master, ignoring it", endpoint);
                }
                Some(NodeRole::Slave) => {
                    if followed.is_none() {
                        followed = info.master_endpoint();
                    }
                    slaves.push(endpoint.clone());
                }
                None => debug!("{} reports no replication role", endpoint),
            }
        }

        // every configured master unreachable: fall back to the one replicas follow
        let master = master.or(followed);
        if master.is_none() && slaves.is_empty() {
            return Err(RedisError::Routing(
                "No endpoint reported a replication role".to_string(),
            ));
        }

        slaves.sort();
        slaves.dedup();
        self.replicas.publish(master.as_ref(), &slaves, &self.seeds);
        Ok(())
    }
}

#[async_trait]
impl Topology for ReplicationTopology {
    fn name(&self) -> &'static str {
        "replication"
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
            warn!("{} is read-only, refreshing replication layout", node.endpoint());
            self.refresh().await?;
            return self.select_node(key, write).map(|n| Some(Reroute::to(n)));
        }
        Ok(self.replicas.redirect(err))
    }

    async fn refresh(&self) -> RedisResult<()> {
        let mut reports = Vec::with_capacity(self.seeds.len());
        let mut last_error = None;
        for seed in &self.seeds {
            let node = self.registry.get_or_create(seed);
            match node_info(&node, "Replication").await {
                Ok(info) => reports.push((seed.clone(), info)),
                Err(e) => {
                    debug!("INFO Replication via {} failed: {}", seed, e);
                    last_error = Some(e);
                }
            }
        }

        if reports.is_empty() {
            return Err(last_error
                .unwrap_or_else(|| RedisError::Config("No endpoints specified".to_string())));
        }
        self.load(&reports)
    }

    fn nodes(&self) -> Vec<Arc<Node>> {
        self.replicas.nodes()
    }
}
