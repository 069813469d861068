//! Master/replica node sets
//!
//! Shared by the sentinel and replication topologies: writes go to the
//! master, reads rotate over unshielded replicas and fall back to the master.

use super::Reroute;
use crate::node::{Node, NodeRegistry};
use arc_swap::ArcSwap;
use redis_route_core::{
    error::{RedisError, RedisResult},
    types::Endpoint,
    ConnectionConfig,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Members {
    master: Option<Arc<Node>>,
    slaves: Vec<Arc<Node>>,
}

/// Atomically published master plus replicas
pub struct ReplicaSet {
    registry: Arc<NodeRegistry>,
    members: ArcSwap<Members>,
    next_read: AtomicUsize,
}

impl ReplicaSet {
    /// Create an empty set
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            members: ArcSwap::from_pointee(Members::default()),
            next_read: AtomicUsize::new(0),
        }
    }

    /// Publish a new layout.
    ///
    /// Nodes outside the layout are dropped from the registry unless listed in `keep`.
    pub fn publish(&self, master: Option<&Endpoint>, slaves: &[Endpoint], keep: &[Endpoint]) {
        let master = master.map(|e| self.registry.get_or_create(e));
        let slaves: Vec<Arc<Node>> = slaves
            .iter()
            .filter(|e| Some(*e) != master.as_ref().map(|m| m.endpoint()))
            .map(|e| self.registry.get_or_create(e))
            .collect();

        let mut retained: HashSet<Endpoint> = slaves.iter().map(|n| n.endpoint().clone()).collect();
        if let Some(master) = &master {
            retained.insert(master.endpoint().clone());
        }
        retained.extend(keep.iter().cloned());

        let previous = self.master();
        let current = master.as_ref().map(|m| m.endpoint().clone());
        if previous != current {
            info!(
                "Master changed from {:?} to {:?}",
                previous.map(|e| e.to_string()),
                current.as_ref().map(ToString::to_string)
            );
        }
        debug!("Replica set: master {:?}, {} replicas", current, slaves.len());

        self.members.store(Arc::new(Members { master, slaves }));
        self.registry.retain(&retained);
    }

    /// Configuration of the data nodes
    #[must_use]
    pub fn config(&self) -> &Arc<ConnectionConfig> {
        self.registry.config()
    }

    /// Current master endpoint
    #[must_use]
    pub fn master(&self) -> Option<Endpoint> {
        self.members
            .load()
            .master
            .as_ref()
            .map(|m| m.endpoint().clone())
    }

    /// Current replica endpoints
    #[must_use]
    pub fn slaves(&self) -> Vec<Endpoint> {
        self.members
            .load()
            .slaves
            .iter()
            .map(|n| n.endpoint().clone())
            .collect()
    }

    /// Node selection as of `now`
    pub fn select_at(&self, write: bool, now: Instant) -> RedisResult<Arc<Node>> {
        let members = self.members.load();
        if write {
            return members
                .master
                .clone()
                .ok_or_else(|| RedisError::Routing("No master available".to_string()));
        }

        if !members.slaves.is_empty() {
            let start = self.next_read.fetch_add(1, Ordering::Relaxed);
            let count = members.slaves.len();
            if let Some(slave) = (0..count)
                .map(|offset| &members.slaves[(start + offset) % count])
                .find(|node| !node.is_shielded_at(now))
            {
                return Ok(slave.clone());
            }
        }

        members
            .master
            .clone()
            .or_else(|| members.slaves.first().cloned())
            .ok_or_else(|| RedisError::Routing("No node available".to_string()))
    }

    /// Master and replicas
    #[must_use]
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        let members = self.members.load();
        members
            .master
            .iter()
            .chain(members.slaves.iter())
            .cloned()
            .collect()
    }

    /// Follow a MOVED/ASK redirect through the endpoint lookup
    pub fn redirect(&self, err: &RedisError) -> Option<Reroute> {
        let (host, port) = err.redirect_target()?;
        let node = self.registry.get_or_create(&Endpoint::new(host, port));
        Some(Reroute {
            node,
            asking: matches!(err, RedisError::Ask { .. }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn replica_set() -> ReplicaSet {
        let config = ConnectionConfig::new("10.0.0.1:6379")
            .with_retry(1)
            .with_shielding_time(Duration::from_secs(10));
        ReplicaSet::new(Arc::new(NodeRegistry::new(Arc::new(config), true)))
    }

    fn endpoint(port: u16) -> Endpoint {
        Endpoint::new("10.0.0.1", port)
    }

    #[test]
    fn test_writes_go_to_master() {
        let set = replica_set();
        set.publish(Some(&endpoint(6379)), &[endpoint(6380), endpoint(6381)], &[]);

        for _ in 0..4 {
            assert_eq!(set.select_at(true, Instant::now()).unwrap().endpoint().port, 6379);
        }
    }

    #[test]
    fn test_reads_round_robin_slaves() {
        let set = replica_set();
        set.publish(Some(&endpoint(6379)), &[endpoint(6380), endpoint(6381)], &[]);

        let now = Instant::now();
        let ports: Vec<u16> = (0..4)
            .map(|_| set.select_at(false, now).unwrap().endpoint().port)
            .collect();
        assert_eq!(ports, vec![6380, 6381, 6380, 6381]);
    }

    #[test]
    fn test_reads_skip_shielded_and_fall_back_to_master() {
        let set = replica_set();
        set.publish(Some(&endpoint(6379)), &[endpoint(6380)], &[]);
        let now = Instant::now();

        let slave = set.select_at(false, now).unwrap();
        slave.record_failure_at(now);
        assert_eq!(set.select_at(false, now).unwrap().endpoint().port, 6379);

        set.publish(Some(&endpoint(6379)), &[], &[]);
        assert_eq!(set.select_at(false, now).unwrap().endpoint().port, 6379);
    }

    #[test]
    fn test_no_master_is_routing_error() {
        let set = replica_set();
        set.publish(None, &[endpoint(6380)], &[]);
        assert!(matches!(set.select_at(true, Instant::now()), Err(RedisError::Routing(_))));
        assert_eq!(set.select_at(false, Instant::now()).unwrap().endpoint().port, 6380);
    }

    #[test]
    fn test_redirect_lookup() {
        let set = replica_set();
        let err = RedisError::parse_redirect("MOVED 12 10.0.0.9:6379").unwrap();
        let reroute = set.redirect(&err).unwrap();
        assert_eq!(reroute.node.endpoint(), &Endpoint::new("10.0.0.9", 6379));
        assert!(set.redirect(&RedisError::Timeout).is_none());
    }
}
