//! Server nodes and their health
//!
//! A [`Node`] is one server endpoint with its connection pool and a
//! consecutive-error counter. Once the counter reaches the retry threshold
//! the node is shielded: routing skips it until the shield window ends.
//!
//! Nodes live in a [`NodeRegistry`] keyed by endpoint, so pools and health
//! survive topology refreshes that only reshuffle roles or slots.

use crate::pool::{ConnectionPool, PoolStats, PooledConnection};
use parking_lot::Mutex;
use redis_route_core::{config::ConnectionConfig, error::RedisResult, types::Endpoint};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Health {
    consecutive_errors: usize,
    shield_until: Option<Instant>,
}

/// A server endpoint with its pool and health counters
pub struct Node {
    endpoint: Endpoint,
    config: Arc<ConnectionConfig>,
    select_database: bool,
    pool: OnceLock<ConnectionPool>,
    health: Mutex<Health>,
}

impl Node {
    /// Create a node; the pool is created on first use
    pub fn new(endpoint: Endpoint, config: Arc<ConnectionConfig>, select_database: bool) -> Self {
        Self {
            endpoint,
            config,
            select_database,
            pool: OnceLock::new(),
            health: Mutex::new(Health::default()),
        }
    }

    /// Endpoint of this node
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Connection pool of this node
    pub fn pool(&self) -> &ConnectionPool {
        self.pool.get_or_init(|| {
            ConnectionPool::new(
                self.endpoint.clone(),
                self.config.clone(),
                self.select_database,
            )
        })
    }

    /// Borrow a connection from this node's pool
    pub async fn get(&self) -> RedisResult<PooledConnection> {
        self.pool().get().await
    }

    /// Pool counters, all zero before the first borrow
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.get().map(ConnectionPool::stats).unwrap_or_default()
    }

    /// Reset the error counter after a successful command
    pub fn record_success(&self) {
        let mut health = self.health.lock();
        if health.consecutive_errors > 0 {
            debug!("Node {} recovered", self.endpoint);
        }
        health.consecutive_errors = 0;
    }

    /// Count a socket fault; returns true if the node became shielded
    pub fn record_failure(&self) -> bool {
        self.record_failure_at(Instant::now())
    }

    /// Count a socket fault observed at `now`
    pub fn record_failure_at(&self, now: Instant) -> bool {
        let threshold = self.config.retry.retry.max(1);
        let mut health = self.health.lock();
        health.consecutive_errors += 1;
        if health.consecutive_errors < threshold {
            return false;
        }

        health.consecutive_errors = 0;
        health.shield_until = Some(now + self.config.shielding_time);
        warn!(
            "Node {} shielded for {:?} after {} consecutive errors",
            self.endpoint, self.config.shielding_time, threshold
        );
        true
    }

    /// Whether routing should currently skip this node
    #[must_use]
    pub fn is_shielded(&self) -> bool {
        self.is_shielded_at(Instant::now())
    }

    /// Whether routing should skip this node at `now`
    #[must_use]
    pub fn is_shielded_at(&self, now: Instant) -> bool {
        matches!(self.health.lock().shield_until, Some(until) if now < until)
    }

    /// Current consecutive-error count
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.health.lock().consecutive_errors
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let health = self.health.lock();
        f.debug_struct("Node")
            .field("endpoint", &self.endpoint)
            .field("consecutive_errors", &health.consecutive_errors)
            .field("shield_until", &health.shield_until)
            .finish()
    }
}

/// Nodes keyed by endpoint
pub struct NodeRegistry {
    config: Arc<ConnectionConfig>,
    select_database: bool,
    nodes: Mutex<HashMap<Endpoint, Arc<Node>>>,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new(config: Arc<ConnectionConfig>, select_database: bool) -> Self {
        Self {
            config,
            select_database,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the node for `endpoint`, creating it if needed
    pub fn get_or_create(&self, endpoint: &Endpoint) -> Arc<Node> {
        self.nodes
            .lock()
            .entry(endpoint.clone())
            .or_insert_with(|| {
                debug!("Registered node {}", endpoint);
                Arc::new(Node::new(
                    endpoint.clone(),
                    self.config.clone(),
                    self.select_database,
                ))
            })
            .clone()
    }

    /// Look up an existing node
    #[must_use]
    pub fn get(&self, endpoint: &Endpoint) -> Option<Arc<Node>> {
        self.nodes.lock().get(endpoint).cloned()
    }

    /// Forget nodes that left the topology and close their idle connections
    pub fn retain(&self, keep: &HashSet<Endpoint>) {
        let removed: Vec<Arc<Node>> = {
            let mut nodes = self.nodes.lock();
            let gone: Vec<Endpoint> = nodes.keys().filter(|e| !keep.contains(*e)).cloned().collect();
            gone.iter().filter_map(|e| nodes.remove(e)).collect()
        };
        for node in removed {
            debug!("Removed node {}", node.endpoint());
            if let Some(pool) = node.pool.get() {
                pool.clear();
            }
        }
    }

    /// All registered nodes
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Node>> {
        let mut nodes: Vec<Arc<Node>> = self.nodes.lock().values().cloned().collect();
        nodes.sort_by(|a, b| a.endpoint().cmp(b.endpoint()));
        nodes
    }

    /// Configuration shared by every node
    #[must_use]
    pub fn config(&self) -> &Arc<ConnectionConfig> {
        &self.config
    }
}
