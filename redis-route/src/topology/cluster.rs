//! Redis Cluster support
//!
//! This module provides functionality for Redis Cluster operations including:
//! - Slot calculation using CRC16
//! - `CLUSTER NODES` parsing
//! - Slot-based node selection with shielding fallbacks
//! - MOVED and ASK redirect handling

use super::{Reroute, Topology};
use crate::node::{Node, NodeRegistry};
use crate::protocol::Cmd;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use crc16::{State, XMODEM};
use redis_route_core::{
    error::{RedisError, RedisResult},
    types::{Endpoint, NodeRole, SlotRange},
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Total number of hash slots in Redis Cluster
pub const CLUSTER_SLOTS: u16 = 16384;

/// Calculate the hash slot for a given key
///
/// This implements the Redis Cluster key hashing algorithm:
/// - If the key contains {...}, only the part between the first { and first } is hashed
/// - Otherwise, the entire key is hashed
/// - The hash is CRC16 mod 16384
pub fn calculate_slot(key: &[u8]) -> u16 {
    let hash_key = extract_hash_tag(key);
    State::<XMODEM>::calculate(hash_key) % CLUSTER_SLOTS
}

/// Extract the hash tag from a key
///
/// Hash tags allow you to ensure multiple keys are allocated to the same hash slot.
/// For example: `{user1000}.following` and `{user1000}.followers` will hash to the same slot.
fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(end) = key[start + 1..].iter().position(|&b| b == b'}') {
            let end = start + 1 + end;
            // empty tags hash the whole key
            if end > start + 1 {
                return &key[start + 1..end];
            }
        }
    }
    key
}

/// One line of `CLUSTER NODES`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNodeInfo {
    /// Node ID
    pub id: String,
    /// Client endpoint; the host is empty for a node that does not know its own address yet
    pub endpoint: Endpoint,
    /// Cluster bus port
    pub bus_port: u16,
    /// Raw flags (`myself`, `master`, `slave`, `fail?`, ...)
    pub flags: Vec<String>,
    /// Master or replica
    pub role: NodeRole,
    /// Master this replica follows
    pub master_id: Option<String>,
    /// Whether the cluster bus link is up
    pub connected: bool,
    /// Served slot ranges
    pub slots: Vec<SlotRange>,
    /// Slots being migrated away: `[slot->-target_id]`
    pub migrating: Vec<(u16, String)>,
    /// Slots being imported: `[slot-<-source_id]`
    pub importing: Vec<(u16, String)>,
}

impl ClusterNodeInfo {
    /// Whether this is the node that answered the query
    #[must_use]
    pub fn is_myself(&self) -> bool {
        self.has_flag("myself")
    }

    /// Whether the node can take traffic
    #[must_use]
    pub fn is_available(&self) -> bool {
        !self
            .flags
            .iter()
            .any(|f| matches!(f.as_str(), "fail" | "fail?" | "handshake" | "noaddr"))
    }

    fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// Parse a `CLUSTER NODES` reply, skipping malformed lines
pub fn parse_cluster_nodes(text: &str) -> Vec<ClusterNodeInfo> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parsed = parse_node_line(line);
            if parsed.is_none() {
                warn!("Ignoring malformed CLUSTER NODES line: {}", line);
            }
            parsed
        })
        .collect()
}

/// Format: `<id> <ip:port@cport[,hostname]> <flags> <master> <ping-sent> <pong-recv> <config-epoch> <link-state> <slot> ...`
fn parse_node_line(line: &str) -> Option<ClusterNodeInfo> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 8 {
        return None;
    }

    let (endpoint, bus_port) = parse_node_address(parts[1])?;
    let flags: Vec<String> = parts[2].split(',').map(String::from).collect();
    let role = if flags.iter().any(|f| f == "slave" || f == "replica") {
        NodeRole::Slave
    } else {
        NodeRole::Master
    };
    let master_id = (role == NodeRole::Slave && parts[3] != "-").then(|| parts[3].to_string());

    let mut slots = Vec::new();
    let mut migrating = Vec::new();
    let mut importing = Vec::new();
    for token in &parts[8..] {
        if let Some(marker) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            if let Some((slot, target)) = marker.split_once("->-") {
                migrating.push((slot.parse().ok()?, target.to_string()));
            } else if let Some((slot, source)) = marker.split_once("-<-") {
                importing.push((slot.parse().ok()?, source.to_string()));
            }
            continue;
        }
        slots.push(parse_slot_range(token)?);
    }

    Some(ClusterNodeInfo {
        id: parts[0].to_string(),
        endpoint,
        bus_port,
        flags,
        role,
        master_id,
        connected: parts[7] == "connected",
        slots,
        migrating,
        importing,
    })
}

/// Formats: `host:port@cport`, `host:port`, `host:port@cport,hostname`, `:port@cport`
fn parse_node_address(addr: &str) -> Option<(Endpoint, u16)> {
    let addr = addr.split(',').next()?;
    let (host_port, bus) = match addr.split_once('@') {
        Some((hp, bus)) => (hp, bus.parse().ok()?),
        None => (addr, 0),
    };
    let (host, port) = host_port.rsplit_once(':')?;
    Some((Endpoint::new(host, port.parse().ok()?), bus))
}

/// Parse slot range: "0-5460" or "0"
fn parse_slot_range(s: &str) -> Option<SlotRange> {
    let range = match s.split_once('-') {
        Some((start, end)) => SlotRange::new(start.parse().ok()?, end.parse().ok()?),
        None => {
            let slot = s.parse().ok()?;
            SlotRange::new(slot, slot)
        }
    };
    (range.start <= range.end && range.end < CLUSTER_SLOTS).then_some(range)
}

#[derive(Debug, Clone)]
struct Member {
    id: String,
    role: NodeRole,
    node: Arc<Node>,
    replicas: Vec<usize>,
}

/// Immutable view of the cluster: members plus a slot → master table
#[derive(Debug, Clone)]
struct Snapshot {
    members: Vec<Member>,
    masters: Vec<usize>,
    slots: Vec<Option<u32>>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            members: Vec::new(),
            masters: Vec::new(),
            slots: vec![None; CLUSTER_SLOTS as usize],
        }
    }

    /// Build from parsed lines; `queried` fills in the address of a node that reports none
    fn build(infos: &[ClusterNodeInfo], queried: &Endpoint, registry: &NodeRegistry) -> Self {
        let mut snapshot = Self::empty();
        let mut by_id = HashMap::new();

        for info in infos.iter().filter(|i| i.is_available()) {
            let mut endpoint = info.endpoint.clone();
            if endpoint.host.is_empty() {
                if !info.is_myself() {
                    continue;
                }
                endpoint.host = queried.host.clone();
            }

            let index = snapshot.members.len();
            snapshot.members.push(Member {
                id: info.id.clone(),
                role: info.role,
                node: registry.get_or_create(&endpoint),
                replicas: Vec::new(),
            });
            by_id.insert(info.id.as_str(), index);

            if info.role.is_master() {
                snapshot.masters.push(index);
                for range in &info.slots {
                    for slot in range.start..=range.end {
                        snapshot.slots[slot as usize] = Some(index as u32);
                    }
                }
            }
        }

        for info in infos.iter().filter(|i| i.role == NodeRole::Slave) {
            let (Some(&replica), Some(master_id)) = (by_id.get(info.id.as_str()), &info.master_id) else {
                continue;
            };
            if let Some(&master) = by_id.get(master_id.as_str()) {
                snapshot.members[master].replicas.push(replica);
            }
        }
        snapshot
    }

    fn owner(&self, slot: u16) -> Option<&Member> {
        self.slots[slot as usize].map(|index| &self.members[index as usize])
    }

    fn find(&self, endpoint: &Endpoint) -> Option<usize> {
        self.members.iter().position(|m| m.node.endpoint() == endpoint)
    }

    /// Copy with `slot` owned by `endpoint`, adding it as a master if unknown
    fn with_slot(&self, slot: u16, endpoint: &Endpoint, registry: &NodeRegistry) -> Self {
        let mut next = self.clone();
        let index = match next.find(endpoint) {
            Some(index) => index,
            None => {
                next.members.push(Member {
                    id: String::new(),
                    role: NodeRole::Master,
                    node: registry.get_or_create(endpoint),
                    replicas: Vec::new(),
                });
                next.masters.push(next.members.len() - 1);
                next.members.len() - 1
            }
        };
        // a replica answering for a slot has been promoted
        if !next.members[index].role.is_master() {
            next.members[index].role = NodeRole::Master;
            next.masters.push(index);
        }
        next.slots[slot as usize] = Some(index as u32);
        next
    }

    fn covered_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// Cluster topology refreshed from `CLUSTER NODES`
pub struct ClusterTopology {
    registry: Arc<NodeRegistry>,
    seeds: Vec<Endpoint>,
    snapshot: ArcSwap<Snapshot>,
    next_master: AtomicUsize,
}

impl ClusterTopology {
    /// Create an empty topology; call [`Topology::refresh`] to load it
    pub fn new(registry: Arc<NodeRegistry>, seeds: Vec<Endpoint>) -> Self {
        Self {
            registry,
            seeds,
            snapshot: ArcSwap::from_pointee(Snapshot::empty()),
            next_master: AtomicUsize::new(0),
        }
    }

    /// Load a snapshot from the text of a `CLUSTER NODES` reply given by `queried`
    pub fn load(&self, cluster_nodes: &str, queried: &Endpoint) -> RedisResult<()> {
        let infos = parse_cluster_nodes(cluster_nodes);
        let snapshot = Snapshot::build(&infos, queried, &self.registry);
        if snapshot.masters.is_empty() {
            return Err(RedisError::Cluster(format!(
                "{} reported no usable master",
                queried
            )));
        }

        let covered = snapshot.covered_slots();
        if covered < CLUSTER_SLOTS as usize {
            warn!("Cluster covers only {} of {} slots", covered, CLUSTER_SLOTS);
        }

        let mut keep: HashSet<Endpoint> = snapshot
            .members
            .iter()
            .map(|m| m.node.endpoint().clone())
            .collect();
        keep.extend(self.seeds.iter().cloned());
        info!(
            "Cluster topology: {} masters, {} nodes",
            snapshot.masters.len(),
            snapshot.members.len()
        );
        self.snapshot.store(Arc::new(snapshot));
        self.registry.retain(&keep);
        Ok(())
    }

    /// Node selection as of `now`
    pub fn select_node_at(
        &self,
        key: Option<&[u8]>,
        write: bool,
        now: Instant,
    ) -> RedisResult<Arc<Node>> {
        let snapshot = self.snapshot.load();
        let Some(key) = key else {
            return self.any_master(&snapshot, now);
        };

        let slot = calculate_slot(key);
        let owner = snapshot
            .owner(slot)
            .ok_or_else(|| RedisError::Routing(format!("No node serves slot {}", slot)))?;

        if !owner.node.is_shielded_at(now) {
            return Ok(owner.node.clone());
        }
        if !write {
            if let Some(replica) = owner
                .replicas
                .iter()
                .map(|&i| &snapshot.members[i].node)
                .find(|node| !node.is_shielded_at(now))
            {
                debug!("Slot {} master shielded, reading from {}", slot, replica.endpoint());
                return Ok(replica.clone());
            }
        }
        Ok(owner.node.clone())
    }

    fn any_master(&self, snapshot: &Snapshot, now: Instant) -> RedisResult<Arc<Node>> {
        if snapshot.masters.is_empty() {
            return Err(RedisError::Routing("Cluster has no masters".to_string()));
        }
        let start = self.next_master.fetch_add(1, Ordering::Relaxed);
        let count = snapshot.masters.len();
        let pick = (0..count)
            .map(|offset| &snapshot.members[snapshot.masters[(start + offset) % count]].node)
            .find(|node| !node.is_shielded_at(now))
            .unwrap_or(&snapshot.members[snapshot.masters[start % count]].node);
        Ok(pick.clone())
    }

    /// Master currently owning `slot`
    #[must_use]
    pub fn slot_owner(&self, slot: u16) -> Option<Endpoint> {
        self.snapshot
            .load()
            .owner(slot)
            .map(|m| m.node.endpoint().clone())
    }

    /// Endpoints of the current masters
    #[must_use]
    pub fn masters(&self) -> Vec<Endpoint> {
        let snapshot = self.snapshot.load();
        snapshot
            .masters
            .iter()
            .map(|&i| snapshot.members[i].node.endpoint().clone())
            .collect()
    }

    /// Node ID of the member at `endpoint`, empty if it was learned from a redirect
    #[must_use]
    pub fn node_id(&self, endpoint: &Endpoint) -> Option<String> {
        let snapshot = self.snapshot.load();
        snapshot.find(endpoint).map(|i| snapshot.members[i].id.clone())
    }

    /// Permanently move `slot` to `endpoint`
    pub fn apply_moved(&self, slot: u16, endpoint: &Endpoint) -> Arc<Node> {
        self.snapshot
            .rcu(|current| current.with_slot(slot, endpoint, &self.registry));
        info!("Slot {} moved to {}", slot, endpoint);
        self.registry.get_or_create(endpoint)
    }

    async fn fetch_from(&self, node: &Node) -> RedisResult<()> {
        let mut conn = node.get().await?;
        let reply = conn.query(&Cmd::new("CLUSTER").arg("NODES")).await?;
        drop(conn);
        self.load(&reply.as_string()?, node.endpoint())
    }
}

#[async_trait]
impl Topology for ClusterTopology {
    fn name(&self) -> &'static str {
        "cluster"
    }

    fn select_node(&self, key: Option<&[u8]>, write: bool) -> RedisResult<Arc<Node>> {
        self.select_node_at(key, write, Instant::now())
    }

    async fn reselect(
        &self,
        _key: Option<&[u8]>,
        _write: bool,
        node: &Arc<Node>,
        err: &RedisError,
    ) -> RedisResult<Option<Reroute>> {
        match err {
            RedisError::Moved { slot, host, port } => {
                let endpoint = Endpoint::new(host.clone(), *port);
                debug!("MOVED slot {} from {} to {}", slot, node.endpoint(), endpoint);
                Ok(Some(Reroute::to(self.apply_moved(*slot, &endpoint))))
            }
            RedisError::Ask { slot, host, port } => {
                let endpoint = Endpoint::new(host.clone(), *port);
                debug!("ASK slot {} from {} to {}", slot, node.endpoint(), endpoint);
                Ok(Some(Reroute {
                    node: self.registry.get_or_create(&endpoint),
                    asking: true,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn refresh(&self) -> RedisResult<()> {
        let mut candidates: Vec<Arc<Node>> = self.nodes();
        candidates.sort_by_key(|n| n.is_shielded());
        for seed in &self.seeds {
            if !candidates.iter().any(|n| n.endpoint() == seed) {
                candidates.push(self.registry.get_or_create(seed));
            }
        }

        let mut last_error = None;
        for node in candidates {
            match self.fetch_from(&node).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!("CLUSTER NODES via {} failed: {}", node.endpoint(), e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| RedisError::Cluster("No cluster node reachable".to_string())))
    }

    fn nodes(&self) -> Vec<Arc<Node>> {
        let snapshot = self.snapshot.load();
        snapshot.members.iter().map(|m| m.node.clone()).collect()
    }
}
