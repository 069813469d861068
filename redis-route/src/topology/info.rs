//! Parsing of `INFO` replies
//!
//! `INFO` returns `key:value` lines grouped under `# Section` headers. Only
//! the fields routing needs are interpreted here.

use redis_route_core::types::{Endpoint, NodeRole};
use std::collections::HashMap;

/// Flat `key -> value` view of an INFO reply
#[derive(Debug, Clone, Default)]
pub struct Info {
    fields: HashMap<String, String>,
}

impl Info {
    /// Parse the text of an INFO reply
    pub fn parse(text: &str) -> Self {
        let fields = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { fields }
    }

    /// Raw field value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// `redis_mode` (`standalone`, `cluster` or `sentinel`)
    #[must_use]
    pub fn redis_mode(&self) -> Option<&str> {
        self.get("redis_mode")
    }

    /// Replication role
    #[must_use]
    pub fn role(&self) -> Option<NodeRole> {
        match self.get("role")? {
            "master" => Some(NodeRole::Master),
            "slave" | "replica" => Some(NodeRole::Slave),
            _ => None,
        }
    }

    /// Number of replicas attached to a master
    #[must_use]
    pub fn connected_slaves(&self) -> usize {
        self.get("connected_slaves")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Master a replica follows
    #[must_use]
    pub fn master_endpoint(&self) -> Option<Endpoint> {
        let host = self.get("master_host")?;
        let port = self.get("master_port")?.parse().ok()?;
        Some(Endpoint::new(host, port))
    }

    /// Online replicas listed by a master (`slave0:ip=..,port=..,state=online,...`)
    #[must_use]
    pub fn online_slaves(&self) -> Vec<Endpoint> {
        let mut slaves: Vec<(usize, Endpoint)> = self
            .fields
            .iter()
            .filter_map(|(key, value)| {
                let index = key.strip_prefix("slave")?.parse::<usize>().ok()?;
                let attrs = attributes(value);
                if attrs.get("state").is_some_and(|s| *s != "online") {
                    return None;
                }
                let host = attrs.get("ip")?;
                let port = attrs.get("port")?.parse().ok()?;
                Some((index, Endpoint::new(*host, port)))
            })
            .collect();
        slaves.sort_by_key(|(index, _)| *index);
        slaves.into_iter().map(|(_, endpoint)| endpoint).collect()
    }

    /// Masters monitored by a sentinel (`master0:name=..,status=ok,address=ip:port,...`)
    #[must_use]
    pub fn sentinel_masters(&self) -> Vec<SentinelMaster> {
        let mut masters: Vec<(usize, SentinelMaster)> = self
            .fields
            .iter()
            .filter_map(|(key, value)| {
                let index = key.strip_prefix("master")?.parse::<usize>().ok()?;
                let attrs = attributes(value);
                let address = Endpoint::parse(attrs.get("address")?).ok()?;
                Some((
                    index,
                    SentinelMaster {
                        name: (*attrs.get("name")?).to_string(),
                        healthy: attrs.get("status").is_some_and(|s| *s == "ok"),
                        address,
                        slaves: attrs.get("slaves").and_then(|s| s.parse().ok()).unwrap_or(0),
                    },
                ))
            })
            .collect();
        masters.sort_by_key(|(index, _)| *index);
        masters.into_iter().map(|(_, master)| master).collect()
    }
}

/// A master as reported by `INFO Sentinel`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelMaster {
    /// Monitored master name
    pub name: String,
    /// `status=ok`
    pub healthy: bool,
    /// Current master address
    pub address: Endpoint,
    /// Number of known replicas
    pub slaves: usize,
}

fn attributes(value: &str) -> HashMap<&str, &str> {
    value
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER_INFO: &str = "# Server\r\nredis_version:7.2.4\r\nredis_mode:standalone\r\n\r\n# Replication\r\nrole:master\r\nconnected_slaves:2\r\nslave0:ip=10.0.0.2,port=6380,state=online,offset=42,lag=0\r\nslave1:ip=10.0.0.3,port=6381,state=wait_bgsave,offset=0,lag=0\r\nmaster_repl_offset:42\r\n";

    #[test]
    fn test_parse_master_replication() {
        let info = Info::parse(MASTER_INFO);
        assert_eq!(info.redis_mode(), Some("standalone"));
        assert_eq!(info.role(), Some(NodeRole::Master));
        assert_eq!(info.connected_slaves(), 2);
        assert_eq!(info.online_slaves(), vec![Endpoint::new("10.0.0.2", 6380)]);
        assert!(info.master_endpoint().is_none());
    }

    #[test]
    fn test_parse_slave_replication() {
        let info = Info::parse("role:slave\nmaster_host:10.0.0.1\nmaster_port:6379\nmaster_link_status:up\n");
        assert_eq!(info.role(), Some(NodeRole::Slave));
        assert_eq!(info.master_endpoint(), Some(Endpoint::new("10.0.0.1", 6379)));
    }

    #[test]
    fn test_parse_sentinel_masters() {
        let info = Info::parse(
            "# Sentinel\r\nsentinel_masters:2\r\nmaster0:name=mymaster,status=ok,address=10.0.0.1:6379,slaves=2,sentinels=3\r\nmaster1:name=other,status=odown,address=10.0.1.1:6379,slaves=0,sentinels=3\r\n",
        );
        let masters = info.sentinel_masters();
        assert_eq!(masters.len(), 2);
        assert_eq!(masters[0].name, "mymaster");
        assert!(masters[0].healthy);
        assert_eq!(masters[0].address, Endpoint::new("10.0.0.1", 6379));
        assert_eq!(masters[0].slaves, 2);
        assert!(!masters[1].healthy);
    }
}
