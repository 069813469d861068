//! High-level Redis client
//!
//! This module provides the main `Client` interface for interacting with Redis.
//! Every call is routed by the executor; the client only builds commands
//! and converts replies.

use crate::connection::RedisConnection;
use crate::executor::{Executor, Lease};
use crate::pipeline::Pipeline;
use crate::pool::PoolStats;
use crate::protocol::Cmd;
use crate::topology::cluster::{parse_cluster_nodes, ClusterNodeInfo};
use crate::topology::{Info, Topology};
use futures_util::future::BoxFuture;
use redis_route_core::{
    config::{ConnectionConfig, TopologyMode},
    encoder::{self, JsonEncoder, ValueEncoder},
    error::{RedisError, RedisResult},
    types::Endpoint,
    value::{FromRespValue, RespValue},
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// High-level Redis client
///
/// Cloning is cheap; clones share pools and topology.
#[derive(Clone)]
pub struct Client {
    executor: Arc<Executor>,
    encoder: Arc<dyn ValueEncoder>,
}

impl Client {
    /// Connect to Redis with the given configuration
    ///
    /// In `TopologyMode::Auto` the deployment kind is detected from the first
    /// reachable endpoint and its topology is loaded before this returns.
    pub async fn connect(config: ConnectionConfig) -> RedisResult<Self> {
        let executor = Arc::new(Executor::new(config)?);
        executor.init().await?;
        Ok(Self {
            executor,
            encoder: Arc::new(JsonEncoder),
        })
    }

    /// Use `encoder` for [`Client::get_json`] and [`Client::set_json`]
    #[must_use]
    pub fn with_encoder(mut self, encoder: Arc<dyn ValueEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Deployment kind in effect
    pub async fn mode(&self) -> RedisResult<TopologyMode> {
        self.executor.mode().await
    }

    /// Active topology, `None` in standalone mode
    pub async fn topology(&self) -> RedisResult<Option<Arc<dyn Topology>>> {
        self.executor.topology().await
    }

    /// Pool counters of every known node
    pub async fn pool_stats(&self) -> RedisResult<Vec<(Endpoint, PoolStats)>> {
        self.executor.pool_stats().await
    }

    /// Send a command routed by `key` and convert its reply
    pub async fn execute<T: FromRespValue>(
        &self,
        key: Option<&[u8]>,
        write: bool,
        cmd: &Cmd,
    ) -> RedisResult<T> {
        self.executor.execute(key, write, cmd).await
    }

    /// Run `f` on a pooled connection to the node `key` routes to
    ///
    /// ```no_run
    /// # use redis_route::{cmd, Client};
    /// # async fn demo(client: Client) -> redis_route::RedisResult<()> {
    /// let reply = client
    ///     .execute_with(Some(&b"counter"[..]), true, |conn| {
    ///         Box::pin(async move { conn.query(&cmd("INCR").arg("counter")).await })
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute_with<T, F>(&self, key: Option<&[u8]>, write: bool, f: F) -> RedisResult<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut RedisConnection) -> BoxFuture<'c, RedisResult<T>> + Send,
    {
        self.executor.execute_with(key, write, f).await
    }

    /// Send a command, giving up when `token` is cancelled
    pub async fn execute_cancellable<T: FromRespValue>(
        &self,
        key: Option<&[u8]>,
        write: bool,
        cmd: &Cmd,
        token: &CancellationToken,
    ) -> RedisResult<T> {
        let cmd = cmd.clone();
        let reply = self
            .executor
            .execute_cancellable(key, write, token, move |conn| {
                let cmd = cmd.clone();
                Box::pin(async move { conn.query(&cmd).await })
            })
            .await?;
        T::from_resp(reply)
    }

    /// Send a server-side blocking command such as `BLPOP key 5`
    pub async fn execute_blocking<T: FromRespValue>(
        &self,
        key: Option<&[u8]>,
        cmd: &Cmd,
        block: Duration,
    ) -> RedisResult<T> {
        self.executor.execute_blocking(key, cmd, block).await
    }

    /// Open a pipeline owned by the caller
    pub fn start_pipeline(&self) -> Pipeline {
        Pipeline::new(self.executor.clone())
    }

    /// Borrow a connection for direct use
    pub async fn lease(&self, key: Option<&[u8]>, write: bool) -> RedisResult<Lease> {
        self.executor.lease(key, write).await
    }

    // Key commands

    /// Ping the server
    pub async fn ping(&self) -> RedisResult<String> {
        self.execute(None, false, &Cmd::new("PING")).await
    }

    /// Get the value of a key
    pub async fn get(&self, key: &str) -> RedisResult<Option<String>> {
        self.execute(Some(key.as_bytes()), false, &Cmd::new("GET").arg(key))
            .await
    }

    /// Set a key to a value
    pub async fn set(&self, key: &str, value: impl Into<RespValue>) -> RedisResult<bool> {
        let cmd = Cmd::new("SET").arg(key).arg(value);
        self.write_flag(key, &cmd).await
    }

    /// Set a key to a value with an expiration
    pub async fn set_ex(
        &self,
        key: &str,
        value: impl Into<RespValue>,
        expiration: Duration,
    ) -> RedisResult<bool> {
        let millis = u64::try_from(expiration.as_millis()).unwrap_or(u64::MAX).max(1);
        let cmd = Cmd::new("SET").arg(key).arg(value).arg("PX").arg(millis);
        self.write_flag(key, &cmd).await
    }

    /// Delete keys, returning how many existed
    pub async fn del(&self, keys: &[&str]) -> RedisResult<i64> {
        let Some(first) = keys.first() else {
            return Ok(0);
        };
        let cmd = Cmd::new("DEL").args(keys.iter().copied());
        let result = self.execute(Some(first.as_bytes()), true, &cmd).await;
        self.executor.best_effort(result)
    }

    /// Count how many of `keys` exist
    pub async fn exists(&self, keys: &[&str]) -> RedisResult<i64> {
        let Some(first) = keys.first() else {
            return Ok(0);
        };
        let cmd = Cmd::new("EXISTS").args(keys.iter().copied());
        self.execute(Some(first.as_bytes()), false, &cmd).await
    }

    /// Set a key's time to live
    pub async fn expire(&self, key: &str, duration: Duration) -> RedisResult<bool> {
        let cmd = Cmd::new("EXPIRE").arg(key).arg(duration.as_secs());
        let result = self.execute(Some(key.as_bytes()), true, &cmd).await;
        self.executor.best_effort(result)
    }

    /// Remaining time to live in seconds; `None` for missing keys or keys without expiry
    pub async fn ttl(&self, key: &str) -> RedisResult<Option<i64>> {
        let ttl: i64 = self
            .execute(Some(key.as_bytes()), false, &Cmd::new("TTL").arg(key))
            .await?;
        Ok((ttl >= 0).then_some(ttl))
    }

    /// Increment the integer value of a key by one
    pub async fn incr(&self, key: &str) -> RedisResult<i64> {
        self.execute(Some(key.as_bytes()), true, &Cmd::new("INCR").arg(key))
            .await
    }

    /// Increment the integer value of a key by the given amount
    pub async fn incr_by(&self, key: &str, increment: i64) -> RedisResult<i64> {
        let cmd = Cmd::new("INCRBY").arg(key).arg(increment);
        self.execute(Some(key.as_bytes()), true, &cmd).await
    }

    /// Read a value stored by [`Client::set_json`]
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> RedisResult<Option<T>> {
        let raw: Option<bytes::Bytes> = self
            .execute(Some(key.as_bytes()), false, &Cmd::new("GET").arg(key))
            .await?;
        raw.map(|bytes| encoder::decode(self.encoder.as_ref(), &bytes))
            .transpose()
    }

    /// Store any serializable value through the client's value encoder
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiration: Option<Duration>,
    ) -> RedisResult<bool> {
        let mut cmd = Cmd::new("SET")
            .arg(key)
            .arg_encoded(self.encoder.as_ref(), value)?;
        if let Some(expiration) = expiration {
            let millis = u64::try_from(expiration.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd = cmd.arg("PX").arg(millis);
        }
        self.write_flag(key, &cmd).await
    }

    async fn write_flag(&self, key: &str, cmd: &Cmd) -> RedisResult<bool> {
        let result = self
            .execute::<Option<String>>(Some(key.as_bytes()), true, cmd)
            .await
            .map(|reply| reply.is_some());
        self.executor.best_effort(result)
    }

    // Server and topology commands

    /// `INFO [section]` from whichever node keyless reads route to
    pub async fn info(&self, section: Option<&str>) -> RedisResult<Info> {
        let mut cmd = Cmd::new("INFO");
        if let Some(section) = section {
            cmd = cmd.arg(section);
        }
        let text: String = self.execute(None, false, &cmd).await?;
        Ok(Info::parse(&text))
    }

    /// `CLUSTER NODES`, parsed
    pub async fn cluster_nodes(&self) -> RedisResult<Vec<ClusterNodeInfo>> {
        let text: String = self
            .execute(None, false, &Cmd::new("CLUSTER").arg("NODES"))
            .await?;
        Ok(parse_cluster_nodes(&text))
    }

    /// Ask the node at `on` to join the cluster node at `ip:port`
    pub async fn cluster_meet(&self, on: &Endpoint, ip: &str, port: u16) -> RedisResult<()> {
        let cmd = Cmd::new("CLUSTER").arg("MEET").arg(ip).arg(port);
        self.admin(on, &cmd).await
    }

    /// Assign `slots` to the node at `on`
    pub async fn cluster_add_slots(&self, on: &Endpoint, slots: &[u16]) -> RedisResult<()> {
        let cmd = Cmd::new("CLUSTER").arg("ADDSLOTS").args(slots.iter().copied());
        self.admin(on, &cmd).await
    }

    /// Remove `slots` from the node at `on`
    pub async fn cluster_del_slots(&self, on: &Endpoint, slots: &[u16]) -> RedisResult<()> {
        let cmd = Cmd::new("CLUSTER").arg("DELSLOTS").args(slots.iter().copied());
        self.admin(on, &cmd).await
    }

    async fn admin(&self, on: &Endpoint, cmd: &Cmd) -> RedisResult<()> {
        if cmd.arguments().len() < 2 {
            return Err(RedisError::Config(format!(
                "{} needs at least one argument",
                cmd.name()
            )));
        }
        let node = self.executor.node(on).await?;
        self.executor.execute_on(&node, cmd).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("executor", &self.executor)
            .finish()
    }
}
