//! Synchronous facade over [`crate::Client`]
//!
//! Owns a multi-threaded tokio runtime and blocks the calling thread on each
//! call. Must not be used from inside an async context; dropping the last
//! handle there is fine, the runtime is then shut down in the background.

use crate::pipeline::{PipelineReply, PipelineResults};
use crate::pool::PoolStats;
use crate::protocol::Cmd;
use redis_route_core::{
    config::{ConnectionConfig, TopologyMode},
    error::RedisResult,
    types::Endpoint,
    value::{FromRespValue, RespValue},
};
use serde::{de::DeserializeOwned, Serialize};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Runtime shared by a client and its pipelines
#[derive(Debug)]
struct OwnedRuntime(Option<Runtime>);

impl Deref for OwnedRuntime {
    type Target = Runtime;

    fn deref(&self) -> &Runtime {
        self.0.as_ref().expect("runtime is present until drop")
    }
}

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        // a plain drop blocks, which panics inside an async context
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Blocking Redis client
#[derive(Clone)]
pub struct Client {
    runtime: Arc<OwnedRuntime>,
    inner: crate::Client,
}

impl Client {
    /// Build a runtime and connect
    pub fn connect(config: ConnectionConfig) -> RedisResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("redis-route")
            .build()?;
        let inner = runtime.block_on(crate::Client::connect(config))?;
        Ok(Self {
            runtime: Arc::new(OwnedRuntime(Some(runtime))),
            inner,
        })
    }

    /// The async client sharing this runtime's pools
    #[must_use]
    pub fn as_async(&self) -> &crate::Client {
        &self.inner
    }

    /// Deployment kind in effect
    pub fn mode(&self) -> RedisResult<TopologyMode> {
        self.runtime.block_on(self.inner.mode())
    }

    /// Pool counters of every known node
    pub fn pool_stats(&self) -> RedisResult<Vec<(Endpoint, PoolStats)>> {
        self.runtime.block_on(self.inner.pool_stats())
    }

    /// Send a command routed by `key` and convert its reply
    pub fn execute<T: FromRespValue>(
        &self,
        key: Option<&[u8]>,
        write: bool,
        cmd: &Cmd,
    ) -> RedisResult<T> {
        self.runtime.block_on(self.inner.execute(key, write, cmd))
    }

    /// Send a server-side blocking command
    pub fn execute_blocking<T: FromRespValue>(
        &self,
        key: Option<&[u8]>,
        cmd: &Cmd,
        block: Duration,
    ) -> RedisResult<T> {
        self.runtime
            .block_on(self.inner.execute_blocking(key, cmd, block))
    }

    /// Open a pipeline
    pub fn start_pipeline(&self) -> Pipeline {
        Pipeline {
            runtime: self.runtime.clone(),
            inner: self.inner.start_pipeline(),
        }
    }

    /// Ping the server
    pub fn ping(&self) -> RedisResult<String> {
        self.runtime.block_on(self.inner.ping())
    }

    /// Get the value of a key
    pub fn get(&self, key: &str) -> RedisResult<Option<String>> {
        self.runtime.block_on(self.inner.get(key))
    }

    /// Set a key to a value
    pub fn set(&self, key: &str, value: impl Into<RespValue>) -> RedisResult<bool> {
        self.runtime.block_on(self.inner.set(key, value))
    }

    /// Set a key to a value with an expiration
    pub fn set_ex(
        &self,
        key: &str,
        value: impl Into<RespValue>,
        expiration: Duration,
    ) -> RedisResult<bool> {
        self.runtime
            .block_on(self.inner.set_ex(key, value, expiration))
    }

    /// Delete keys
    pub fn del(&self, keys: &[&str]) -> RedisResult<i64> {
        self.runtime.block_on(self.inner.del(keys))
    }

    /// Count existing keys
    pub fn exists(&self, keys: &[&str]) -> RedisResult<i64> {
        self.runtime.block_on(self.inner.exists(keys))
    }

    /// Set a key's time to live
    pub fn expire(&self, key: &str, duration: Duration) -> RedisResult<bool> {
        self.runtime.block_on(self.inner.expire(key, duration))
    }

    /// Remaining time to live in seconds
    pub fn ttl(&self, key: &str) -> RedisResult<Option<i64>> {
        self.runtime.block_on(self.inner.ttl(key))
    }

    /// Increment by one
    pub fn incr(&self, key: &str) -> RedisResult<i64> {
        self.runtime.block_on(self.inner.incr(key))
    }

    /// Read an encoded value
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> RedisResult<Option<T>> {
        self.runtime.block_on(self.inner.get_json(key))
    }

    /// Store an encoded value
    pub fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiration: Option<Duration>,
    ) -> RedisResult<bool> {
        self.runtime
            .block_on(self.inner.set_json(key, value, expiration))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("blocking::Client")
            .field("inner", &self.inner)
            .finish()
    }
}

/// Blocking counterpart of [`crate::Pipeline`]
#[derive(Debug)]
pub struct Pipeline {
    runtime: Arc<OwnedRuntime>,
    inner: crate::Pipeline,
}

impl Pipeline {
    /// Submit a command; see [`crate::Pipeline::execute`]
    pub fn execute<T: FromRespValue>(
        &mut self,
        key: Option<&[u8]>,
        cmd: Cmd,
        write: bool,
    ) -> RedisResult<PipelineReply<T>> {
        self.runtime.block_on(self.inner.execute(key, cmd, write))
    }

    /// Number of commands waiting to be sent
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether nothing is waiting to be sent
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Send everything still buffered
    pub fn commit(self, require_result: bool) -> RedisResult<PipelineResults> {
        self.runtime.block_on(self.inner.commit(require_result))
    }
}
