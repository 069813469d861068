//! Command execution
//!
//! The executor borrows a connection for the node a command routes to, runs
//! the caller's closure on it and returns the connection to its pool. On
//! failure it applies the retry policy:
//!
//! - socket faults (`Io`, `Connection`) retry at once, rotating to the next
//!   configured endpoint in standalone mode;
//! - timeouts and pool exhaustion retry after exponential backoff;
//! - MOVED, ASK and READONLY replies are handed to the topology and the
//!   command is re-sent where it points, up to a bounded number of hops;
//! - everything else is surfaced unchanged.

use crate::connection::RedisConnection;
use crate::node::{Node, NodeRegistry};
use crate::pool::{PoolStats, PooledConnection};
use crate::protocol::Cmd;
use crate::topology::{self, Reroute, Topology};
use futures_util::future::BoxFuture;
use redis_route_core::{
    config::{ConnectionConfig, TopologyMode},
    error::{RedisError, RedisResult},
    types::Endpoint,
    value::{FromRespValue, RespValue},
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Routing {
    mode: TopologyMode,
    registry: Arc<NodeRegistry>,
    topology: Option<Arc<dyn Topology>>,
    refresh_task: Option<JoinHandle<()>>,
}

impl Drop for Routing {
    fn drop(&mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
    }
}

/// Runs commands against the deployment with retries and redirects
pub struct Executor {
    config: Arc<ConnectionConfig>,
    endpoints: Vec<Endpoint>,
    routing: OnceCell<Routing>,
    current_endpoint: AtomicUsize,
}

impl Executor {
    /// Create an executor; nothing connects until [`Executor::init`] or the first command
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the configuration is invalid.
    pub fn new(config: ConnectionConfig) -> RedisResult<Self> {
        config.validate()?;
        let endpoints = config.endpoints()?;
        Ok(Self {
            config: Arc::new(config),
            endpoints,
            routing: OnceCell::new(),
            current_endpoint: AtomicUsize::new(0),
        })
    }

    /// Detect the deployment kind and load its topology, once
    pub async fn init(&self) -> RedisResult<()> {
        self.routing().await.map(|_| ())
    }

    async fn routing(&self) -> RedisResult<&Routing> {
        self.routing.get_or_try_init(|| self.init_routing()).await
    }

    async fn init_routing(&self) -> RedisResult<Routing> {
        let mode = match self.config.topology_mode {
            TopologyMode::Auto => topology::detect_mode(&self.config, &self.endpoints).await?,
            mode => mode,
        };

        // cluster and sentinel deployments pin database 0
        let select_database = matches!(mode, TopologyMode::Standalone | TopologyMode::Replication);
        let registry = Arc::new(NodeRegistry::new(self.config.clone(), select_database));
        let topology = topology::create(mode, &self.config, &registry).await?;

        let refresh = &self.config.refresh;
        let refresh_task = topology.as_ref().map(|t| match mode {
            TopologyMode::Cluster => {
                topology::spawn_refresh(t, refresh.cluster_interval, refresh.cluster_interval)
            }
            _ => topology::spawn_refresh(t, refresh.replica_first_tick, refresh.replica_interval),
        });

        info!(
            "Routing initialized in {:?} mode over {} endpoint(s)",
            mode,
            self.endpoints.len()
        );
        Ok(Routing {
            mode,
            registry,
            topology,
            refresh_task,
        })
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Deployment kind in effect
    pub async fn mode(&self) -> RedisResult<TopologyMode> {
        Ok(self.routing().await?.mode)
    }

    /// Active topology, `None` in standalone mode
    pub async fn topology(&self) -> RedisResult<Option<Arc<dyn Topology>>> {
        Ok(self.routing().await?.topology.clone())
    }

    /// Node a command on `key` would be sent to
    pub async fn select_node(&self, key: Option<&[u8]>, write: bool) -> RedisResult<Arc<Node>> {
        let routing = self.routing().await?;
        self.select(routing, key, write)
    }

    /// Node serving `endpoint`, created if unknown
    pub async fn node(&self, endpoint: &Endpoint) -> RedisResult<Arc<Node>> {
        Ok(self.routing().await?.registry.get_or_create(endpoint))
    }

    /// Pool counters of every known node
    pub async fn pool_stats(&self) -> RedisResult<Vec<(Endpoint, PoolStats)>> {
        let routing = self.routing().await?;
        Ok(routing
            .registry
            .all()
            .into_iter()
            .map(|node| (node.endpoint().clone(), node.stats()))
            .collect())
    }

    fn select(&self, routing: &Routing, key: Option<&[u8]>, write: bool) -> RedisResult<Arc<Node>> {
        match &routing.topology {
            Some(topology) => topology.select_node(key, write),
            None => {
                let index = self.current_endpoint.load(Ordering::Acquire) % self.endpoints.len();
                Ok(routing.registry.get_or_create(&self.endpoints[index]))
            }
        }
    }

    /// Move on from `failed` to the next configured endpoint
    fn rotate_endpoint(&self, failed: &Endpoint) {
        let count = self.endpoints.len();
        if count < 2 {
            return;
        }
        let current = self.current_endpoint.load(Ordering::Acquire);
        if &self.endpoints[current % count] != failed {
            // another caller already moved on
            return;
        }
        let next = (current + 1) % count;
        if self
            .current_endpoint
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            warn!("Failing over from {} to {}", failed, self.endpoints[next]);
        }
    }

    /// Run `f` on a connection to the node `key` routes to.
    ///
    /// `f` may be invoked several times, once per attempt.
    pub async fn execute_with<T, F>(&self, key: Option<&[u8]>, write: bool, f: F) -> RedisResult<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut RedisConnection) -> BoxFuture<'c, RedisResult<T>> + Send,
    {
        self.run(key, write, None, f).await
    }

    /// Like [`Executor::execute_with`], checking `token` before each attempt and
    /// during backoff, with the total wait bounded by the retry budget
    pub async fn execute_cancellable<T, F>(
        &self,
        key: Option<&[u8]>,
        write: bool,
        token: &CancellationToken,
        f: F,
    ) -> RedisResult<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut RedisConnection) -> BoxFuture<'c, RedisResult<T>> + Send,
    {
        self.run(key, write, Some(token), f).await
    }

    /// Send `cmd` and convert the reply
    pub async fn execute<T: FromRespValue>(
        &self,
        key: Option<&[u8]>,
        write: bool,
        cmd: &Cmd,
    ) -> RedisResult<T> {
        let cmd = cmd.clone();
        let reply = self
            .execute_with(key, write, move |conn| {
                let cmd = cmd.clone();
                Box::pin(async move { conn.query(&cmd).await })
            })
            .await?;
        T::from_resp(reply)
    }

    /// Send a server-side blocking command (`BLPOP`, `XREAD BLOCK`, ...).
    ///
    /// The reply wait is `block` plus the operation timeout, so an empty reply
    /// arriving when the server-side block ends is not mistaken for a timeout.
    pub async fn execute_blocking<T: FromRespValue>(
        &self,
        key: Option<&[u8]>,
        cmd: &Cmd,
        block: Duration,
    ) -> RedisResult<T> {
        let wait = block + self.config.operation_timeout;
        let cmd = cmd.clone();
        let reply = self
            .execute_with(key, true, move |conn| {
                let cmd = cmd.clone();
                Box::pin(async move { conn.query_with_timeout(&cmd, wait).await })
            })
            .await?;
        T::from_resp(reply)
    }

    /// Send `cmd` to a specific node, retrying only there
    pub async fn execute_on<T: FromRespValue>(&self, node: &Arc<Node>, cmd: &Cmd) -> RedisResult<T> {
        let mut attempt = 0;
        loop {
            let result = async {
                let mut conn = node.get().await?;
                conn.query(cmd).await
            }
            .await;

            match result {
                Ok(reply) => {
                    node.record_success();
                    return T::from_resp(reply);
                }
                Err(err) if err.is_retryable() && attempt < self.config.retry.retry => {
                    attempt += 1;
                    self.note_failure(node, &err);
                    if !err.is_no_delay() {
                        tokio::time::sleep(self.config.retry.delay_for(attempt)).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Borrow a connection to the node `key` routes to
    pub async fn lease(&self, key: Option<&[u8]>, write: bool) -> RedisResult<Lease> {
        let node = self.select_node(key, write).await?;
        let conn = node.get().await?;
        Ok(Lease { node, conn })
    }

    /// Send a batch of commands, returning one reply per command in order.
    ///
    /// In cluster mode the batch is split per target node and every part goes
    /// out as one write. Error replies stay in place as `RespValue::Error`;
    /// MOVED/ASK replies are re-sent individually through the redirect path.
    pub async fn execute_batch(&self, batch: &[(Option<Vec<u8>>, Cmd)]) -> RedisResult<Vec<RespValue>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let routing = self.routing().await?;

        let groups: Vec<Vec<usize>> = match (&routing.topology, routing.mode) {
            (Some(topology), TopologyMode::Cluster) => {
                let mut by_node: HashMap<Endpoint, usize> = HashMap::new();
                let mut groups: Vec<Vec<usize>> = Vec::new();
                for (index, (key, _)) in batch.iter().enumerate() {
                    let node = topology.select_node(key.as_deref(), true)?;
                    let group = *by_node.entry(node.endpoint().clone()).or_insert_with(|| {
                        groups.push(Vec::new());
                        groups.len() - 1
                    });
                    groups[group].push(index);
                }
                groups
            }
            _ => vec![(0..batch.len()).collect()],
        };

        let mut results: Vec<Option<RespValue>> = vec![None; batch.len()];
        for indexes in groups {
            let key = batch[indexes[0]].0.clone();
            let cmds: Arc<Vec<Cmd>> = Arc::new(indexes.iter().map(|&i| batch[i].1.clone()).collect());
            debug!("Sending batch of {} commands", cmds.len());
            let replies = self
                .execute_with(key.as_deref(), true, move |conn| {
                    let cmds = cmds.clone();
                    Box::pin(async move { conn.execute_pipeline(&cmds).await })
                })
                .await?;
            for (index, reply) in indexes.into_iter().zip(replies) {
                results[index] = Some(reply);
            }
        }

        for index in 0..results.len() {
            let redirected = matches!(
                &results[index],
                Some(RespValue::Error(msg)) if RedisError::parse_redirect(msg).is_some()
            );
            if !redirected {
                continue;
            }
            let (key, cmd) = &batch[index];
            let reply = match self.execute::<RespValue>(key.as_deref(), true, cmd).await {
                Ok(reply) => reply,
                Err(RedisError::Server(msg)) => RespValue::Error(msg),
                Err(err) => return Err(err),
            };
            results[index] = Some(reply);
        }

        Ok(results
            .into_iter()
            .map(|reply| reply.unwrap_or(RespValue::Null))
            .collect())
    }

    /// Turn a failed best-effort write into a default value when
    /// `throw_on_failure` is off and the failure was transient
    pub(crate) fn best_effort<T: Default>(&self, result: RedisResult<T>) -> RedisResult<T> {
        match result {
            Err(err) if !self.config.throw_on_failure && err.is_retryable() => {
                warn!("Write failed after retries, returning default: {}", err);
                Ok(T::default())
            }
            other => other,
        }
    }

    fn note_failure(&self, node: &Node, err: &RedisError) {
        if matches!(err, RedisError::Io(_) | RedisError::Connection(_) | RedisError::Timeout) {
            node.record_failure();
        }
    }

    /// Upper bound on the time spent across every attempt and backoff
    fn retry_budget(&self) -> Duration {
        let retry = &self.config.retry;
        let per_attempt = self.config.connect_timeout + self.config.operation_timeout;
        let backoff: Duration = (1..=retry.retry).map(|i| retry.delay_for(i)).sum();
        per_attempt * (retry.retry as u32 + 1) + backoff
    }

    async fn backoff(&self, delay: Duration, cancel: Option<&CancellationToken>) -> RedisResult<()> {
        match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(RedisError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    async fn attempt<T, F>(&self, node: &Arc<Node>, asking: bool, f: &mut F) -> RedisResult<T>
    where
        F: for<'c> FnMut(&'c mut RedisConnection) -> BoxFuture<'c, RedisResult<T>>,
    {
        let mut conn: PooledConnection = node.get().await?;
        if asking {
            conn.query(&Cmd::new("ASKING")).await?;
        }
        f(&mut *conn).await
    }

    async fn run<T, F>(
        &self,
        key: Option<&[u8]>,
        write: bool,
        cancel: Option<&CancellationToken>,
        mut f: F,
    ) -> RedisResult<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut RedisConnection) -> BoxFuture<'c, RedisResult<T>> + Send,
    {
        let routing = self.routing().await?;
        let retry = self.config.retry.retry;
        let max_hops = routing.topology.as_ref().map_or(0, |t| t.nodes().len()) + self.config.max_redirects;
        let deadline = cancel.map(|_| Instant::now() + self.retry_budget());

        let mut attempt = 0;
        let mut hops = 0;
        let mut reroute: Option<Reroute> = None;
        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(RedisError::Cancelled);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(RedisError::Timeout);
            }

            let (node, asking) = match reroute.take() {
                Some(target) => (target.node, target.asking),
                None => (self.select(routing, key, write)?, false),
            };

            let err = match self.attempt(&node, asking, &mut f).await {
                Ok(value) => {
                    node.record_success();
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.is_redirect() || err.is_readonly() {
                let Some(topology) = &routing.topology else {
                    return Err(err);
                };
                hops += 1;
                if hops > max_hops {
                    warn!("Giving up after {} redirects: {}", max_hops, err);
                    return Err(RedisError::MaxRedirects(max_hops));
                }
                match topology.reselect(key, write, &node, &err).await? {
                    Some(target) => {
                        debug!("Redirected from {} to {}", node.endpoint(), target.node.endpoint());
                        reroute = Some(target);
                        continue;
                    }
                    None => return Err(err),
                }
            }

            if !err.is_retryable() {
                return Err(err);
            }

            self.note_failure(&node, &err);
            attempt += 1;
            if attempt > retry {
                warn!("{} failed after {} attempts: {}", node.endpoint(), attempt, err);
                return Err(err);
            }

            if err.is_no_delay() {
                debug!("Retrying at once after {} on {}", err, node.endpoint());
                if routing.topology.is_none() {
                    self.rotate_endpoint(node.endpoint());
                }
            } else {
                let mut delay = self.config.retry.delay_for(attempt);
                if let Some(deadline) = deadline {
                    delay = delay.min(deadline.saturating_duration_since(Instant::now()));
                }
                debug!("Retrying after {:?} following {} on {}", delay, err, node.endpoint());
                self.backoff(delay, cancel).await?;
            }
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("endpoints", &self.endpoints)
            .field("mode", &self.routing.get().map(|r| r.mode))
            .finish()
    }
}

/// A connection borrowed for direct use; returned to its pool on drop
pub struct Lease {
    node: Arc<Node>,
    conn: PooledConnection,
}

impl Lease {
    /// Send one command and wait for its reply
    pub async fn execute(&mut self, command: &str, args: &[RespValue]) -> RedisResult<RespValue> {
        let result = self.conn.execute_command(command, args).await;
        self.track(&result);
        result
    }

    /// Send a prepared command
    pub async fn query(&mut self, cmd: &Cmd) -> RedisResult<RespValue> {
        let result = self.conn.query(cmd).await;
        self.track(&result);
        result
    }

    /// Server this lease talks to
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        self.node.endpoint()
    }

    fn track<T>(&self, result: &RedisResult<T>) {
        match result {
            Ok(_) => self.node.record_success(),
            Err(RedisError::Io(_) | RedisError::Connection(_) | RedisError::Timeout) => {
                self.node.record_failure();
            }
            Err(_) => {}
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("endpoint", self.node.endpoint())
            .field("connection", &self.conn.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(Executor::new(ConnectionConfig::new("")), Err(RedisError::Config(_))));
    }

    #[test]
    fn test_retry_budget_covers_backoff() {
        let executor = Executor::new(
            ConnectionConfig::new("127.0.0.1:6379")
                .with_retry(3)
                .with_connect_timeout(Duration::from_secs(1))
                .with_operation_timeout(Duration::from_secs(1)),
        )
        .unwrap();
        // 4 attempts of 2s plus 500ms + 1s + 2s of backoff
        assert_eq!(executor.retry_budget(), Duration::from_millis(11_500));
    }

    #[tokio::test]
    async fn test_best_effort_degrades_transient_failures() {
        let executor = Executor::new(
            ConnectionConfig::new("127.0.0.1:6379").with_throw_on_failure(false),
        )
        .unwrap();
        assert!(!executor.best_effort::<bool>(Err(RedisError::Timeout)).unwrap());
        assert!(executor
            .best_effort::<bool>(Err(RedisError::Server("ERR".into())))
            .is_err());

        let strict = Executor::new(ConnectionConfig::new("127.0.0.1:6379")).unwrap();
        assert!(strict.best_effort::<bool>(Err(RedisError::Timeout)).is_err());
    }
}
