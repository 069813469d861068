//! Connection pooling
//!
//! One pool per server endpoint. A semaphore bounds the number of live
//! connections; idle connections wait in a LIFO queue so the hottest ones
//! are reused first and the coldest age out at the front.
//!
//! Borrowed connections are exclusively owned by a [`PooledConnection`]
//! guard and go back to the pool when the guard drops. A connection that
//! faulted, or that fails its reset, is destroyed instead.

use crate::connection::RedisConnection;
use parking_lot::Mutex;
use redis_route_core::{
    config::ConnectionConfig,
    error::{RedisError, RedisResult},
    types::Endpoint,
};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info};

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live connections, idle or borrowed
    pub total: usize,
    /// Connections waiting in the pool
    pub idle: usize,
    /// Connections currently borrowed
    pub busy: usize,
    /// Connections opened since the pool was created
    pub created: u64,
    /// Connections closed since the pool was created
    pub destroyed: u64,
}

struct IdleConnection {
    conn: RedisConnection,
    since: Instant,
}

struct PoolInner {
    endpoint: Endpoint,
    config: Arc<ConnectionConfig>,
    select_database: bool,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection>>,
    last_borrow: Mutex<Instant>,
    total: AtomicUsize,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl PoolInner {
    fn pop_idle(&self) -> Option<RedisConnection> {
        self.idle.lock().pop_back().map(|idle| idle.conn)
    }

    fn push_idle(&self, conn: RedisConnection) {
        self.idle.lock().push_back(IdleConnection {
            conn,
            since: Instant::now(),
        });
    }

    fn destroy(&self, mut conn: RedisConnection) {
        conn.close();
        self.total.fetch_sub(1, Ordering::AcqRel);
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        debug!("Destroyed connection #{} to {}", conn.id(), self.endpoint);
    }

    /// Close connections that sat idle too long.
    ///
    /// Connections idle beyond `idle_time` are closed while the pool holds more
    /// than `min_size`; after `all_idle_time` without a single borrow the pool
    /// shrinks to `min_size` regardless of how recently each was returned.
    fn evict_idle(&self, now: Instant) -> usize {
        let pool = &self.config.pool;
        let inactive = !pool.all_idle_time.is_zero()
            && now.saturating_duration_since(*self.last_borrow.lock()) >= pool.all_idle_time;

        let evicted: Vec<RedisConnection> = {
            let mut idle = self.idle.lock();
            let mut evicted = Vec::new();
            let mut live = self.total.load(Ordering::Acquire);
            while live > pool.min_size {
                let expired = idle.front().is_some_and(|front| {
                    inactive || now.saturating_duration_since(front.since) >= pool.idle_time
                });
                if !expired {
                    break;
                }
                if let Some(old) = idle.pop_front() {
                    evicted.push(old.conn);
                    live -= 1;
                }
            }
            evicted
        };

        let count = evicted.len();
        for conn in evicted {
            self.destroy(conn);
        }
        if count > 0 {
            info!("Evicted {} idle connections to {}", count, self.endpoint);
        }
        count
    }
}

/// Pool of connections to a single endpoint
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a new connection pool.
    ///
    /// Connections are opened lazily on borrow. When called inside a tokio
    /// runtime a background task sweeps idle connections until the last
    /// handle to the pool is dropped.
    pub fn new(endpoint: Endpoint, config: Arc<ConnectionConfig>, select_database: bool) -> Self {
        let max = config.pool.max_size.clamp(1, Semaphore::MAX_PERMITS);
        let inner = Arc::new(PoolInner {
            endpoint,
            select_database,
            semaphore: Arc::new(Semaphore::new(max)),
            idle: Mutex::new(VecDeque::new()),
            last_borrow: Mutex::new(Instant::now()),
            total: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            config,
        });

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(sweep_idle(Arc::downgrade(&inner)));
        }

        Self { inner }
    }

    /// Borrow a connection, opening a new one if none is idle.
    ///
    /// Waits up to the pool's `wait_timeout` when `max_size` connections are
    /// already borrowed.
    pub async fn get(&self) -> RedisResult<PooledConnection> {
        let wait = self.inner.config.pool.wait_timeout;
        let permit = match tokio::time::timeout(wait, self.inner.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(RedisError::Pool("Pool is closed".to_string())),
            Err(_) => {
                return Err(RedisError::Pool(format!(
                    "Timed out after {:?} waiting for a connection to {}",
                    wait, self.inner.endpoint
                )))
            }
        };
        *self.inner.last_borrow.lock() = Instant::now();

        while let Some(conn) = self.inner.pop_idle() {
            if conn.is_ready() {
                return Ok(PooledConnection::new(self.inner.clone(), conn, permit));
            }
            self.inner.destroy(conn);
        }

        let conn = RedisConnection::connect(
            self.inner.endpoint.clone(),
            self.inner.config.clone(),
            self.inner.select_database,
        )
        .await?;
        self.inner.total.fetch_add(1, Ordering::AcqRel);
        let created = self.inner.created.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            "Opened connection #{} to {} ({} created)",
            conn.id(),
            self.inner.endpoint,
            created
        );
        Ok(PooledConnection::new(self.inner.clone(), conn, permit))
    }

    /// Close every idle connection
    pub fn clear(&self) {
        let drained: Vec<IdleConnection> = self.inner.idle.lock().drain(..).collect();
        for idle in drained {
            self.inner.destroy(idle.conn);
        }
    }

    /// Run one eviction pass as of `now`, returning the number of connections closed
    pub fn evict_idle(&self, now: Instant) -> usize {
        self.inner.evict_idle(now)
    }

    /// Endpoint served by this pool
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let total = self.inner.total.load(Ordering::Acquire);
        let idle = self.inner.idle.lock().len();
        PoolStats {
            total,
            idle,
            busy: total.saturating_sub(idle),
            created: self.inner.created.load(Ordering::Relaxed),
            destroyed: self.inner.destroyed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("endpoint", &self.inner.endpoint)
            .field("stats", &self.stats())
            .finish()
    }
}

async fn sweep_idle(pool: Weak<PoolInner>) {
    let period = match pool.upgrade() {
        Some(inner) => {
            let cfg = &inner.config.pool;
            (cfg.idle_time.min(cfg.all_idle_time) / 2).clamp(Duration::from_millis(100), Duration::from_secs(10))
        }
        None => return,
    };

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let Some(inner) = pool.upgrade() else {
            break;
        };
        inner.evict_idle(Instant::now());
    }
}

/// RAII guard over a borrowed connection
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<RedisConnection>,
    valid: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: RedisConnection, permit: OwnedSemaphorePermit) -> Self {
        Self {
            pool,
            conn: Some(conn),
            valid: true,
            _permit: permit,
        }
    }

    /// Destroy the connection instead of returning it
    pub fn discard(&mut self) {
        self.valid = false;
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("endpoint", &self.pool.endpoint)
            .field("connection", &self.conn.as_ref().map(RedisConnection::id))
            .finish()
    }
}

impl Deref for PooledConnection {
    type Target = RedisConnection;

    fn deref(&self) -> &RedisConnection {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut RedisConnection {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        if self.valid && conn.reset() {
            self.pool.push_idle(conn);
        } else {
            self.pool.destroy(conn);
        }
    }
}
