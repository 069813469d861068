//! Configuration types for Redis connections

use crate::error::{RedisError, RedisResult};
use crate::types::Endpoint;
use std::time::Duration;

/// Configuration for connection pooling
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections kept open when the pool shrinks
    pub min_size: usize,
    /// Maximum number of connections per endpoint.
    ///
    /// Very large values make the pool effectively unbounded.
    pub max_size: usize,
    /// Idle connections above `min_size` are closed after this long
    pub idle_time: Duration,
    /// After this long with no borrow at all, the pool shrinks to `min_size`
    /// (`Duration::ZERO` disables)
    pub all_idle_time: Duration,
    /// How long a borrow waits for a free slot when the pool is at `max_size`
    pub wait_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 100_000,
            idle_time: Duration::from_secs(20),
            all_idle_time: Duration::from_secs(120),
            wait_timeout: Duration::from_secs(5),
        }
    }
}

/// Topology detection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyMode {
    /// Detect from the server's `INFO` reply
    Auto,
    /// Single server, with client-side failover across the endpoint list
    Standalone,
    /// Hash-sharded cluster
    Cluster,
    /// Endpoints are sentinels monitoring a master
    Sentinel,
    /// Static master with read replicas
    Replication,
}

/// Retry and backoff policy
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first one fails
    pub retry: usize,
    /// Delay before the first backoff retry
    pub initial_delay: Duration,
    /// Upper bound on a single backoff delay
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff delay before retry number `attempt` (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exp);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Background topology refresh timers
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Period of `CLUSTER NODES` refreshes
    pub cluster_interval: Duration,
    /// First sentinel/replication refresh
    pub replica_first_tick: Duration,
    /// Later sentinel/replication refreshes
    pub replica_interval: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            cluster_interval: Duration::from_secs(60),
            replica_first_tick: Duration::from_secs(60),
            replica_interval: Duration::from_secs(600),
        }
    }
}

/// TLS settings
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Wrap every connection in TLS
    pub enabled: bool,
    /// SHA-1 thumbprint (hex) that some certificate in the server chain must match.
    ///
    /// When unset every certificate is accepted.
    pub certificate_thumbprint: Option<String>,
    /// Server name sent in SNI, defaults to the endpoint host
    pub server_name: Option<String>,
}

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Endpoint list (e.g. `redis://host1:6379,host2:6379`); later entries are failover targets
    pub connection_string: String,

    /// Optional ACL user name
    pub username: Option<String>,

    /// Optional password for authentication
    pub password: Option<String>,

    /// Database number (standalone and replication only)
    pub database: u8,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Read/write operation timeout
    pub operation_timeout: Duration,

    /// Enable TCP keepalive
    pub tcp_keepalive: Option<Duration>,

    /// Retry policy
    pub retry: RetryConfig,

    /// How long a failing node is excluded from selection
    pub shielding_time: Duration,

    /// Largest single value accepted in either direction (0 disables the check)
    pub max_message_size: usize,

    /// TLS settings
    pub tls: TlsConfig,

    /// Topology detection mode
    pub topology_mode: TopologyMode,

    /// Master name monitored by sentinels; the first reported master when unset
    pub master_name: Option<String>,

    /// Topology refresh timers
    pub refresh: RefreshConfig,

    /// Pool configuration
    pub pool: PoolConfig,

    /// Commit an open pipeline automatically once it buffers this many commands (0 disables)
    pub auto_pipeline: usize,

    /// Buffer reads in an open pipeline as well as writes
    pub full_pipeline: bool,

    /// When false, best-effort writes report failure as `false`/empty instead of an error
    pub throw_on_failure: bool,

    /// Maximum MOVED/ASK hops for one command, on top of the node count
    pub max_redirects: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_string: "redis://localhost:6379".to_string(),
            username: None,
            password: None,
            database: 0,
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(3),
            tcp_keepalive: Some(Duration::from_secs(60)),
            retry: RetryConfig::default(),
            shielding_time: Duration::from_secs(10),
            max_message_size: 1024 * 1024 * 1024,
            tls: TlsConfig::default(),
            topology_mode: TopologyMode::Auto,
            master_name: None,
            refresh: RefreshConfig::default(),
            pool: PoolConfig::default(),
            auto_pipeline: 0,
            full_pipeline: false,
            throw_on_failure: true,
            max_redirects: 3,
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration with the given endpoint list
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }

    /// Parse a `key=value;` connection string.
    ///
    /// `server=127.0.0.1:6379,127.0.0.1:6380;password=secret;db=3;timeout=3000`
    ///
    /// A string without `=` is treated as a bare endpoint list. Timeouts are
    /// milliseconds, `idletime`/`allidletime`/`shieldingtime` are seconds.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown keys or values that do not parse.
    pub fn parse(input: &str) -> RedisResult<Self> {
        if !input.contains('=') {
            let config = Self::new(input.trim());
            config.validate()?;
            return Ok(config);
        }

        let mut config = Self::new("");
        for pair in input.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| RedisError::Config(format!("Expected key=value, got '{}'", pair)))?;
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                "server" | "servers" | "host" => config.connection_string = value.to_string(),
                "user" | "username" => config.username = non_empty(value),
                "password" | "pass" => config.password = non_empty(value),
                "db" | "database" => config.database = parse_num(key, value)?,
                "timeout" => config.operation_timeout = millis(key, value)?,
                "connecttimeout" => config.connect_timeout = millis(key, value)?,
                "retry" => config.retry.retry = parse_num(key, value)?,
                "shieldingtime" => config.shielding_time = secs(key, value)?,
                "maxmessagesize" => config.max_message_size = parse_num(key, value)?,
                "ssl" | "tls" => config.tls.enabled = parse_bool(key, value)?,
                "certificate" | "thumbprint" => {
                    config.tls.certificate_thumbprint = non_empty(value);
                }
                "mastername" => config.master_name = non_empty(value),
                "mode" => config.topology_mode = parse_mode(value)?,
                "autopipeline" => config.auto_pipeline = parse_num(key, value)?,
                "fullpipeline" => config.full_pipeline = parse_bool(key, value)?,
                "throwonfailure" => config.throw_on_failure = parse_bool(key, value)?,
                "minpool" => config.pool.min_size = parse_num(key, value)?,
                "maxpool" => config.pool.max_size = parse_num(key, value)?,
                "idletime" => config.pool.idle_time = secs(key, value)?,
                "allidletime" => config.pool.all_idle_time = secs(key, value)?,
                other => {
                    return Err(RedisError::Config(format!(
                        "Unknown connection string key '{}'",
                        other
                    )))
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint is configured or the pool bounds are inverted.
    pub fn validate(&self) -> RedisResult<()> {
        self.endpoints()?;
        if self.pool.max_size == 0 {
            return Err(RedisError::Config("Pool max size must be positive".to_string()));
        }
        if self.pool.min_size > self.pool.max_size {
            return Err(RedisError::Config(format!(
                "Pool min size {} exceeds max size {}",
                self.pool.min_size, self.pool.max_size
            )));
        }
        Ok(())
    }

    /// Set the user name and password for authentication
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: Option<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username;
        self.password = Some(password.into());
        self
    }

    /// Set the password for authentication
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database number
    #[must_use]
    pub const fn with_database(mut self, database: u8) -> Self {
        self.database = database;
        self
    }

    /// Set the connection timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the operation timeout
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the number of retries
    #[must_use]
    pub const fn with_retry(mut self, retry: usize) -> Self {
        self.retry.retry = retry;
        self
    }

    /// Set the shielding window for failing nodes
    #[must_use]
    pub const fn with_shielding_time(mut self, shielding_time: Duration) -> Self {
        self.shielding_time = shielding_time;
        self
    }

    /// Set the maximum message size
    #[must_use]
    pub const fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Set the topology mode
    #[must_use]
    pub const fn with_topology_mode(mut self, mode: TopologyMode) -> Self {
        self.topology_mode = mode;
        self
    }

    /// Set the master name watched by sentinels
    #[must_use]
    pub fn with_master_name(mut self, name: impl Into<String>) -> Self {
        self.master_name = Some(name.into());
        self
    }

    /// Set the pool configuration
    #[must_use]
    pub const fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the TLS configuration
    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Commit pipelines automatically after `threshold` buffered commands
    #[must_use]
    pub const fn with_auto_pipeline(mut self, threshold: usize) -> Self {
        self.auto_pipeline = threshold;
        self
    }

    /// Buffer reads as well as writes inside an open pipeline
    #[must_use]
    pub const fn with_full_pipeline(mut self, full: bool) -> Self {
        self.full_pipeline = full;
        self
    }

    /// Choose between raising errors and degrading best-effort writes
    #[must_use]
    pub const fn with_throw_on_failure(mut self, throw: bool) -> Self {
        self.throw_on_failure = throw;
        self
    }

    /// Set the maximum number of redirects
    #[must_use]
    pub const fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Parse connection endpoints from connection string
    ///
    /// # Errors
    ///
    /// Returns an error if the list is empty or an entry is malformed.
    pub fn endpoints(&self) -> RedisResult<Vec<Endpoint>> {
        let endpoints = self
            .connection_string
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Endpoint::parse)
            .collect::<RedisResult<Vec<_>>>()?;

        if endpoints.is_empty() {
            return Err(RedisError::Config("No endpoints specified".to_string()));
        }
        Ok(endpoints)
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> RedisResult<T> {
    value
        .parse::<T>()
        .map_err(|_| RedisError::Config(format!("Invalid number for '{}': {}", key, value)))
}

fn millis(key: &str, value: &str) -> RedisResult<Duration> {
    parse_num::<u64>(key, value).map(Duration::from_millis)
}

fn secs(key: &str, value: &str) -> RedisResult<Duration> {
    parse_num::<u64>(key, value).map(Duration::from_secs)
}

fn parse_bool(key: &str, value: &str) -> RedisResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(RedisError::Config(format!(
            "Invalid boolean for '{}': {}",
            key, value
        ))),
    }
}

fn parse_mode(value: &str) -> RedisResult<TopologyMode> {
    match value.to_ascii_lowercase().as_str() {
        "auto" => Ok(TopologyMode::Auto),
        "standalone" => Ok(TopologyMode::Standalone),
        "cluster" => Ok(TopologyMode::Cluster),
        "sentinel" => Ok(TopologyMode::Sentinel),
        "replication" => Ok(TopologyMode::Replication),
        _ => Err(RedisError::Config(format!("Unknown topology mode: {}", value))),
    }
}
