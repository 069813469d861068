//! Error types for Redis operations

use std::io;
use thiserror::Error;

/// Result type for Redis operations
pub type RedisResult<T> = Result<T, RedisError>;

/// Comprehensive error type for Redis operations
#[derive(Error, Debug)]
pub enum RedisError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed RESP framing; the connection that produced it is discarded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server returned an error
    #[error("Server error: {0}")]
    Server(String),

    /// MOVED redirect in cluster mode
    #[error("MOVED redirect: slot {slot} to {host}:{port}")]
    Moved {
        /// Slot number that was moved
        slot: u16,
        /// Target host
        host: String,
        /// Target port
        port: u16,
    },

    /// ASK redirect in cluster mode
    #[error("ASK redirect: slot {slot} to {host}:{port}")]
    Ask {
        /// Slot number for temporary redirect
        slot: u16,
        /// Target host
        host: String,
        /// Target port
        port: u16,
    },

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// No node owns the requested slot
    #[error("Routing error: {0}")]
    Routing(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// A single value exceeds the configured maximum message size
    #[error("Payload of {size} bytes exceeds the maximum message size of {max} bytes")]
    Capacity {
        /// Declared or actual size of the value
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Type conversion error
    #[error("Type conversion error: {0}")]
    Type(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Cluster error
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// Sentinel error
    #[error("Sentinel error: {0}")]
    Sentinel(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// TLS handshake or certificate error
    #[error("TLS error: {0}")]
    Tls(String),

    /// The operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Too many MOVED/ASK hops for a single command
    #[error("Maximum redirects ({0}) exceeded")]
    MaxRedirects(usize),
}

impl RedisError {
    /// Parse a Redis error message to check for MOVED or ASK redirects
    ///
    /// Format: `MOVED 3999 127.0.0.1:6381` or `ASK 3999 127.0.0.1:6381`.
    #[must_use]
    pub fn parse_redirect(msg: &str) -> Option<Self> {
        let (is_moved, rest) = if let Some(rest) = msg.strip_prefix("MOVED ") {
            (true, rest)
        } else if let Some(rest) = msg.strip_prefix("ASK ") {
            (false, rest)
        } else {
            return None;
        };

        let mut parts = rest.split_whitespace();
        let slot = parts.next()?.parse::<u16>().ok()?;
        let (host, port) = parts.next()?.rsplit_once(':')?;
        let port = port.parse::<u16>().ok()?;
        let host = host.to_string();

        Some(if is_moved {
            Self::Moved { slot, host, port }
        } else {
            Self::Ask { slot, host, port }
        })
    }

    /// Build the error for a `-` reply, turning redirects into routing signals
    #[must_use]
    pub fn from_server_reply(msg: String) -> Self {
        Self::parse_redirect(&msg).unwrap_or(Self::Server(msg))
    }

    /// Check if this error is a redirect (MOVED or ASK)
    #[must_use]
    pub const fn is_redirect(&self) -> bool {
        matches!(self, Self::Moved { .. } | Self::Ask { .. })
    }

    /// Get the target address from a redirect error
    #[must_use]
    pub fn redirect_target(&self) -> Option<(String, u16)> {
        match self {
            Self::Moved { host, port, .. } | Self::Ask { host, port, .. } => {
                Some((host.clone(), *port))
            }
            _ => None,
        }
    }

    /// Get the slot number from a redirect error
    #[must_use]
    pub const fn redirect_slot(&self) -> Option<u16> {
        match self {
            Self::Moved { slot, .. } | Self::Ask { slot, .. } => Some(*slot),
            _ => None,
        }
    }

    /// Faults where retrying the same server would not help.
    ///
    /// The executor moves to the next endpoint and retries without delay.
    #[must_use]
    pub const fn is_no_delay(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Connection(_))
    }

    /// Transient faults that may be retried
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Connection(_) | Self::Timeout | Self::Pool(_)
        )
    }

    /// Faults after which the connection can no longer be trusted to be in sync
    #[must_use]
    pub const fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Connection(_)
                | Self::Protocol(_)
                | Self::Timeout
                | Self::Capacity { .. }
                | Self::Tls(_)
                | Self::Cancelled
        )
    }

    /// A `-READONLY` reply, sent by a replica that was written to after a failover
    #[must_use]
    pub fn is_readonly(&self) -> bool {
        matches!(self, Self::Server(msg) if msg.starts_with("READONLY"))
    }
}
