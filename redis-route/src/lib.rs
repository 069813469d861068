//! Async Redis client engine with pooling and topology-aware routing
//!
//! `redis-route` speaks RESP2 over TCP (optionally TLS) and routes every
//! command to the right node of a standalone server, a master/replica set,
//! a sentinel-managed deployment or a Redis Cluster. The deployment kind is
//! detected on first use unless configured explicitly.
//!
//! # Features
//!
//! - Per-node connection pools with idle eviction
//! - Retries with exponential backoff and endpoint rotation
//! - Transparent handling of MOVED, ASK and READONLY replies
//! - Background topology refresh with atomically published snapshots
//! - Write pipelining through a caller-owned [`Pipeline`]
//! - A blocking facade in [`blocking`]
//!
//! # Quick Start
//!
//! ```no_run
//! use redis_route::{Client, ConnectionConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("redis://localhost:6379")
//!         .with_operation_timeout(Duration::from_secs(2));
//!     let client = Client::connect(config).await?;
//!
//!     client.set("mykey", "myvalue").await?;
//!     let value: Option<String> = client.get("mykey").await?;
//!     println!("Value: {:?}", value);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::future_not_send)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::manual_let_else)]

pub mod blocking;
pub mod client;
pub mod connection;
pub mod executor;
pub mod node;
pub mod pipeline;
pub mod pool;
pub mod protocol;
#[cfg(feature = "tls")]
mod tls;
pub mod topology;

pub use client::Client;
pub use connection::{ConnectionState, RedisConnection};
pub use executor::{Executor, Lease};
pub use pipeline::{Pipeline, PipelineReply, PipelineResults, Queued};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use protocol::{cmd, Cmd};
pub use topology::{Reroute, Topology};

pub use redis_route_core::{
    config::{ConnectionConfig, PoolConfig, RefreshConfig, RetryConfig, TlsConfig, TopologyMode},
    encoder::{JsonEncoder, ValueEncoder},
    error::{RedisError, RedisResult},
    types::{Endpoint, NodeRole, SlotRange},
    value::{FromRespValue, RespValue},
};
