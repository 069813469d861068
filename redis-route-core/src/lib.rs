//! Core types and traits for the redis-route client engine
//!
//! This crate provides the configuration, error taxonomy, RESP value model
//! and value encoding shared by the transport and routing layers.

#![warn(missing_docs)]

pub mod config;
pub mod encoder;
pub mod error;
pub mod types;
pub mod value;

pub use config::{
    ConnectionConfig, PoolConfig, RefreshConfig, RetryConfig, TlsConfig, TopologyMode,
};
pub use encoder::{JsonEncoder, ValueEncoder};
pub use error::{RedisError, RedisResult};
pub use types::{Endpoint, NodeRole, SlotRange};
pub use value::{FromRespValue, RespValue};
