//! Pluggable encoding of application values into command arguments

use crate::error::{RedisError, RedisResult};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Turns application values into argument bytes and back.
///
/// Strings and raw bytes never pass through an encoder; it only sees values
/// that have been lowered to a [`serde_json::Value`].
pub trait ValueEncoder: Send + Sync {
    /// Encode one value
    fn encode_value(&self, value: &Value) -> RedisResult<Bytes>;

    /// Decode bytes previously produced by `encode_value`
    fn decode_value(&self, data: &[u8]) -> RedisResult<Value>;
}

/// Primitives in textual form, everything else as JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEncoder;

impl ValueEncoder for JsonEncoder {
    fn encode_value(&self, value: &Value) -> RedisResult<Bytes> {
        match value {
            Value::Null => Ok(Bytes::new()),
            Value::String(s) => Ok(Bytes::from(s.clone())),
            Value::Bool(b) => Ok(Bytes::from(b.to_string())),
            Value::Number(n) => Ok(Bytes::from(n.to_string())),
            complex => serde_json::to_vec(complex)
                .map(Bytes::from)
                .map_err(|e| RedisError::Type(format!("JSON encode failed: {e}"))),
        }
    }

    fn decode_value(&self, data: &[u8]) -> RedisResult<Value> {
        if data.is_empty() {
            return Ok(Value::Null);
        }
        // plain text was stored verbatim, so anything that is not JSON is a string
        match serde_json::from_slice::<Value>(data) {
            Ok(value) => Ok(value),
            Err(_) => String::from_utf8(data.to_vec())
                .map(Value::String)
                .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}"))),
        }
    }
}

/// Encode any serializable value with `encoder`
///
/// # Errors
///
/// Returns a `Type` error if the value cannot be serialized.
pub fn encode<T: Serialize + ?Sized>(encoder: &dyn ValueEncoder, value: &T) -> RedisResult<Bytes> {
    let value = serde_json::to_value(value)
        .map_err(|e| RedisError::Type(format!("Cannot serialize value: {e}")))?;
    encoder.encode_value(&value)
}

/// Decode bytes into `T` with `encoder`
///
/// # Errors
///
/// Returns a `Type` error if the bytes do not describe a `T`.
pub fn decode<T: DeserializeOwned>(encoder: &dyn ValueEncoder, data: &[u8]) -> RedisResult<T> {
    let value = encoder.decode_value(data)?;
    match serde_json::from_value(value) {
        Ok(decoded) => Ok(decoded),
        // "12" stored as a string still has to read back as a string
        Err(e) => std::str::from_utf8(data)
            .ok()
            .and_then(|text| serde_json::from_value(Value::String(text.to_string())).ok())
            .ok_or_else(|| RedisError::Type(format!("Cannot deserialize value: {e}"))),
    }
}
