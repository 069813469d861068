//! RESP (`REdis` Serialization Protocol) value types

use crate::error::{RedisError, RedisResult};
use bytes::Bytes;

/// RESP protocol value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(String),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Bulk string: $6\r\nfoobar\r\n
    BulkString(Bytes),
    /// Null bulk string ($-1\r\n) or null array (*-1\r\n)
    Null,
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Convert to a string if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to a string.
    pub fn as_string(&self) -> RedisResult<String> {
        match self {
            Self::SimpleString(s) => Ok(s.clone()),
            Self::BulkString(b) => String::from_utf8(b.to_vec())
                .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}"))),
            Self::Integer(i) => Ok(i.to_string()),
            Self::Null => Err(RedisError::Type("Value is null".to_string())),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {self:?} to string"
            ))),
        }
    }

    /// Convert to an integer if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to an integer.
    pub fn as_int(&self) -> RedisResult<i64> {
        match self {
            Self::Integer(i) => Ok(*i),
            Self::BulkString(_) | Self::SimpleString(_) => self
                .as_string()?
                .parse::<i64>()
                .map_err(|e| RedisError::Type(format!("Cannot parse integer: {e}"))),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {self:?} to integer"
            ))),
        }
    }

    /// Convert to bytes if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to bytes.
    pub fn as_bytes(&self) -> RedisResult<Bytes> {
        match self {
            Self::BulkString(b) => Ok(b.clone()),
            Self::SimpleString(s) => Ok(Bytes::from(s.as_bytes().to_vec())),
            Self::Null => Err(RedisError::Type("Value is null".to_string())),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {self:?} to bytes"
            ))),
        }
    }

    /// Check if this is a null value
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if this is an error
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Turn an error reply into `Err`, leaving every other value untouched
    ///
    /// # Errors
    ///
    /// Returns `Moved`/`Ask` for redirects and `Server` for other error replies.
    pub fn into_result(self) -> RedisResult<Self> {
        match self {
            Self::Error(msg) => Err(RedisError::from_server_reply(msg)),
            other => Ok(other),
        }
    }

    /// Short name of the reply type, used in conversion errors
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SimpleString(_) => "simple string",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::BulkString(_) => "bulk string",
            Self::Null => "null",
            Self::Array(_) => "array",
        }
    }
}

impl From<String> for RespValue {
    fn from(s: String) -> Self {
        Self::BulkString(Bytes::from(s.into_bytes()))
    }
}
impl From<&str> for RespValue {
    fn from(s: &str) -> Self {
        Self::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }
}
impl From<i64> for RespValue {
    fn from(i: i64) -> Self {
        Self::BulkString(Bytes::from(i.to_string()))
    }
}
impl From<u64> for RespValue {
    fn from(i: u64) -> Self {
        Self::BulkString(Bytes::from(i.to_string()))
    }
}
impl From<usize> for RespValue {
    fn from(i: usize) -> Self {
        Self::BulkString(Bytes::from(i.to_string()))
    }
}
impl From<u16> for RespValue {
    fn from(i: u16) -> Self {
        Self::BulkString(Bytes::from(i.to_string()))
    }
}
impl From<f64> for RespValue {
    fn from(f: f64) -> Self {
        Self::BulkString(Bytes::from(f.to_string()))
    }
}
impl From<Vec<u8>> for RespValue {
    fn from(b: Vec<u8>) -> Self {
        Self::BulkString(Bytes::from(b))
    }
}
impl From<&[u8]> for RespValue {
    fn from(b: &[u8]) -> Self {
        Self::BulkString(Bytes::copy_from_slice(b))
    }
}
impl From<Bytes> for RespValue {
    fn from(b: Bytes) -> Self {
        Self::BulkString(b)
    }
}

/// Conversion from a reply into the type a caller asked for
pub trait FromRespValue: Sized {
    /// Convert the reply.
    ///
    /// # Errors
    ///
    /// Error replies become `Server`/`Moved`/`Ask`; mismatched shapes become `Type`.
    fn from_resp(value: RespValue) -> RedisResult<Self>;
}

impl FromRespValue for RespValue {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        value.into_result()
    }
}

impl FromRespValue for () {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        value.into_result().map(|_| ())
    }
}

impl FromRespValue for String {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        value.into_result()?.as_string()
    }
}

impl FromRespValue for i64 {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        value.into_result()?.as_int()
    }
}

impl FromRespValue for u64 {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        let i = i64::from_resp(value)?;
        u64::try_from(i).map_err(|_| RedisError::Type(format!("Negative value {i} for u64")))
    }
}

impl FromRespValue for f64 {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        match value.into_result()? {
            RespValue::Integer(i) => Ok(i as f64),
            other => other
                .as_string()?
                .parse::<f64>()
                .map_err(|e| RedisError::Type(format!("Cannot parse float: {e}"))),
        }
    }
}

impl FromRespValue for bool {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        match value.into_result()? {
            RespValue::Integer(i) => Ok(i != 0),
            RespValue::SimpleString(s) => Ok(s == "OK"),
            RespValue::Null => Ok(false),
            RespValue::BulkString(b) => Ok(&b[..] == b"1" || &b[..] == b"OK"),
            other => Err(RedisError::Type(format!(
                "Cannot convert {} to bool",
                other.kind()
            ))),
        }
    }
}

impl FromRespValue for Bytes {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        value.into_result()?.as_bytes()
    }
}

impl FromRespValue for Vec<u8> {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        Bytes::from_resp(value).map(|b| b.to_vec())
    }
}

impl<T: FromRespValue> FromRespValue for Option<T> {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        match value.into_result()? {
            RespValue::Null => Ok(None),
            other => T::from_resp(other).map(Some),
        }
    }
}

impl<T: FromRespValue> FromRespValue for Vec<T> {
    fn from_resp(value: RespValue) -> RedisResult<Self> {
        match value.into_result()? {
            RespValue::Array(items) => items.into_iter().map(T::from_resp).collect(),
            RespValue::Null => Ok(Vec::new()),
            other => Err(RedisError::Type(format!(
                "Cannot convert {} to array",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(i64::from_resp(RespValue::Integer(42)).unwrap(), 42);
        assert_eq!(i64::from_resp(RespValue::from("17")).unwrap(), 17);
        assert_eq!(
            String::from_resp(RespValue::SimpleString("OK".into())).unwrap(),
            "OK"
        );
        assert!(bool::from_resp(RespValue::SimpleString("OK".into())).unwrap());
        assert!(!bool::from_resp(RespValue::Integer(0)).unwrap());
        assert!(!bool::from_resp(RespValue::Null).unwrap());
        assert_eq!(f64::from_resp(RespValue::from("1.5")).unwrap(), 1.5);
        assert!(u64::from_resp(RespValue::Integer(-1)).is_err());
    }

    #[test]
    fn test_option_and_vec() {
        assert_eq!(Option::<String>::from_resp(RespValue::Null).unwrap(), None);
        assert_eq!(
            Option::<String>::from_resp(RespValue::from("v")).unwrap(),
            Some("v".to_string())
        );

        let array = RespValue::Array(vec![RespValue::from("a"), RespValue::Null]);
        assert_eq!(
            Vec::<Option<String>>::from_resp(array).unwrap(),
            vec![Some("a".to_string()), None]
        );
        assert!(Vec::<i64>::from_resp(RespValue::Integer(1)).is_err());
    }

    #[test]
    fn test_error_reply_is_surfaced() {
        let err = String::from_resp(RespValue::Error("WRONGTYPE bad".into())).unwrap_err();
        assert!(matches!(err, RedisError::Server(ref m) if m.starts_with("WRONGTYPE")));

        let err = Option::<String>::from_resp(RespValue::Error("MOVED 1 h:1".into())).unwrap_err();
        assert!(err.is_redirect());
    }

    #[test]
    fn test_argument_conversions() {
        assert_eq!(RespValue::from(42i64), RespValue::BulkString(Bytes::from("42")));
        assert_eq!(RespValue::from("k"), RespValue::BulkString(Bytes::from("k")));
    }
}
