//! Redis wire protocol
//!
//! Commands are framed as RESP arrays of bulk strings; replies are decoded
//! by their leading type byte (`+ - : $ *`).

pub mod resp2;

pub use resp2::{RespDecoder, RespEncoder};

use bytes::{Bytes, BytesMut};
use redis_route_core::{encoder, RedisResult, RespValue, ValueEncoder};
use serde::Serialize;

/// A command name plus its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    name: String,
    args: Vec<RespValue>,
}

impl Cmd {
    /// Start a command
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append a string, bytes or integer argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<RespValue>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    #[must_use]
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<RespValue>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append an arbitrary value through a value encoder
    ///
    /// # Errors
    ///
    /// Returns a `Type` error if the value cannot be serialized.
    pub fn arg_encoded<T: Serialize + ?Sized>(
        mut self,
        value_encoder: &dyn ValueEncoder,
        value: &T,
    ) -> RedisResult<Self> {
        let bytes: Bytes = encoder::encode(value_encoder, value)?;
        self.args.push(RespValue::BulkString(bytes));
        Ok(self)
    }

    /// Command name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command arguments
    #[must_use]
    pub fn arguments(&self) -> &[RespValue] {
        &self.args
    }

    /// Append the wire form to `buf`, enforcing `max_size` per argument
    pub fn write_to(&self, max_size: usize, buf: &mut BytesMut) -> RedisResult<()> {
        RespEncoder::encode_command_into(&self.name, &self.args, max_size, buf)
    }
}

/// Shorthand for [`Cmd::new`]
pub fn cmd(name: impl Into<String>) -> Cmd {
    Cmd::new(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis_route_core::JsonEncoder;
    use std::collections::BTreeMap;

    #[test]
    fn test_cmd_builder() {
        let cmd = cmd("SET").arg("key").arg(&b"raw"[..]).arg(10i64);
        assert_eq!(cmd.name(), "SET");
        assert_eq!(cmd.arguments().len(), 3);

        let mut buf = BytesMut::new();
        cmd.write_to(0, &mut buf).unwrap();
        assert_eq!(
            &buf[..],
            b"*4\r\n$3\r\nSET\r\n$3\r\nkey\r\n$3\r\nraw\r\n$2\r\n10\r\n"
        );
    }

    #[test]
    fn test_cmd_encoded_argument() {
        let mut map = BTreeMap::new();
        map.insert("a", 1);
        let cmd = Cmd::new("SET").arg("k").arg_encoded(&JsonEncoder, &map).unwrap();
        assert_eq!(cmd.arguments()[1], RespValue::from(r#"{"a":1}"#));
    }

    #[test]
    fn test_cmd_args_iter() {
        let cmd = Cmd::new("DEL").args(["a", "b", "c"]);
        assert_eq!(cmd.arguments().len(), 3);
    }
}
