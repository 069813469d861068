//! RESP2 protocol implementation
//!
//! This module implements the Redis Serialization Protocol (RESP2) for
//! encoding commands and decoding (possibly pipelined) replies.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use redis_route_core::{
    error::{RedisError, RedisResult},
    value::RespValue,
};
use std::io::Cursor;

const CRLF: &[u8] = b"\r\n";

/// Longest header line (`$<len>`, `:<int>`, `+status`, `-error`) accepted before
/// the framing is declared broken
const MAX_LINE: usize = 64 * 1024;

/// Encodes RESP values and commands into bytes
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a RESP value into a buffer
    pub fn encode(value: &RespValue, buf: &mut BytesMut) -> RedisResult<()> {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(i) => {
                buf.put_u8(b':');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(data) => Self::put_bulk(data, buf),
            RespValue::Null => {
                buf.put_slice(b"$-1\r\n");
            }
            RespValue::Array(arr) => {
                buf.put_u8(b'*');
                buf.put_slice(arr.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for item in arr {
                    Self::encode(item, buf)?;
                }
            }
        }
        Ok(())
    }

    /// Encode a command with arguments
    pub fn encode_command(command: &str, args: &[RespValue]) -> RedisResult<Bytes> {
        let mut buf = BytesMut::new();
        Self::encode_command_into(command, args, 0, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Append `*<argc+1>\r\n$<len>\r\n<cmd>\r\n($<len>\r\n<arg>\r\n)*` to `buf`.
    ///
    /// Every argument is sent as a bulk string. When `max_size` is non-zero an
    /// argument longer than it fails with `Capacity` and nothing is appended.
    pub fn encode_command_into(
        command: &str,
        args: &[RespValue],
        max_size: usize,
        buf: &mut BytesMut,
    ) -> RedisResult<()> {
        if max_size > 0 {
            for arg in args {
                let size = Self::arg_len(arg)?;
                if size > max_size {
                    return Err(RedisError::Capacity {
                        size,
                        max: max_size,
                    });
                }
            }
        }

        let total_len = 1 + args.len();
        buf.put_u8(b'*');
        buf.put_slice(total_len.to_string().as_bytes());
        buf.put_slice(CRLF);

        Self::put_bulk(command.as_bytes(), buf);

        for arg in args {
            match arg {
                RespValue::BulkString(data) => Self::put_bulk(data, buf),
                RespValue::SimpleString(s) | RespValue::Error(s) => Self::put_bulk(s.as_bytes(), buf),
                RespValue::Integer(i) => Self::put_bulk(i.to_string().as_bytes(), buf),
                RespValue::Null => Self::put_bulk(b"", buf),
                RespValue::Array(_) => {
                    return Err(RedisError::Type(
                        "Arrays are not valid command arguments".to_string(),
                    ))
                }
            }
        }

        Ok(())
    }

    fn arg_len(arg: &RespValue) -> RedisResult<usize> {
        match arg {
            RespValue::BulkString(data) => Ok(data.len()),
            RespValue::SimpleString(s) | RespValue::Error(s) => Ok(s.len()),
            RespValue::Integer(_) | RespValue::Null => Ok(0),
            RespValue::Array(_) => Err(RedisError::Type(
                "Arrays are not valid command arguments".to_string(),
            )),
        }
    }

    fn put_bulk(data: &[u8], buf: &mut BytesMut) {
        buf.reserve(data.len() + 16);
        buf.put_u8(b'$');
        buf.put_slice(data.len().to_string().as_bytes());
        buf.put_slice(CRLF);
        buf.put_slice(data);
        buf.put_slice(CRLF);
    }
}

/// Decodes RESP values from bytes
pub struct RespDecoder;

impl RespDecoder {
    /// Decode a RESP value from a buffer without a size limit
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete value.
    pub fn decode(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        Self::decode_with_limit(buf, 0)
    }

    /// Decode a RESP value, rejecting any bulk string or array whose declared
    /// size exceeds `max_size` (0 disables the check).
    ///
    /// The check runs on the length header, before any payload is buffered.
    pub fn decode_with_limit(
        buf: &mut Cursor<&[u8]>,
        max_size: usize,
    ) -> RedisResult<Option<RespValue>> {
        if !buf.has_remaining() {
            return Ok(None);
        }

        let type_byte = buf.chunk()[0];

        match type_byte {
            b'+' => Self::decode_simple_string(buf),
            b'-' => Self::decode_error(buf),
            b':' => Self::decode_integer(buf),
            b'$' => Self::decode_bulk_string(buf, max_size),
            b'*' => Self::decode_array(buf, max_size),
            _ => Err(RedisError::Protocol(format!(
                "Invalid RESP type byte: 0x{:02x}",
                type_byte
            ))),
        }
    }

    fn decode_simple_string(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        buf.advance(1); // Skip '+'

        match Self::read_line(buf)? {
            Some(line) => Ok(Some(RespValue::SimpleString(Self::utf8(line)?))),
            None => Ok(None),
        }
    }

    fn decode_error(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        buf.advance(1); // Skip '-'

        match Self::read_line(buf)? {
            Some(line) => Ok(Some(RespValue::Error(Self::utf8(line)?))),
            None => Ok(None),
        }
    }

    fn decode_integer(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        buf.advance(1); // Skip ':'

        match Self::read_line(buf)? {
            Some(line) => Ok(Some(RespValue::Integer(Self::parse_int(line, "integer")?))),
            None => Ok(None),
        }
    }

    fn decode_bulk_string(
        buf: &mut Cursor<&[u8]>,
        max_size: usize,
    ) -> RedisResult<Option<RespValue>> {
        buf.advance(1); // Skip '$'

        let len = match Self::read_line(buf)? {
            Some(line) => Self::parse_int(line, "bulk string length")?,
            None => return Ok(None),
        };

        if len == -1 {
            return Ok(Some(RespValue::Null));
        }
        let len = Self::checked_len(len, max_size)?;

        // Check if we have the payload and its CRLF
        if buf.remaining() < len + 2 {
            return Ok(None);
        }

        let data = Bytes::copy_from_slice(&buf.chunk()[..len]);
        buf.advance(len);

        if &buf.chunk()[..2] != CRLF {
            return Err(RedisError::Protocol(
                "Bulk string not terminated by CRLF".to_string(),
            ));
        }
        buf.advance(2);

        Ok(Some(RespValue::BulkString(data)))
    }

    fn decode_array(buf: &mut Cursor<&[u8]>, max_size: usize) -> RedisResult<Option<RespValue>> {
        buf.advance(1); // Skip '*'

        let len = match Self::read_line(buf)? {
            Some(line) => Self::parse_int(line, "array length")?,
            None => return Ok(None),
        };

        if len == -1 {
            return Ok(Some(RespValue::Null));
        }
        let len = Self::checked_len(len, max_size)?;

        // each element needs at least 3 bytes, so never trust the header for capacity
        let mut arr = Vec::with_capacity(len.min(buf.remaining() / 3));
        for _ in 0..len {
            match Self::decode_with_limit(buf, max_size)? {
                Some(value) => arr.push(value),
                None => return Ok(None),
            }
        }

        Ok(Some(RespValue::Array(arr)))
    }

    fn checked_len(len: i64, max_size: usize) -> RedisResult<usize> {
        let len = usize::try_from(len)
            .map_err(|_| RedisError::Protocol(format!("Invalid length: {}", len)))?;
        if max_size > 0 && len > max_size {
            return Err(RedisError::Capacity {
                size: len,
                max: max_size,
            });
        }
        Ok(len)
    }

    fn parse_int(line: &[u8], what: &str) -> RedisResult<i64> {
        std::str::from_utf8(line)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| {
                RedisError::Protocol(format!(
                    "Invalid {}: {:?}",
                    what,
                    String::from_utf8_lossy(line)
                ))
            })
    }

    fn utf8(line: &[u8]) -> RedisResult<String> {
        String::from_utf8(line.to_vec())
            .map_err(|e| RedisError::Protocol(format!("Invalid UTF-8: {}", e)))
    }

    fn read_line<'a>(buf: &mut Cursor<&'a [u8]>) -> RedisResult<Option<&'a [u8]>> {
        let start = buf.position() as usize;
        let slice: &'a [u8] = *buf.get_ref();

        // Find CRLF
        if let Some(offset) = slice[start..].windows(2).position(|w| w == CRLF) {
            let end = start + offset;
            buf.set_position((end + 2) as u64);
            return Ok(Some(&slice[start..end]));
        }

        if slice.len() - start > MAX_LINE {
            return Err(RedisError::Protocol(format!(
                "Header line longer than {} bytes",
                MAX_LINE
            )));
        }
        Ok(None)
    }
}
