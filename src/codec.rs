// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0
//! RESP wire codec (§4.A): encodes a [`Command`] into the bulk-string array
//! form and incrementally decodes an inbound byte stream into [`Reply`]
//! values.

use crate::error::RespError;
use crate::reply::{Command, Reply};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Arrays nest at most this deep by default; callers that need more can
/// build a codec with [`RespCodec::with_max_depth`].
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// A `Stream + Sink` codec over `tokio_util::codec::Framed`. Holds no state
/// beyond the configured depth limit: the partially-consumed bytes live in
/// the `BytesMut` that `Framed` hands back on every call, which is how the
/// decoder satisfies I5 (resumable across feeds) without any buffering of
/// its own.
#[derive(Clone, Copy, Debug)]
pub struct RespCodec {
    max_depth: usize,
}

impl Default for RespCodec {
    fn default() -> Self {
        RespCodec {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl RespCodec {
    pub fn with_max_depth(max_depth: usize) -> Self {
        RespCodec { max_depth }
    }
}

impl Encoder<Command> for RespCodec {
    type Error = RespError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), RespError> {
        encode_command(&item, dst);
        Ok(())
    }
}

impl Decoder for RespCodec {
    type Item = Reply;
    type Error = RespError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Reply>, RespError> {
        match parse_reply(src, 0, self.max_depth)? {
            None => Ok(None),
            Some((reply, consumed)) => {
                src.advance(consumed);
                Ok(Some(reply))
            }
        }
    }
}

/// Appends the RESP encoding of `command` to `dst`. Binary-safe: argument
/// bytes are never escaped, only length-prefixed.
pub fn encode_command(command: &Command, dst: &mut BytesMut) {
    let mut header = itoa::Buffer::new();
    dst.put_u8(b'*');
    dst.put_slice(header.format(command.len()).as_bytes());
    dst.put_slice(b"\r\n");
    for arg in command.args() {
        dst.put_u8(b'$');
        dst.put_slice(header.format(arg.len()).as_bytes());
        dst.put_slice(b"\r\n");
        dst.put_slice(arg);
        dst.put_slice(b"\r\n");
    }
}

/// A free-standing incremental decoder for callers that would rather feed
/// raw byte slices than drive a `Framed` transport (this is what
/// [`crate::connection::Connection`] and the unit tests below use).
#[derive(Default)]
pub struct RespDecoder {
    buf: BytesMut,
    codec: RespCodec,
}

impl RespDecoder {
    pub fn with_max_depth(max_depth: usize) -> Self {
        RespDecoder {
            buf: BytesMut::new(),
            codec: RespCodec::with_max_depth(max_depth),
        }
    }

    /// Appends `bytes` to the internal buffer and drains every reply that
    /// is now complete. Never blocks: a partial reply simply leaves its
    /// prefix in the buffer for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Reply>, RespError> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(reply) = self.codec.decode(&mut self.buf)? {
            out.push(reply);
        }
        Ok(out)
    }
}

/// Finds the index of the first `\r\n` in `buf`, if any.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Reads a CRLF-terminated line starting at `buf[0]`. Returns the line's
/// content (without the terminator) and the number of bytes consumed
/// (including the terminator), or `None` if the line isn't complete yet.
fn read_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    let pos = find_crlf(buf)?;
    Some((&buf[..pos], pos + 2))
}

fn parse_ascii_i64(bytes: &[u8]) -> Result<i64, RespError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| RespError::protocol(format!("non-numeric length field {bytes:?}")))
}

/// Attempts to parse one complete reply from the front of `buf`. Returns
/// `Ok(None)` if `buf` does not yet hold a full reply -- the caller is
/// expected to retry with more bytes appended, and no bytes are consumed in
/// that case. `depth` is the nesting level of this call (0 at the top);
/// exceeding `max_depth` is a protocol error rather than a stack overflow.
fn parse_reply(
    buf: &[u8],
    depth: usize,
    max_depth: usize,
) -> Result<Option<(Reply, usize)>, RespError> {
    let Some(&tag) = buf.first() else {
        return Ok(None);
    };
    let rest = &buf[1..];
    match tag {
        b'+' => Ok(read_line(rest).map(|(line, len)| (Reply::SimpleString(line.to_vec()), 1 + len))),
        b'-' => Ok(read_line(rest).map(|(line, len)| (Reply::Error(line.to_vec()), 1 + len))),
        b':' => match read_line(rest) {
            None => Ok(None),
            Some((digits, len)) => Ok(Some((Reply::Integer(parse_ascii_i64(digits)?), 1 + len))),
        },
        b'$' => parse_bulk_string(rest, buf.len()).map(|opt| {
            opt.map(|(reply, used)| (reply, 1 + used))
        }),
        b'*' => parse_array(rest, buf.len(), depth, max_depth).map(|opt| {
            opt.map(|(reply, used)| (reply, 1 + used))
        }),
        other => Err(RespError::protocol(format!(
            "unknown reply type byte {other:#04x}"
        ))),
    }
}

fn parse_bulk_string(rest: &[u8], _total_len: usize) -> Result<Option<(Reply, usize)>, RespError> {
    let Some((len_bytes, header_len)) = read_line(rest) else {
        return Ok(None);
    };
    let declared_len = parse_ascii_i64(len_bytes)?;
    if declared_len == -1 {
        return Ok(Some((Reply::Null, header_len)));
    }
    if declared_len < -1 {
        return Err(RespError::protocol(format!(
            "negative bulk string length {declared_len}"
        )));
    }
    let declared_len = declared_len as usize;
    let body = &rest[header_len..];
    if body.len() < declared_len + 2 {
        return Ok(None);
    }
    if &body[declared_len..declared_len + 2] != b"\r\n" {
        return Err(RespError::protocol("bulk string missing CRLF terminator"));
    }
    let data = body[..declared_len].to_vec();
    Ok(Some((Reply::BulkString(data), header_len + declared_len + 2)))
}

fn parse_array(
    rest: &[u8],
    _total_len: usize,
    depth: usize,
    max_depth: usize,
) -> Result<Option<(Reply, usize)>, RespError> {
    let Some((len_bytes, header_len)) = read_line(rest) else {
        return Ok(None);
    };
    let declared_len = parse_ascii_i64(len_bytes)?;
    if declared_len == -1 {
        return Ok(Some((Reply::Null, header_len)));
    }
    if declared_len < -1 {
        return Err(RespError::protocol(format!(
            "negative array length {declared_len}"
        )));
    }
    if depth + 1 > max_depth {
        return Err(RespError::protocol("maximum array nesting depth exceeded"));
    }
    let declared_len = declared_len as usize;
    let mut offset = header_len;
    let mut items = Vec::with_capacity(declared_len.min(4096));
    for _ in 0..declared_len {
        match parse_reply(&rest[offset..], depth + 1, max_depth)? {
            None => return Ok(None),
            Some((item, used)) => {
                items.push(item);
                offset += used;
            }
        }
    }
    Ok(Some((Reply::Array(items), offset)))
}
