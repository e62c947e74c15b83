// Wire codec for the game-control channel.
//
// Every integer on the wire is little-endian. A chunk is a 4-byte type tag
// followed by its payload: tag 0 carries a 4-byte signed integer, tag 1 a
// 4-byte length plus that many UTF-8 bytes. A message is one string chunk
// (the header), a 4-byte chunk count, then that many payload chunks.
//
// Decoding is incremental: a partial message consumes nothing and decoding
// resumes once more bytes arrive.

use bytes::{Buf, BufMut, BytesMut};
use icebridge_core::{Chunk, GpgNetMessage};
use thiserror::Error;

const TAG_INT: u32 = 0;
const TAG_STRING: u32 = 1;

/// Upper bound on a single string chunk. Protects against unbounded
/// allocation from a corrupt length prefix; real game messages are tiny.
pub const MAX_CHUNK_BYTES: u32 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message header must be a string chunk, got tag {0}")]
    HeaderTag(u32),
    #[error("unknown chunk tag {0}")]
    UnknownTag(u32),
    #[error("string chunk of {0} bytes exceeds the {MAX_CHUNK_BYTES} byte limit")]
    Oversized(u32),
    #[error("string chunk is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Append the encoded form of `msg` to `out`.
pub fn encode_message(msg: &GpgNetMessage, out: &mut BytesMut) {
    put_string(out, &msg.header);
    out.put_u32_le(msg.chunks.len() as u32);
    for chunk in &msg.chunks {
        match chunk {
            Chunk::Int(value) => {
                out.put_u32_le(TAG_INT);
                out.put_i32_le(*value);
            }
            Chunk::Str(value) => put_string(out, value),
        }
    }
}

fn put_string(out: &mut BytesMut, value: &str) {
    out.put_u32_le(TAG_STRING);
    out.put_u32_le(value.len() as u32);
    out.put_slice(value.as_bytes());
}

/// Try to decode one complete message from the front of `buf`.
///
/// `Ok(None)` means the buffer holds only a partial message; nothing is
/// consumed. On success the message's bytes are consumed. Errors leave the
/// buffer poisoned and the caller is expected to drop the connection.
pub fn decode_message(buf: &mut BytesMut) -> Result<Option<GpgNetMessage>, CodecError> {
    let mut cursor = Cursor { buf, pos: 0 };

    let header = match cursor.read_header_string()? {
        Some(header) => header,
        None => return Ok(None),
    };
    let Some(count) = cursor.read_u32() else {
        return Ok(None);
    };
    let mut chunks = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let Some(tag) = cursor.read_u32() else {
            return Ok(None);
        };
        match tag {
            TAG_INT => {
                let Some(value) = cursor.read_i32() else {
                    return Ok(None);
                };
                chunks.push(Chunk::Int(value));
            }
            TAG_STRING => match cursor.read_string_body()? {
                Some(value) => chunks.push(Chunk::Str(value)),
                None => return Ok(None),
            },
            other => return Err(CodecError::UnknownTag(other)),
        }
    }

    let consumed = cursor.pos;
    buf.advance(consumed);
    Ok(Some(GpgNetMessage { header, chunks }))
}

struct Cursor<'a> {
    buf: &'a BytesMut,
    pos: usize,
}

impl Cursor<'_> {
    fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.buf.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Option<i32> {
        self.read_u32().map(|v| v as i32)
    }

    /// Read the leading header chunk, which must be a string.
    fn read_header_string(&mut self) -> Result<Option<String>, CodecError> {
        let Some(tag) = self.read_u32() else {
            return Ok(None);
        };
        if tag != TAG_STRING {
            return Err(CodecError::HeaderTag(tag));
        }
        self.read_string_body()
    }

    /// Read length + bytes, the tag having already been consumed.
    fn read_string_body(&mut self) -> Result<Option<String>, CodecError> {
        let Some(len) = self.read_u32() else {
            return Ok(None);
        };
        if len > MAX_CHUNK_BYTES {
            return Err(CodecError::Oversized(len));
        }
        let Some(bytes) = self.buf.get(self.pos..self.pos + len as usize) else {
            return Ok(None);
        };
        let value = std::str::from_utf8(bytes)?.to_owned();
        self.pos += len as usize;
        Ok(Some(value))
    }
}
