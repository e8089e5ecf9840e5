//! Record codec: `(key, value)` <-> length-prefixed byte blob.
//!
//! Wire format, all integers big-endian:
//!
//! ```text
//! [key_len: u32][key bytes][value_len: u32][value bytes]
//! ```
//!
//! A tombstone is encoded with `value_len == u32::MAX` and no value
//! bytes. The delimiter is appended by the segment file, not by the
//! codec; it is a sequential-scan sync marker only, never load-bearing
//! for framing (length prefixes are authoritative).

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

const TOMBSTONE_MARKER: u32 = u32::MAX;

/// The decoded form of a blob: either a live value or a tombstone for its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Value(Vec<u8>, Vec<u8>),
    Tombstone(Vec<u8>),
}

impl Decoded {
    pub fn key(&self) -> &[u8] {
        match self {
            Decoded::Value(k, _) => k,
            Decoded::Tombstone(k) => k,
        }
    }
}

/// Encodes a live `(key, value)` record.
pub fn encode(key: &[u8], value: &[u8]) -> Bytes {
    encode_inner(key, Some(value))
}

/// Encodes a tombstone for `key`.
pub fn encode_tombstone(key: &[u8]) -> Bytes {
    encode_inner(key, None)
}

fn encode_inner(key: &[u8], value: Option<&[u8]>) -> Bytes {
    let value_len = value.map(|v| v.len() as u32).unwrap_or(TOMBSTONE_MARKER);
    let mut buf = BytesMut::with_capacity(8 + key.len() + value.map_or(0, |v| v.len()));
    buf.put_u32(key.len() as u32);
    buf.put_slice(key);
    buf.put_u32(value_len);
    if let Some(v) = value {
        buf.put_slice(v);
    }
    buf.freeze()
}

/// Given the start of a sequential file region (possibly containing more
/// than one record), returns the length in bytes of the one record
/// starting at offset 0 — `4 + key_len + 4 + value_len` (`value_len == 0`
/// for a tombstone). Used by a scanning reader to resync by length prefix
/// rather than by searching for the delimiter, since the delimiter's
/// bytes may legitimately appear inside an opaque key or value.
pub(crate) fn framed_len(buf: &[u8]) -> Result<usize> {
    let mut cursor = buf;

    let key_len = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::Decode("truncated key length prefix".into()))? as usize;
    if cursor.len() < key_len {
        return Err(Error::Decode("truncated key bytes".into()));
    }
    cursor = &cursor[key_len..];

    let value_len = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::Decode("truncated value length prefix".into()))?;
    let value_len = if value_len == TOMBSTONE_MARKER {
        0
    } else {
        value_len as usize
    };
    if cursor.len() < value_len {
        return Err(Error::Decode("truncated value bytes".into()));
    }

    Ok(4 + key_len + 4 + value_len)
}

/// Decodes a blob produced by `encode`/`encode_tombstone`.
pub fn decode(blob: &[u8]) -> Result<Decoded> {
    let mut cursor = blob;

    let key_len = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::Decode("truncated key length prefix".into()))? as usize;
    if cursor.len() < key_len {
        return Err(Error::Decode("truncated key bytes".into()));
    }
    let (key, rest) = cursor.split_at(key_len);
    cursor = rest;

    let value_len = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| Error::Decode("truncated value length prefix".into()))?;

    if value_len == TOMBSTONE_MARKER {
        return Ok(Decoded::Tombstone(key.to_vec()));
    }

    let value_len = value_len as usize;
    if cursor.len() != value_len {
        return Err(Error::Decode(format!(
            "value length mismatch: expected {} trailing bytes, found {}",
            value_len,
            cursor.len()
        )));
    }
    Ok(Decoded::Value(key.to_vec(), cursor.to_vec()))
}
