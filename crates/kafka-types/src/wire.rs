//! Schema-tagged wire envelope.
//!
//! Layout (bit-exact, Confluent compatible):
//!
//! ```text
//! byte 0      : magic byte, always 0x00
//! bytes 1..=4 : schema id, unsigned 32-bit big-endian
//! bytes 5..   : registry-encoded payload
//! ```

use crate::error::{Result, WireError};

/// Magic byte that opens every envelope.
pub const MAGIC_BYTE: u8 = 0x00;

/// Magic byte plus the 4-byte schema id.
pub const HEADER_LEN: usize = 5;

/// A parsed envelope borrowing its payload from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub schema_id: u32,
    pub payload: &'a [u8],
}

/// Wrap an encoded payload with the magic byte and schema id.
pub fn wrap(schema_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(MAGIC_BYTE);
    out.extend_from_slice(&schema_id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Split an envelope into its schema id and payload.
///
/// Fails when the buffer is shorter than [`HEADER_LEN`] or does not start
/// with [`MAGIC_BYTE`].
pub fn unwrap(bytes: &[u8]) -> Result<Envelope<'_>> {
    if bytes.len() < HEADER_LEN {
        return Err(WireError::TooShort {
            expected: HEADER_LEN,
            actual: bytes.len(),
        });
    }
    if bytes[0] != MAGIC_BYTE {
        return Err(WireError::InvalidMagicByte(bytes[0]));
    }
    Ok(Envelope {
        schema_id: read_schema_id(bytes),
        payload: &bytes[HEADER_LEN..],
    })
}

/// Read the schema id from the header without touching the payload.
///
/// Never fails: a buffer shorter than the header or one that does not open
/// with [`MAGIC_BYTE`] yields `None`.
pub fn extract_schema_id(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < HEADER_LEN || bytes[0] != MAGIC_BYTE {
        return None;
    }
    Some(read_schema_id(bytes))
}

fn read_schema_id(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]])
}
