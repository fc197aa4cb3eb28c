use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Size of the big-endian total length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the big-endian correlation id.
pub const CORRELATION_ID_SIZE: usize = 2;

/// Frame header: total length (4) + correlation id (2) = 6 bytes.
pub const HEADER_SIZE: usize = LENGTH_PREFIX_SIZE + CORRELATION_ID_SIZE;

/// Largest payload the length prefix can describe.
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize - CORRELATION_ID_SIZE;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A framed message tagged with its correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlation id matching a response to its request.
    pub correlation_id: u16,
    /// The opaque payload.
    pub payload: Bytes,
}

/// Encode a frame into the wire format.
///
/// ```text
/// ┌────────────────┬────────────────┬─────────────────────┐
/// │ Total length   │ Correlation id │ Payload              │
/// │ (4B BE)        │ (2B BE)        │ (total length - 2)   │
/// └────────────────┴────────────────┴─────────────────────┘
/// ```
pub fn encode_frame(correlation_id: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let total_length = u32::try_from(payload.len() + CORRELATION_ID_SIZE).map_err(|_| {
        FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_LEN,
        }
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32(total_length);
    dst.put_u16(correlation_id);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame header into `(payload_length, correlation_id)`.
///
/// A `total_length` below 2 cannot hold the correlation id and is malformed.
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<(usize, u16)> {
    let total_length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let correlation_id = u16::from_be_bytes([header[4], header[5]]);
    let payload_len = (total_length as usize)
        .checked_sub(CORRELATION_ID_SIZE)
        .ok_or(FrameError::Malformed { total_length })?;
    Ok((payload_len, correlation_id))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
