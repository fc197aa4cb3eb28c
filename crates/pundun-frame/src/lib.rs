//! Length-prefixed, correlation-tagged framing for the pundun protocol.
//!
//! Every message on the wire is framed as:
//! - A 4-byte big-endian total length (payload length + 2)
//! - A 2-byte big-endian correlation id
//! - The opaque payload
//!
//! There is no magic, checksum or version at this layer. Readers always
//! consume exact byte counts, so callers only ever see complete frames.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_header, encode_frame, Frame, FrameConfig, CORRELATION_ID_SIZE, DEFAULT_MAX_PAYLOAD,
    HEADER_SIZE, LENGTH_PREFIX_SIZE, MAX_PAYLOAD_LEN,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
