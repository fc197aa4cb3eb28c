use std::io::Write;

use bytes::BytesMut;
use pundun_transport::ServerStream;
use tracing::trace;

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

/// Writes complete frames to any `Write` stream.
///
/// `send` encodes header and payload into one scratch buffer and hands it to
/// the stream with a single `write_all`, so a writer behind a lock never
/// interleaves two frames. The buffer is reused across sends.
pub struct FrameWriter<T> {
    inner: T,
    scratch: BytesMut,
    max_payload_size: usize,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    ///
    /// Only the payload limit applies here; timeouts are a property of the
    /// stream (see [`FrameWriter::with_config_stream`]).
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            scratch: BytesMut::new(),
            max_payload_size: config.max_payload_size,
        }
    }

    /// Encode and send a payload tagged with a correlation id.
    ///
    /// Oversized payloads are rejected before any byte reaches the stream.
    /// Any other error may leave a partial frame on the wire.
    pub fn send(&mut self, correlation_id: u16, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }

        self.scratch.clear();
        encode_frame(correlation_id, payload, &mut self.scratch)?;
        self.inner.write_all(&self.scratch)?;
        self.inner.flush()?;

        trace!(correlation_id, payload_len = payload.len(), "wrote frame");
        Ok(())
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Update maximum payload size for subsequent sends.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.max_payload_size = max_payload_size;
    }
}

impl FrameWriter<ServerStream> {
    /// Create a frame writer for `ServerStream` and apply write timeout from config.
    pub fn with_config_stream(inner: ServerStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
