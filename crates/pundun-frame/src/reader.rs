use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use pundun_transport::ServerStream;
use tracing::trace;

use crate::codec::{decode_header, Frame, FrameConfig, HEADER_SIZE, LENGTH_PREFIX_SIZE};
use crate::error::{FrameError, Result};

/// Reads complete frames from any `Read` stream.
///
/// Each frame is read as three exact-count reads: the 4-byte length, the
/// 2-byte correlation id, then the payload. Nothing is read ahead, so the
/// reader never consumes bytes belonging to the next frame.
pub struct FrameReader<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached on a
    /// frame boundary and `Err(FrameError::Truncated { .. })` when it is
    /// reached inside a frame.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        match self.fill(&mut header[..LENGTH_PREFIX_SIZE])? {
            0 => return Err(FrameError::ConnectionClosed),
            n if n < LENGTH_PREFIX_SIZE => {
                return Err(FrameError::Truncated {
                    expected: LENGTH_PREFIX_SIZE,
                    received: n,
                })
            }
            _ => {}
        }
        self.read_exact_in_frame(&mut header[LENGTH_PREFIX_SIZE..])?;
        let (payload_len, correlation_id) = decode_header(&header)?;

        if payload_len > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: self.config.max_payload_size,
            });
        }

        let mut payload = BytesMut::zeroed(payload_len);
        self.read_exact_in_frame(&mut payload)?;

        trace!(correlation_id, payload_len, "read frame");
        Ok(Frame {
            correlation_id,
            payload: payload.freeze(),
        })
    }

    fn read_exact_in_frame(&mut self, buf: &mut [u8]) -> Result<()> {
        let read = self.fill(buf)?;
        if read < buf.len() {
            return Err(FrameError::Truncated {
                expected: buf.len(),
                received: read,
            });
        }
        Ok(())
    }

    /// Read until `buf` is full or EOF; returns the number of bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0usize;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(filled)
    }

    /// Update maximum payload size for subsequent frame decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }
}

impl FrameReader<ServerStream> {
    /// Create a frame reader for `ServerStream` and apply read timeout from config.
    pub fn with_config_stream(inner: ServerStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }

    /// Change the read timeout of the underlying stream.
    pub fn set_read_timeout(&mut self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner
            .set_read_timeout(timeout)
            .map_err(transport_to_frame_error)?;
        self.config.read_timeout = timeout;
        Ok(())
    }
}

pub(crate) fn transport_to_frame_error(err: pundun_transport::TransportError) -> FrameError {
    match err {
        pundun_transport::TransportError::Io(io) => FrameError::Io(io),
        pundun_transport::TransportError::Resolve { source, .. }
        | pundun_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::encode_frame;

    #[test]
    fn read_single_frame() {
        let mut wire = BytesMut::new();
        encode_frame(1, b"hello", &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.correlation_id, 1);
        assert_eq!(frame.payload.as_ref(), b"hello");
    }

    #[test]
    fn read_multiple_frames() {
        let mut wire = BytesMut::new();
        encode_frame(1, b"one", &mut wire).unwrap();
        encode_frame(2, b"two", &mut wire).unwrap();
        encode_frame(65535, b"three", &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));

        let f1 = reader.read_frame().unwrap();
        let f2 = reader.read_frame().unwrap();
        let f3 = reader.read_frame().unwrap();

        assert_eq!((f1.correlation_id, f1.payload.as_ref()), (1, b"one".as_ref()));
        assert_eq!((f2.correlation_id, f2.payload.as_ref()), (2, b"two".as_ref()));
        assert_eq!(
            (f3.correlation_id, f3.payload.as_ref()),
            (65535, b"three".as_ref())
        );
    }

    #[test]
    fn read_empty_payload() {
        let mut wire = BytesMut::new();
        encode_frame(3, b"", &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.correlation_id, 3);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn read_frame_with_large_payload() {
        let payload = vec![0xAB; 64 * 1024];
        let mut wire = BytesMut::new();
        encode_frame(9, &payload, &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.correlation_id, 9);
        assert_eq!(frame.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn partial_read_handling() {
        let mut wire = BytesMut::new();
        encode_frame(4, b"slow", &mut wire).unwrap();
        encode_frame(5, b"slower", &mut wire).unwrap();

        let byte_reader = ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.correlation_id, 4);
        assert_eq!(frame.payload.as_ref(), b"slow");
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.correlation_id, 5);
        assert_eq!(frame.payload.as_ref(), b"slower");
    }

    #[test]
    fn does_not_consume_past_frame_boundary() {
        let mut wire = BytesMut::new();
        encode_frame(1, b"a", &mut wire).unwrap();
        wire.put_slice(b"trailing");

        let mut cursor = Cursor::new(wire.to_vec());
        FrameReader::new(&mut cursor).read_frame().unwrap();
        assert_eq!(cursor.position() as usize, HEADER_SIZE + 1);
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_inside_length_prefix() {
        let mut reader = FrameReader::new(Cursor::new(vec![0x00, 0x00]));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 4,
                received: 2
            }
        ));
    }

    #[test]
    fn connection_closed_mid_payload() {
        let mut partial = BytesMut::new();
        partial.put_u32(16 + 2);
        partial.put_u16(2);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 16,
                received: 9
            }
        ));
        assert!(err.is_framing_violation());
    }

    #[test]
    fn short_total_length_in_stream() {
        let bytes = vec![0x00, 0x00, 0x00, 0x01, 0x00, 0x07];
        let mut reader = FrameReader::new(Cursor::new(bytes));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Malformed { total_length: 1 }));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let mut wire = BytesMut::new();
        wire.put_u32(1024 + 2);
        wire.put_u16(1);

        let cfg = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(wire.to_vec()), cfg);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 1024, max: 16 }));
    }

    #[test]
    fn read_would_block_propagates_io_error() {
        let mut wire = BytesMut::new();
        encode_frame(7, b"ok", &mut wire).unwrap();

        let reader = ScriptedReader {
            first_error: Some(ErrorKind::WouldBlock),
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn interrupted_read_retries() {
        let mut wire = BytesMut::new();
        encode_frame(8, b"ok", &mut wire).unwrap();

        let reader = ScriptedReader {
            first_error: Some(ErrorKind::Interrupted),
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let frame = framed.read_frame().unwrap();

        assert_eq!(frame.correlation_id, 8);
        assert_eq!(frame.payload.as_ref(), b"ok");
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_server_stream() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(ServerStream::from(left));
        let cfg = FrameConfig {
            read_timeout: Some(std::time::Duration::from_secs(5)),
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config_stream(ServerStream::from(right), cfg).unwrap();

        writer.send(11, b"ping").unwrap();
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.correlation_id, 11);
        assert_eq!(frame.payload.as_ref(), b"ping");

        reader.set_read_timeout(None).unwrap();
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }

            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct ScriptedReader {
        first_error: Option<ErrorKind>,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(kind) = self.first_error.take() {
                return Err(std::io::Error::from(kind));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
