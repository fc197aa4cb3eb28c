/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The declared total length cannot even hold the correlation id.
    #[error("malformed frame: total length {total_length} is shorter than the correlation id")]
    Malformed { total_length: u32 },

    /// The stream ended part-way through a frame.
    #[error("truncated frame: expected {expected} bytes, stream ended after {received}")]
    Truncated { expected: usize, received: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed cleanly between frames.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether the error means the byte stream can no longer be trusted to be
    /// aligned on a frame boundary.
    pub fn is_framing_violation(&self) -> bool {
        matches!(
            self,
            FrameError::Malformed { .. }
                | FrameError::Truncated { .. }
                | FrameError::PayloadTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
