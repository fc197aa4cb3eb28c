use std::fmt;

use crate::envelope::EnvelopeError;

/// Why a connection stopped serving requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The server closed the stream on a frame boundary.
    PeerClosed,
    /// The byte stream violated the framing rules and cannot be resynchronized.
    MalformedFrame(String),
    /// The stream failed with an I/O error.
    Io(std::io::ErrorKind),
    /// The client disconnected explicitly (or the connection was dropped).
    Disconnected,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed the connection"),
            CloseReason::MalformedFrame(detail) => write!(f, "malformed frame: {detail}"),
            CloseReason::Io(kind) => write!(f, "stream I/O error: {kind}"),
            CloseReason::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The stream to the server could not be opened.
    #[error("connection error: {0}")]
    Transport(#[from] pundun_transport::TransportError),

    /// Frame-level error on the request path.
    #[error("frame error: {0}")]
    Frame(#[from] pundun_frame::FrameError),

    /// The server rejected the handshake, or the handshake could not complete.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The connection is no longer serviceable.
    #[error("connection closed: {0}")]
    ConnectionClosed(CloseReason),

    /// No response arrived before the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Too many requests are already waiting for responses.
    #[error("too many pending requests ({pending}, max {max})")]
    TooManyPending { pending: usize, max: usize },

    /// The request or response envelope could not be (de)serialized.
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Invalid client configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON configuration could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether the error means the connection must be replaced.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionClosed(_) | ClientError::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
