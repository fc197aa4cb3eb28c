//! Multiplexed request/response client core for pundun.
//!
//! One [`Connection`] carries many concurrent requests over a single stream.
//! Requests are tagged with 16-bit correlation ids; a dedicated listener
//! thread routes each response back to the issuer waiting on that id.

pub mod config;
pub mod connection;
pub mod connector;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod handshake;
pub mod ids;
mod listener;
pub mod pending;

pub use config::{ClientConfig, DEFAULT_PORT};
pub use connection::{
    Connection, ConnectionConfig, DEFAULT_MAX_PENDING_REQUESTS, DEFAULT_REQUEST_TIMEOUT,
};
pub use connector::{connect, connect_with_config, establish};
pub use correlation::{CorrelationTable, DeliveryOutcome, CORRELATION_ID_SPACE};
pub use envelope::{Envelope, EnvelopeError, RawEnvelope};
pub use error::{ClientError, CloseReason, Result};
pub use handshake::{
    authenticate, serve_handshake, Credentials, HandshakeConfig, HandshakeResult, ScramVerifier,
    DEFAULT_ITERATIONS, HANDSHAKE_CORRELATION_ID,
};
pub use ids::{CorrelationIds, TransactionIds};
pub use pending::PendingReply;
