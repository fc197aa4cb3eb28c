//! Duplex byte-stream transport for the pundun client.
//!
//! Provides one owned, full-duplex stream type over:
//! - TCP (the normal path to a pundun server)
//! - Unix domain sockets (local servers and in-process test peers)
//!
//! This is the lowest layer of the client. Framing, authentication and
//! request multiplexing all build on the [`ServerStream`] provided here.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::ServerStream;
pub use tcp::{connect, connect_timeout};
