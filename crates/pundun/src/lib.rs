//! Multiplexed client for the pundun database.
//!
//! Many threads share one authenticated stream; each request carries a
//! correlation id and its response is routed back to the issuer that is
//! waiting on it, whatever order the server answers in.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP (and Unix socket) stream to the server
//! - [`frame`]: length-prefixed frames tagged with correlation ids
//! - [`client`]: connection, SCRAM handshake and request multiplexing (behind `client` feature)

/// Re-export transport types.
pub mod transport {
    pub use pundun_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pundun_frame::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use pundun_client::*;
}
