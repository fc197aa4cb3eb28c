//! Request envelope seam.
//!
//! The client stamps a transaction id into every request envelope and
//! serializes it into a frame payload; responses are decoded with the same
//! type. The transaction id is informational and plays no part in routing.

use bytes::{Buf, BufMut, Bytes};

/// Envelope serialization errors.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope truncated: {len} bytes (need at least {min})")]
    Truncated { len: usize, min: usize },

    #[error("invalid envelope: {0}")]
    Invalid(String),
}

/// A message type that carries a transaction id and knows its wire form.
pub trait Envelope: Sized {
    fn transaction_id(&self) -> u32;

    fn set_transaction_id(&mut self, transaction_id: u32);

    fn encode(&self) -> Result<Vec<u8>, EnvelopeError>;

    fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError>;
}

const TRANSACTION_ID_SIZE: usize = 4;

/// Minimal envelope: big-endian u32 transaction id followed by opaque body bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawEnvelope {
    pub transaction_id: u32,
    pub body: Bytes,
}

impl RawEnvelope {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            transaction_id: 0,
            body: body.into(),
        }
    }
}

impl Envelope for RawEnvelope {
    fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    fn set_transaction_id(&mut self, transaction_id: u32) {
        self.transaction_id = transaction_id;
    }

    fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        let mut out = Vec::with_capacity(TRANSACTION_ID_SIZE + self.body.len());
        out.put_u32(self.transaction_id);
        out.put_slice(&self.body);
        Ok(out)
    }

    fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if bytes.len() < TRANSACTION_ID_SIZE {
            return Err(EnvelopeError::Truncated {
                len: bytes.len(),
                min: TRANSACTION_ID_SIZE,
            });
        }
        let mut buf = bytes;
        let transaction_id = buf.get_u32();
        Ok(Self {
            transaction_id,
            body: Bytes::copy_from_slice(buf),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_envelope_layout() {
        let mut env = RawEnvelope::new("ping");
        env.set_transaction_id(0x0102_0304);

        let wire = env.encode().unwrap();
        assert_eq!(wire, [1, 2, 3, 4, b'p', b'i', b'n', b'g']);
    }

    #[test]
    fn raw_envelope_decodes_empty_body() {
        let env = RawEnvelope::decode(&[0, 0, 0, 9]).unwrap();
        assert_eq!(env.transaction_id(), 9);
        assert!(env.body.is_empty());
    }

    #[test]
    fn short_envelope_is_rejected() {
        let err = RawEnvelope::decode(&[0, 1]).unwrap_err();
        assert!(matches!(err, EnvelopeError::Truncated { len: 2, min: 4 }));
    }
}
