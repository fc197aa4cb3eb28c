use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::correlation::{CorrelationTable, Delivery, Registration};
use crate::error::{ClientError, CloseReason, Result};

/// A request that has been written and is waiting for its response.
///
/// Dropping a `PendingReply` abandons the request: its correlation slot is
/// removed, and a response arriving later is discarded by the listener as
/// unmatched.
#[derive(Debug)]
pub struct PendingReply {
    table: Arc<CorrelationTable>,
    registration: Registration,
    default_timeout: Option<Duration>,
}

impl PendingReply {
    pub(crate) fn new(
        table: Arc<CorrelationTable>,
        registration: Registration,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            table,
            registration,
            default_timeout,
        }
    }

    /// Correlation id the request was written with.
    pub fn correlation_id(&self) -> u16 {
        self.registration.correlation_id
    }

    /// Block until the response arrives, using the connection's request timeout.
    pub fn wait(self) -> Result<Bytes> {
        let timeout = self.default_timeout;
        self.wait_timeout(timeout)
    }

    /// Block until the response arrives or `timeout` elapses (`None` waits forever).
    pub fn wait_timeout(self, timeout: Option<Duration>) -> Result<Bytes> {
        let received = match timeout {
            Some(limit) => self.registration.receiver.recv_timeout(limit).map_err(|err| match err {
                RecvTimeoutError::Timeout => ClientError::Timeout(limit),
                RecvTimeoutError::Disconnected => self.closed_error(),
            }),
            None => self
                .registration
                .receiver
                .recv()
                .map_err(|_| self.closed_error()),
        };

        match received {
            Ok(delivery) => Self::unpack(delivery),
            Err(err) => {
                if let ClientError::Timeout(limit) = &err {
                    debug!(
                        correlation_id = self.correlation_id(),
                        timeout_ms = limit.as_millis() as u64,
                        "request timed out"
                    );
                }
                Err(err)
            }
        }
    }

    fn unpack(delivery: Delivery) -> Result<Bytes> {
        match delivery {
            Delivery::Response(payload) => Ok(payload),
            Delivery::Closed(reason) => Err(ClientError::ConnectionClosed(reason)),
        }
    }

    fn closed_error(&self) -> ClientError {
        ClientError::ConnectionClosed(
            self.table
                .close_reason()
                .unwrap_or(CloseReason::Disconnected),
        )
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table
            .remove(self.registration.correlation_id, self.registration.token);
    }
}
