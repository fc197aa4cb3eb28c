//! Inbound half of a connection: one thread reading frames and routing them
//! to waiting issuers by correlation id.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use pundun_frame::{Frame, FrameError, FrameReader};
use tracing::{debug, info, warn};

use crate::correlation::{CorrelationTable, DeliveryOutcome};
use crate::error::CloseReason;

pub(crate) const LISTENER_THREAD_NAME: &str = "pundun-listener";

/// Start the listener thread. It runs until the stream fails or closes, then
/// closes `table` and returns the reason.
pub(crate) fn spawn<R>(
    reader: FrameReader<R>,
    table: Arc<CorrelationTable>,
    disconnecting: Arc<AtomicBool>,
) -> io::Result<JoinHandle<CloseReason>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(LISTENER_THREAD_NAME.to_string())
        .spawn(move || run(reader, &table, &disconnecting))
}

/// Read frames until the stream ends, then fail everything still pending.
pub(crate) fn run<R: Read>(
    mut reader: FrameReader<R>,
    table: &CorrelationTable,
    disconnecting: &AtomicBool,
) -> CloseReason {
    let reason = loop {
        match reader.read_frame() {
            Ok(frame) => dispatch(table, frame),
            Err(err) => break classify(&err, disconnecting.load(Ordering::SeqCst)),
        }
    };

    let failed = table.close(reason.clone());
    match &reason {
        CloseReason::Disconnected => debug!(failed, "listener stopped after disconnect"),
        CloseReason::PeerClosed => info!(failed, "server closed the connection"),
        CloseReason::MalformedFrame(detail) => {
            warn!(failed, detail = %detail, "closing connection on malformed frame")
        }
        CloseReason::Io(kind) => warn!(failed, kind = ?kind, "closing connection on stream error"),
    }
    reason
}

fn dispatch(table: &CorrelationTable, frame: Frame) {
    let correlation_id = frame.correlation_id;
    let payload_len = frame.payload.len();
    match table.deliver(correlation_id, frame.payload) {
        DeliveryOutcome::Delivered => {
            debug!(correlation_id, payload_len, "routed response");
        }
        DeliveryOutcome::Unmatched => {
            warn!(correlation_id, payload_len, "discarding unmatched response");
        }
        DeliveryOutcome::Duplicate => {
            warn!(correlation_id, payload_len, "discarding duplicate response");
        }
        DeliveryOutcome::Abandoned => {
            debug!(correlation_id, payload_len, "discarding response for abandoned request");
        }
    }
}

fn classify(err: &FrameError, disconnecting: bool) -> CloseReason {
    if disconnecting {
        return CloseReason::Disconnected;
    }
    match err {
        FrameError::ConnectionClosed => CloseReason::PeerClosed,
        FrameError::Io(io) => CloseReason::Io(io.kind()),
        violation => CloseReason::MalformedFrame(violation.to_string()),
    }
}
