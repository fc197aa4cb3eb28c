use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use pundun_frame::{FrameConfig, FrameError, FrameReader, FrameWriter, DEFAULT_MAX_PAYLOAD};
use pundun_transport::ServerStream;
use tracing::{debug, info, warn};

use crate::correlation::{CorrelationTable, CORRELATION_ID_SPACE};
use crate::envelope::Envelope;
use crate::error::{ClientError, CloseReason, Result};
use crate::handshake::HandshakeResult;
use crate::ids::{CorrelationIds, TransactionIds};
use crate::listener;
use crate::pending::PendingReply;

/// Default wait for a response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit on requests waiting for responses.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 4096;

/// Runtime behavior of an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// How long `call`/`issue` wait for a response (`None` waits forever).
    pub request_timeout: Option<Duration>,
    /// Requests allowed in flight at once (capped at 65536).
    pub max_pending_requests: usize,
    /// Largest frame payload accepted in either direction.
    pub max_payload_size: usize,
    /// Write timeout on the stream; a stalled write blocks every issuer.
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            write_timeout: None,
        }
    }
}

/// A multiplexed connection to a pundun server.
///
/// Any number of threads may issue requests through a shared `&Connection`
/// (or `Arc<Connection>`). Each request is tagged with a fresh correlation id
/// and parked in the correlation table; a single listener thread reads
/// responses and hands each to the request with the matching id, in whatever
/// order the server answers.
///
/// When the stream fails, the server closes it, or the client disconnects,
/// every waiting request is woken with [`ClientError::ConnectionClosed`] and
/// later requests fail immediately.
pub struct Connection {
    writer: Mutex<FrameWriter<ServerStream>>,
    stream: ServerStream,
    table: Arc<CorrelationTable>,
    transaction_ids: TransactionIds,
    correlation_ids: CorrelationIds,
    disconnecting: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<CloseReason>>>,
    handshake: Option<HandshakeResult>,
    peer_addr: String,
    config: ConnectionConfig,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("transport", &self.stream.transport_name())
            .field("pending", &self.table.len())
            .field("close_reason", &self.table.close_reason())
            .field("config", &self.config)
            .finish()
    }
}

impl Connection {
    /// Start a connection over an already-authenticated (or auth-free) stream.
    pub fn new(stream: ServerStream, config: ConnectionConfig) -> Result<Self> {
        let frame_config = FrameConfig {
            max_payload_size: config.max_payload_size,
            read_timeout: None,
            write_timeout: config.write_timeout,
        };
        let reader = FrameReader::with_config_stream(stream.try_clone()?, frame_config.clone())?;
        let writer = FrameWriter::with_config_stream(stream, frame_config)?;
        Self::from_parts(reader, writer, None, config)
    }

    /// Start a connection from frame halves that finished the handshake.
    ///
    /// The reader must have no read timeout; the listener blocks on it until
    /// the stream is shut down.
    pub fn from_parts(
        reader: FrameReader<ServerStream>,
        writer: FrameWriter<ServerStream>,
        handshake: Option<HandshakeResult>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        if config.max_pending_requests == 0 {
            return Err(ClientError::Config(
                "max_pending_requests must be > 0".to_string(),
            ));
        }

        let stream = writer.get_ref().try_clone()?;
        let peer_addr = stream.peer_addr();
        let table = Arc::new(CorrelationTable::new());
        let disconnecting = Arc::new(AtomicBool::new(false));

        let handle = listener::spawn(reader, Arc::clone(&table), Arc::clone(&disconnecting))
            .map_err(|err| ClientError::Frame(FrameError::Io(err)))?;

        info!(
            peer = %peer_addr,
            transport = stream.transport_name(),
            max_pending = config.max_pending_requests,
            "connection established"
        );

        Ok(Self {
            writer: Mutex::new(writer),
            stream,
            table,
            transaction_ids: TransactionIds::new(),
            correlation_ids: CorrelationIds::new(),
            disconnecting,
            listener: Mutex::new(Some(handle)),
            handshake,
            peer_addr,
            config,
        })
    }

    /// Write `payload` as a request and return a handle to its response.
    pub fn submit(&self, payload: &[u8]) -> Result<PendingReply> {
        let max_pending = self.config.max_pending_requests.min(CORRELATION_ID_SPACE);
        let registration = self.table.register(&self.correlation_ids, max_pending)?;
        let reply = PendingReply::new(
            Arc::clone(&self.table),
            registration,
            self.config.request_timeout,
        );
        let correlation_id = reply.correlation_id();

        let written = self.lock_writer().send(correlation_id, payload);
        if let Err(err) = written {
            let reason = match &err {
                FrameError::PayloadTooLarge { .. } => return Err(err.into()),
                FrameError::Io(io) => CloseReason::Io(io.kind()),
                _ => CloseReason::PeerClosed,
            };
            debug!(correlation_id, error = %err, "request write failed");
            self.fail(reason.clone());
            // An earlier close (disconnect, listener teardown) keeps its reason.
            return Err(ClientError::ConnectionClosed(
                self.table.close_reason().unwrap_or(reason),
            ));
        }

        debug!(correlation_id, payload_len = payload.len(), "request written");
        Ok(reply)
    }

    /// Send a raw payload and wait for the response with the configured timeout.
    pub fn call(&self, payload: &[u8]) -> Result<Bytes> {
        self.submit(payload)?.wait()
    }

    /// Send a raw payload and wait at most `timeout` (`None` waits forever).
    pub fn call_timeout(&self, payload: &[u8], timeout: Option<Duration>) -> Result<Bytes> {
        self.submit(payload)?.wait_timeout(timeout)
    }

    /// Stamp a fresh transaction id into `request`, send it and decode the response.
    pub fn issue<E: Envelope>(&self, request: E) -> Result<E> {
        self.issue_timeout(request, self.config.request_timeout)
    }

    /// [`Connection::issue`] with an explicit timeout.
    pub fn issue_timeout<E: Envelope>(&self, mut request: E, timeout: Option<Duration>) -> Result<E> {
        let transaction_id = self.transaction_ids.next();
        request.set_transaction_id(transaction_id);
        let payload = request.encode()?;

        let response = E::decode(&self.call_timeout(&payload, timeout)?)?;
        if response.transaction_id() != transaction_id {
            debug!(
                transaction_id,
                response_transaction_id = response.transaction_id(),
                "response transaction id differs from request"
            );
        }
        Ok(response)
    }

    /// Shut the stream down, stop the listener and fail every waiting request.
    ///
    /// Idempotent; later calls return `Ok(())`.
    pub fn disconnect(&self) -> Result<()> {
        let first = !self.disconnecting.swap(true, Ordering::SeqCst);
        let shutdown = if first {
            self.stream.shutdown()
        } else {
            Ok(())
        };

        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            match handle.join() {
                Ok(reason) => debug!(reason = %reason, "listener joined"),
                Err(_) => warn!("listener thread panicked"),
            }
        }

        let failed = self.table.close(CloseReason::Disconnected);
        if first {
            info!(peer = %self.peer_addr, failed, "disconnected");
        }
        shutdown.map_err(Into::into)
    }

    /// Whether requests can still be issued.
    pub fn is_alive(&self) -> bool {
        self.table.is_open()
    }

    /// Why the connection closed, if it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.table.close_reason()
    }

    /// Number of requests waiting for responses.
    pub fn pending_requests(&self) -> usize {
        self.table.len()
    }

    /// Server address as reported by the transport.
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Outcome of the authentication exchange, when one was run.
    pub fn handshake(&self) -> Option<&HandshakeResult> {
        self.handshake.as_ref()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn lock_writer(&self) -> MutexGuard<'_, FrameWriter<ServerStream>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A failed write leaves the stream in an unknown state; tear it down.
    fn fail(&self, reason: CloseReason) {
        warn!(reason = %reason, "write failed, closing connection");
        self.table.close(reason);
        if let Err(err) = self.stream.shutdown() {
            debug!(error = %err, "stream shutdown after write failure");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.disconnect() {
            debug!(error = %err, "disconnect on drop");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::envelope::RawEnvelope;

    /// Server side of a socket pair, speaking raw frames.
    struct MockServer {
        stream: UnixStream,
        reader: FrameReader<UnixStream>,
        writer: FrameWriter<UnixStream>,
    }

    impl MockServer {
        fn recv(&mut self) -> (u16, Bytes) {
            let frame = self.reader.read_frame().unwrap();
            (frame.correlation_id, frame.payload)
        }

        fn reply(&mut self, correlation_id: u16, payload: &[u8]) {
            self.writer.send(correlation_id, payload).unwrap();
        }
    }

    fn pair_with(config: ConnectionConfig) -> (Connection, MockServer) {
        let (client, server) = UnixStream::pair().unwrap();
        let connection = Connection::new(ServerStream::from(client), config).unwrap();
        let server = MockServer {
            stream: server.try_clone().unwrap(),
            reader: FrameReader::new(server.try_clone().unwrap()),
            writer: FrameWriter::new(server),
        };
        (connection, server)
    }

    fn pair() -> (Connection, MockServer) {
        pair_with(ConnectionConfig::default())
    }

    #[test]
    fn call_round_trip() {
        let (conn, mut server) = pair();

        let echo = thread::spawn(move || {
            let (cid, payload) = server.recv();
            server.reply(cid, &payload);
            server
        });

        assert_eq!(conn.call(b"hello").unwrap().as_ref(), b"hello");
        let _server = echo.join().unwrap();
        assert_eq!(conn.pending_requests(), 0);
        assert!(conn.is_alive());
    }

    #[test]
    fn first_correlation_ids_are_sequential() {
        let (conn, mut server) = pair();

        let a = conn.submit(b"a").unwrap();
        let b = conn.submit(b"b").unwrap();
        assert_eq!((a.correlation_id(), b.correlation_id()), (0, 1));
        assert_eq!(server.recv().0, 0);
        assert_eq!(server.recv().0, 1);
    }

    #[test]
    fn out_of_order_responses_reach_their_issuers() {
        let (conn, mut server) = pair();
        let conn = Arc::new(conn);

        let (ready_tx, ready_rx) = mpsc::channel();
        let issuers: Vec<_> = [&b"first"[..], &b"second"[..]]
            .into_iter()
            .map(|payload| {
                let conn = Arc::clone(&conn);
                let ready_tx = ready_tx.clone();
                let payload = payload.to_vec();
                thread::spawn(move || {
                    let reply = conn.submit(&payload).unwrap();
                    ready_tx.send(()).unwrap();
                    (payload, reply.wait().unwrap())
                })
            })
            .collect();

        ready_rx.recv().unwrap();
        ready_rx.recv().unwrap();
        let mut requests = vec![server.recv(), server.recv()];
        requests.reverse();
        for (cid, payload) in requests {
            let mut answer = b"re:".to_vec();
            answer.extend_from_slice(&payload);
            server.reply(cid, &answer);
        }

        for issuer in issuers {
            let (sent, got) = issuer.join().unwrap();
            let mut expected = b"re:".to_vec();
            expected.extend_from_slice(&sent);
            assert_eq!(got.as_ref(), expected.as_slice());
        }
    }

    #[test]
    fn issue_stamps_transaction_ids() {
        let (conn, mut server) = pair();

        let responder = thread::spawn(move || {
            for _ in 0..2 {
                let (cid, payload) = server.recv();
                server.reply(cid, &payload);
            }
            server
        });

        let first = conn.issue(RawEnvelope::new("one")).unwrap();
        let second = conn.issue(RawEnvelope::new("two")).unwrap();
        let _server = responder.join().unwrap();

        assert_eq!(first.transaction_id, 0);
        assert_eq!(first.body.as_ref(), b"one");
        assert_eq!(second.transaction_id, 1);
        assert_eq!(second.body.as_ref(), b"two");
    }

    #[test]
    fn peer_close_fails_all_pending() {
        let (conn, mut server) = pair();

        let pending: Vec<_> = (0..5).map(|i| conn.submit(&[i]).unwrap()).collect();
        for _ in 0..5 {
            server.recv();
        }
        drop(server);

        for reply in pending {
            let err = reply.wait().unwrap_err();
            assert!(matches!(
                err,
                ClientError::ConnectionClosed(CloseReason::PeerClosed)
            ));
        }
        assert_eq!(conn.pending_requests(), 0);
        assert!(!conn.is_alive());

        let err = conn.call(b"after").unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed(_)));
    }

    #[test]
    fn malformed_frame_closes_connection() {
        let (conn, mut server) = pair();
        let reply = conn.submit(b"q").unwrap();
        server.recv();

        // total_length 1 cannot hold a correlation id.
        use std::io::Write;
        server.stream.write_all(&[0, 0, 0, 1, 0, 0]).unwrap();

        let err = reply.wait().unwrap_err();
        assert!(matches!(
            err,
            ClientError::ConnectionClosed(CloseReason::MalformedFrame(_))
        ));
    }

    #[test]
    fn unmatched_response_is_ignored() {
        let (conn, mut server) = pair();
        let reply = conn.submit(b"q").unwrap();
        let (cid, _) = server.recv();

        server.reply(cid.wrapping_add(100), b"stray");
        server.reply(cid, b"mine");

        assert_eq!(reply.wait().unwrap().as_ref(), b"mine");
        assert!(conn.is_alive());
    }

    #[test]
    fn timeout_then_late_response_is_discarded() {
        let (conn, mut server) = pair();

        let started = Instant::now();
        let err = conn
            .call_timeout(b"slow", Some(Duration::from_millis(40)))
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(conn.pending_requests(), 0);

        let (late_cid, _) = server.recv();
        server.reply(late_cid, b"too late");

        let responder = thread::spawn(move || {
            let (cid, _) = server.recv();
            server.reply(cid, b"fresh");
            server
        });
        assert_eq!(conn.call(b"next").unwrap().as_ref(), b"fresh");
        let _server = responder.join().unwrap();
    }

    #[test]
    fn dropped_reply_frees_its_slot() {
        let (conn, _server) = pair();
        let reply = conn.submit(b"x").unwrap();
        assert_eq!(conn.pending_requests(), 1);
        drop(reply);
        assert_eq!(conn.pending_requests(), 0);
    }

    #[test]
    fn too_many_pending_rejected() {
        let (conn, _server) = pair_with(ConnectionConfig {
            max_pending_requests: 2,
            ..ConnectionConfig::default()
        });

        let _a = conn.submit(b"a").unwrap();
        let _b = conn.submit(b"b").unwrap();
        let err = conn.submit(b"c").unwrap_err();
        assert!(matches!(err, ClientError::TooManyPending { pending: 2, max: 2 }));
    }

    #[test]
    fn oversized_request_rejected_without_closing() {
        let (conn, _server) = pair_with(ConnectionConfig {
            max_payload_size: 4,
            ..ConnectionConfig::default()
        });

        let err = conn.call(b"too large").unwrap_err();
        assert!(matches!(
            err,
            ClientError::Frame(FrameError::PayloadTooLarge { .. })
        ));
        assert!(conn.is_alive());
        assert_eq!(conn.pending_requests(), 0);
    }

    #[test]
    fn write_failure_reports_connection_closed() {
        let (conn, server) = pair();
        let waiting = conn.submit(b"in flight").unwrap();
        server.stream.shutdown(std::net::Shutdown::Read).unwrap();

        let err = conn.call(b"x").unwrap_err();
        assert!(
            matches!(err, ClientError::ConnectionClosed(CloseReason::Io(_))),
            "unexpected error: {err:?}"
        );
        assert!(err.is_connection_fatal());
        assert!(!conn.is_alive());
        assert_eq!(conn.close_reason(), Some(CloseReason::Io(std::io::ErrorKind::BrokenPipe)));

        let err = waiting.wait().unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed(CloseReason::Io(_))));
        assert_eq!(conn.pending_requests(), 0);
    }

    #[test]
    fn disconnect_wakes_waiters_and_is_idempotent() {
        let (conn, _server) = pair();
        let conn = Arc::new(conn);

        let waiter = {
            let conn = Arc::clone(&conn);
            let reply = conn.submit(b"never answered").unwrap();
            thread::spawn(move || reply.wait_timeout(None))
        };

        conn.disconnect().unwrap();
        conn.disconnect().unwrap();

        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(
            err,
            ClientError::ConnectionClosed(CloseReason::Disconnected)
        ));
        assert_eq!(conn.close_reason(), Some(CloseReason::Disconnected));
        assert!(matches!(
            conn.call(b"x").unwrap_err(),
            ClientError::ConnectionClosed(CloseReason::Disconnected)
        ));
    }

    #[test]
    fn concurrent_callers_share_one_connection() {
        let (conn, mut server) = pair();
        let conn = Arc::new(conn);
        const CALLERS: usize = 8;
        const PER_CALLER: usize = 25;

        let echo = thread::spawn(move || {
            for _ in 0..CALLERS * PER_CALLER {
                let (cid, payload) = server.recv();
                server.reply(cid, &payload);
            }
            server
        });

        let callers: Vec<_> = (0..CALLERS)
            .map(|caller| {
                let conn = Arc::clone(&conn);
                thread::spawn(move || {
                    for i in 0..PER_CALLER {
                        let payload = format!("{caller}:{i}");
                        let got = conn.call(payload.as_bytes()).unwrap();
                        assert_eq!(got.as_ref(), payload.as_bytes());
                    }
                })
            })
            .collect();

        for caller in callers {
            caller.join().unwrap();
        }
        let _server = echo.join().unwrap();
        assert_eq!(conn.pending_requests(), 0);
    }

    #[test]
    fn zero_max_pending_is_config_error() {
        let (client, _server) = UnixStream::pair().unwrap();
        let err = Connection::new(
            ServerStream::from(client),
            ConnectionConfig {
                max_pending_requests: 0,
                ..ConnectionConfig::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
