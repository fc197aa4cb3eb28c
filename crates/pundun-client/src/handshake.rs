//! SCRAM-SHA-256 authentication exchange (RFC 5802 / RFC 7677).
//!
//! The four handshake messages travel as ordinary frames with correlation
//! id 0 before the listener starts:
//!
//! ```text
//! client-first  n,,n=<user>,r=<cnonce>
//! server-first  r=<cnonce><snonce>,s=<salt>,i=<iterations>
//! client-final  c=biws,r=<cnonce><snonce>,p=<proof>
//! server-final  v=<server signature>   (or e=<error>)
//! ```
//!
//! Channel binding and SASLprep are not supported; names and passwords are
//! used as given.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::digest::CtOutput;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use pundun_frame::{FrameError, FrameReader, FrameWriter};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{ClientError, Result};

/// Correlation id carried by every handshake frame.
pub const HANDSHAKE_CORRELATION_ID: u16 = 0;

/// Iteration count servers use when none is configured.
pub const DEFAULT_ITERATIONS: u32 = 4096;

const GS2_HEADER: &str = "n,,";
// base64("n,,")
const CHANNEL_BINDING: &str = "biws";
const NONCE_BYTES: usize = 18;
const SALT_BYTES: usize = 16;
const KEY_LEN: usize = 32;
const MAX_USERNAME_LEN: usize = 256;

type HmacSha256 = Hmac<Sha256>;
type Key = [u8; KEY_LEN];

/// User name and password presented to the server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field(
                "password",
                &format_args!("<redacted:{} bytes>", self.password.len()),
            )
            .finish()
    }
}

/// Configuration for the authentication exchange.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Budget for the whole exchange.
    pub timeout: Duration,
    /// Maximum handshake frame payload size in bytes.
    pub max_handshake_payload: usize,
    /// Highest iteration count the client accepts from a server.
    pub max_iterations: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_handshake_payload: 16 * 1024,
            max_iterations: 1_000_000,
        }
    }
}

/// Outcome of a successful client-side exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// Authenticated user name.
    pub username: String,
    /// Iteration count the server requested.
    pub iterations: u32,
    /// Wall time the exchange took.
    pub elapsed: Duration,
}

/// Authenticate over freshly opened frame halves.
pub fn authenticate<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    credentials: &Credentials,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    validate_username(&credentials.username)?;
    run_client(reader, writer, ScramClient::new(credentials), config)
}

fn run_client<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    client: ScramClient<'_>,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    let started = Instant::now();
    let deadline = started + config.timeout;

    send_message(writer, &client.client_first())?;
    let server_first = recv_message(reader, deadline, config)?;
    let client_final = client.client_final(&server_first, config.max_iterations)?;

    send_message(writer, &client_final.message)?;
    let server_final = recv_message(reader, deadline, config)?;
    client_final.verify_server_final(&server_final)?;

    let elapsed = started.elapsed();
    info!(
        username = %client.credentials.username,
        iterations = client_final.iterations,
        elapsed_ms = elapsed.as_millis() as u64,
        "authenticated"
    );

    Ok(HandshakeResult {
        username: client.credentials.username.clone(),
        iterations: client_final.iterations,
        elapsed,
    })
}

/// Client half of the exchange.
pub(crate) struct ScramClient<'a> {
    credentials: &'a Credentials,
    nonce: String,
    client_first_bare: String,
}

/// Client-final message plus what the server must prove back.
pub(crate) struct ClientFinal {
    pub(crate) message: String,
    pub(crate) iterations: u32,
    server_key: Key,
    auth_message: String,
}

impl<'a> ScramClient<'a> {
    pub(crate) fn new(credentials: &'a Credentials) -> Self {
        Self::with_nonce(credentials, generate_nonce())
    }

    pub(crate) fn with_nonce(credentials: &'a Credentials, nonce: String) -> Self {
        let client_first_bare = format!("n={},r={}", escape_username(&credentials.username), nonce);
        Self {
            credentials,
            nonce,
            client_first_bare,
        }
    }

    pub(crate) fn client_first(&self) -> String {
        format!("{GS2_HEADER}{}", self.client_first_bare)
    }

    pub(crate) fn client_final(&self, server_first: &str, max_iterations: u32) -> Result<ClientFinal> {
        let first = ServerFirst::parse(server_first)?;
        if first.nonce.len() <= self.nonce.len() || !first.nonce.starts_with(&self.nonce) {
            return Err(auth_error("server nonce does not extend the client nonce"));
        }
        if first.iterations == 0 || first.iterations > max_iterations {
            return Err(auth_error(format!(
                "server requested {} iterations (max {max_iterations})",
                first.iterations
            )));
        }

        let salted = salted_password(
            self.credentials.password.as_bytes(),
            &first.salt,
            first.iterations,
        );
        let client_key = hmac_sha256(&salted, b"Client Key")?;
        let stored_key = sha256(&client_key);
        let server_key = hmac_sha256(&salted, b"Server Key")?;

        let without_proof = format!("c={CHANNEL_BINDING},r={}", first.nonce);
        let auth_message = format!("{},{server_first},{without_proof}", self.client_first_bare);
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let proof = xor(&client_key, &client_signature);

        Ok(ClientFinal {
            message: format!("{without_proof},p={}", STANDARD.encode(proof)),
            iterations: first.iterations,
            server_key,
            auth_message,
        })
    }
}

impl ClientFinal {
    pub(crate) fn verify_server_final(&self, server_final: &str) -> Result<()> {
        if let Some(reason) = server_final.strip_prefix("e=") {
            return Err(auth_error(format!("server rejected credentials: {reason}")));
        }
        let encoded = server_final
            .strip_prefix("v=")
            .ok_or_else(|| auth_error("malformed server-final message"))?;
        let signature = STANDARD
            .decode(encoded)
            .map_err(|_| auth_error("server signature is not valid base64"))?;
        HmacSha256::new_from_slice(&self.server_key)
            .map_err(|_| auth_error("invalid HMAC key"))?
            .chain_update(self.auth_message.as_bytes())
            .verify_slice(&signature)
            .map_err(|_| auth_error("server signature mismatch"))
    }
}

struct ServerFirst {
    nonce: String,
    salt: Vec<u8>,
    iterations: u32,
}

impl ServerFirst {
    fn parse(message: &str) -> Result<Self> {
        if let Some(reason) = message.strip_prefix("e=") {
            return Err(auth_error(format!("server rejected client-first: {reason}")));
        }
        let attrs = parse_attributes(message)?;
        match attrs.as_slice() {
            [('r', nonce), ('s', salt), ('i', iterations), ..] => {
                let salt = STANDARD
                    .decode(salt)
                    .map_err(|_| auth_error("salt is not valid base64"))?;
                let iterations = iterations
                    .parse::<u32>()
                    .map_err(|_| auth_error(format!("invalid iteration count '{iterations}'")))?;
                Ok(Self {
                    nonce: (*nonce).to_string(),
                    salt,
                    iterations,
                })
            }
            [('m', _), ..] => Err(auth_error("unsupported mandatory extension")),
            _ => Err(auth_error("malformed server-first message")),
        }
    }
}

/// Server-side credential record for one user.
#[derive(Clone)]
pub struct ScramVerifier {
    salt: Vec<u8>,
    iterations: u32,
    stored_key: Key,
    server_key: Key,
}

impl ScramVerifier {
    /// Derive the stored and server keys for `password`.
    pub fn from_password(password: &str, salt: &[u8], iterations: u32) -> Result<Self> {
        if iterations == 0 {
            return Err(ClientError::Config("iteration count must be > 0".to_string()));
        }
        let salted = salted_password(password.as_bytes(), salt, iterations);
        let client_key = hmac_sha256(&salted, b"Client Key")?;
        Ok(Self {
            salt: salt.to_vec(),
            iterations,
            stored_key: sha256(&client_key),
            server_key: hmac_sha256(&salted, b"Server Key")?,
        })
    }

    /// Same as [`ScramVerifier::from_password`] with a fresh random salt.
    pub fn with_random_salt(password: &str, iterations: u32) -> Result<Self> {
        let mut salt = [0u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::from_password(password, &salt, iterations)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl fmt::Debug for ScramVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramVerifier")
            .field("salt_len", &self.salt.len())
            .field("iterations", &self.iterations)
            .field("keys", &format_args!("<redacted>"))
            .finish()
    }
}

/// Run the server half of the exchange. `lookup` maps a user name to its
/// verifier. Returns the authenticated user name.
pub fn serve_handshake<R, W, F>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    lookup: F,
    config: &HandshakeConfig,
) -> Result<String>
where
    R: Read,
    W: Write,
    F: Fn(&str) -> Option<ScramVerifier>,
{
    serve_with_nonce(reader, writer, lookup, config, generate_nonce())
}

fn serve_with_nonce<R, W, F>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    lookup: F,
    config: &HandshakeConfig,
    server_nonce: String,
) -> Result<String>
where
    R: Read,
    W: Write,
    F: Fn(&str) -> Option<ScramVerifier>,
{
    let deadline = Instant::now() + config.timeout;

    let client_first = recv_message(reader, deadline, config)?;
    let bare = client_first
        .strip_prefix(GS2_HEADER)
        .ok_or_else(|| auth_error("unsupported GS2 header"))?;
    let (username, client_nonce) = match parse_attributes(bare)?.as_slice() {
        [('n', name), ('r', nonce), ..] => (unescape_username(name)?, (*nonce).to_string()),
        _ => return Err(auth_error("malformed client-first message")),
    };

    let Some(verifier) = lookup(&username) else {
        send_message(writer, "e=unknown-user")?;
        return Err(auth_error(format!("unknown user '{username}'")));
    };

    let nonce = format!("{client_nonce}{server_nonce}");
    let server_first = format!(
        "r={nonce},s={},i={}",
        STANDARD.encode(&verifier.salt),
        verifier.iterations
    );
    send_message(writer, &server_first)?;

    let client_final = recv_message(reader, deadline, config)?;
    let (without_proof, encoded_proof) = client_final
        .rsplit_once(",p=")
        .ok_or_else(|| auth_error("client-final message has no proof"))?;
    match parse_attributes(without_proof)?.as_slice() {
        [('c', binding), ('r', echoed), ..] if *binding == CHANNEL_BINDING && *echoed == nonce => {}
        _ => {
            send_message(writer, "e=other-error")?;
            return Err(auth_error("client-final binding or nonce mismatch"));
        }
    }

    let proof = STANDARD
        .decode(encoded_proof)
        .map_err(|_| auth_error("client proof is not valid base64"))?;
    let auth_message = format!("{bare},{server_first},{without_proof}");
    let client_signature = hmac_sha256(&verifier.stored_key, auth_message.as_bytes())?;
    let proof_ok = proof.len() == KEY_LEN && {
        let client_key = xor(&proof, &client_signature);
        CtOutput::<Sha256>::new(Sha256::digest(client_key))
            == CtOutput::new(verifier.stored_key.into())
    };
    if !proof_ok {
        send_message(writer, "e=invalid-proof")?;
        return Err(auth_error(format!("invalid proof for user '{username}'")));
    }

    let server_signature = hmac_sha256(&verifier.server_key, auth_message.as_bytes())?;
    send_message(writer, &format!("v={}", STANDARD.encode(server_signature)))?;
    debug!(username = %username, "client authenticated");
    Ok(username)
}

fn send_message<W: Write>(writer: &mut FrameWriter<W>, message: &str) -> Result<()> {
    writer
        .send(HANDSHAKE_CORRELATION_ID, message.as_bytes())
        .map_err(handshake_frame_error)
}

fn recv_message<R: Read>(
    reader: &mut FrameReader<R>,
    deadline: Instant,
    config: &HandshakeConfig,
) -> Result<String> {
    loop {
        if Instant::now() >= deadline {
            return Err(auth_error(format!(
                "handshake timed out after {:?}",
                config.timeout
            )));
        }

        match reader.read_frame() {
            Ok(frame) => {
                if frame.correlation_id != HANDSHAKE_CORRELATION_ID {
                    return Err(auth_error(format!(
                        "expected handshake correlation id {HANDSHAKE_CORRELATION_ID}, got {}",
                        frame.correlation_id
                    )));
                }
                if frame.payload.len() > config.max_handshake_payload {
                    return Err(auth_error(format!(
                        "handshake payload too large: {} (max {})",
                        frame.payload.len(),
                        config.max_handshake_payload
                    )));
                }
                return String::from_utf8(frame.payload.to_vec())
                    .map_err(|_| auth_error("handshake message is not UTF-8"));
            }
            Err(FrameError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => return Err(handshake_frame_error(err)),
        }
    }
}

fn handshake_frame_error(err: FrameError) -> ClientError {
    match err {
        FrameError::ConnectionClosed => auth_error("connection closed during handshake"),
        FrameError::Io(io)
            if matches!(
                io.kind(),
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
            ) =>
        {
            auth_error("connection closed during handshake")
        }
        err if err.is_framing_violation() => auth_error(format!("handshake framing error: {err}")),
        err => ClientError::Frame(err),
    }
}

fn auth_error(message: impl Into<String>) -> ClientError {
    ClientError::Authentication(message.into())
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(ClientError::Config(format!(
            "invalid user name length: {}",
            username.len()
        )));
    }
    Ok(())
}

/// Split `k=v,k=v` into single-letter keys and raw values.
fn parse_attributes(message: &str) -> Result<Vec<(char, &str)>> {
    message
        .split(',')
        .map(|part| {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| auth_error(format!("malformed attribute '{part}'")))?;
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(letter), None) if letter.is_ascii_alphabetic() => Ok((letter, value)),
                _ => Err(auth_error(format!("malformed attribute '{part}'"))),
            }
        })
        .collect()
}

fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn unescape_username(escaped: &str) -> Result<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find('=') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("=3D") {
            out.push('=');
        } else if tail.starts_with("=2C") {
            out.push(',');
        } else {
            return Err(auth_error("invalid escape in user name"));
        }
        rest = &tail[3..];
    }
    out.push_str(rest);
    validate_username(&out).map_err(|_| auth_error("invalid user name"))?;
    Ok(out)
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// `Hi()` from RFC 5802: PBKDF2-HMAC-SHA-256 with one output block.
fn salted_password(password: &[u8], salt: &[u8], iterations: u32) -> Key {
    let mut salted = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut salted);
    salted
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Key> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| auth_error("invalid HMAC key"))?;
    mac.update(data);
    Ok(to_key(&mac.finalize().into_bytes()))
}

fn sha256(data: &[u8]) -> Key {
    to_key(&Sha256::digest(data))
}

fn to_key(bytes: &[u8]) -> Key {
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes[..KEY_LEN]);
    key
}

fn xor(left: &[u8], right: &[u8]) -> Key {
    let mut out = [0u8; KEY_LEN];
    for (slot, (a, b)) in out.iter_mut().zip(left.iter().zip(right.iter())) {
        *slot = a ^ b;
    }
    out
}
