use pundun_frame::{FrameConfig, FrameReader, FrameWriter};
use pundun_transport::ServerStream;
use tracing::debug;

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionConfig};
use crate::error::Result;
use crate::handshake::{authenticate, Credentials, HandshakeConfig};

/// Connect to `host:port`, authenticate, and start the listener.
pub fn connect(host: &str, port: u16, credentials: &Credentials) -> Result<Connection> {
    connect_with_config(&ClientConfig::new(host, port, credentials.clone()))
}

/// Connect with explicit configuration.
pub fn connect_with_config(config: &ClientConfig) -> Result<Connection> {
    config.validate()?;
    let stream = pundun_transport::connect_timeout(&config.host, config.port, config.connect_timeout)?;
    establish(
        stream,
        &config.credentials(),
        &config.handshake_config(),
        config.connection_config(),
    )
}

/// Authenticate over an open stream and turn it into a [`Connection`].
///
/// The handshake runs with the handshake timeout and payload budget; both are
/// replaced by the runtime settings before the listener starts.
pub fn establish(
    stream: ServerStream,
    credentials: &Credentials,
    handshake_config: &HandshakeConfig,
    connection_config: ConnectionConfig,
) -> Result<Connection> {
    let reader_stream = stream.try_clone()?;

    let frame_config = FrameConfig {
        max_payload_size: handshake_config.max_handshake_payload,
        read_timeout: Some(handshake_config.timeout),
        write_timeout: Some(handshake_config.timeout),
    };
    let mut reader = FrameReader::with_config_stream(reader_stream, frame_config.clone())?;
    let mut writer = FrameWriter::with_config_stream(stream, frame_config)?;

    let handshake = authenticate(&mut reader, &mut writer, credentials, handshake_config)?;

    reader.set_read_timeout(None)?;
    reader.set_max_payload_size(connection_config.max_payload_size);
    writer
        .get_ref()
        .set_write_timeout(connection_config.write_timeout)?;
    writer.set_max_payload_size(connection_config.max_payload_size);
    debug!(username = %handshake.username, "handshake complete, starting listener");

    Connection::from_parts(reader, writer, Some(handshake), connection_config)
}
