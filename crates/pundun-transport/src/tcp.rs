use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::ServerStream;

/// Connect to a pundun server over TCP (blocking, OS connect timeout).
pub fn connect(host: &str, port: u16) -> Result<ServerStream> {
    connect_with(host, port, None)
}

/// Connect to a pundun server over TCP, bounding each connect attempt.
///
/// Every resolved address is tried in order; the error of the last attempt
/// is reported if none accepts.
pub fn connect_timeout(host: &str, port: u16, timeout: Duration) -> Result<ServerStream> {
    connect_with(host, port, Some(timeout))
}

fn connect_with(host: &str, port: u16, timeout: Option<Duration>) -> Result<ServerStream> {
    let addr = format!("{host}:{port}");
    let candidates = resolve(host, port)?;

    let mut last_err = None;
    for candidate in candidates {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&candidate, timeout),
            None => TcpStream::connect(candidate),
        };
        match attempt {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                info!(%addr, resolved = %candidate, "connected to pundun server");
                return Ok(ServerStream::from(stream));
            }
            Err(err) => {
                debug!(%addr, resolved = %candidate, error = %err, "connect attempt failed");
                last_err = Some(err);
            }
        }
    }

    Err(TransportError::Connect {
        addr,
        source: last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
        }),
    })
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| TransportError::Resolve {
            addr: format!("{host}:{port}"),
            source,
        })?
        .collect::<Vec<_>>();
    Ok(addrs)
}
