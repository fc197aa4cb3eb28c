use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::Result;

/// A connected server stream; implements Read + Write.
///
/// This is the fundamental I/O type handed to the framing layer. A stream can
/// be cloned into independent read and write handles that share the same
/// socket, and shut down from any handle to unblock a reader parked in
/// `read`.
pub struct ServerStream {
    inner: ServerStreamInner,
}

enum ServerStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for ServerStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ServerStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            ServerStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ServerStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ServerStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            ServerStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            ServerStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            ServerStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl From<TcpStream> for ServerStream {
    fn from(stream: TcpStream) -> Self {
        Self {
            inner: ServerStreamInner::Tcp(stream),
        }
    }
}

#[cfg(unix)]
impl From<std::os::unix::net::UnixStream> for ServerStream {
    fn from(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: ServerStreamInner::Unix(stream),
        }
    }
}

impl ServerStream {
    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            ServerStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            ServerStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            ServerStreamInner::Tcp(stream) => {
                stream.set_write_timeout(timeout).map_err(Into::into)
            }
            #[cfg(unix)]
            ServerStreamInner::Unix(stream) => {
                stream.set_write_timeout(timeout).map_err(Into::into)
            }
        }
    }

    /// Try to clone this stream (creates a new handle to the same socket).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            ServerStreamInner::Tcp(stream) => Ok(Self::from(stream.try_clone()?)),
            #[cfg(unix)]
            ServerStreamInner::Unix(stream) => Ok(Self::from(stream.try_clone()?)),
        }
    }

    /// Shut down both halves of the stream.
    ///
    /// Every clone observes the shutdown: pending and future reads return
    /// end-of-stream and writes fail. Shutting down an already disconnected
    /// stream is not an error.
    pub fn shutdown(&self) -> Result<()> {
        let res = match &self.inner {
            ServerStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            ServerStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match res {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Human-readable address of the remote end, for logs and diagnostics.
    pub fn peer_addr(&self) -> String {
        match &self.inner {
            ServerStreamInner::Tcp(stream) => stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "tcp:<unknown>".to_string()),
            #[cfg(unix)]
            ServerStreamInner::Unix(stream) => match stream.peer_addr() {
                Ok(addr) => match addr.as_pathname() {
                    Some(path) => format!("unix:{}", path.display()),
                    None => "unix:<unnamed>".to_string(),
                },
                Err(_) => "unix:<unknown>".to_string(),
            },
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            ServerStreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            ServerStreamInner::Unix(_) => "unix-domain-socket",
        }
    }
}

impl std::fmt::Debug for ServerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerStream")
            .field("type", &self.transport_name())
            .field("peer", &self.peer_addr())
            .finish()
    }
}
