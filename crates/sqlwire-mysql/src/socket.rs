//! Byte-stream transports.
//!
//! - [`Socket`] - what the protocol engine needs from a stream
//! - [`TcpSocket`] - std `TcpStream` with connect/read/write timeouts

use sqlwire_core::error::{TransportError, TransportErrorKind};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// A reconnectable byte stream.
///
/// `connect` may be called again after `close` (or after a failure) to
/// start a fresh session.
pub trait Socket: Send {
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Read exactly `len` bytes, failing if the stream ends first.
    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, TransportError>;

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Drop the stream. Closing a closed socket does nothing.
    fn close(&mut self);
}

/// TCP stream to a MySQL server.
#[derive(Debug)]
pub struct TcpSocket {
    host: String,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpSocket {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            stream: None,
        }
    }

    pub fn timeouts(mut self, connect: Duration, read: Duration, write: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or_else(|| {
            TransportError::new(TransportErrorKind::NotConnected, "socket is not connected")
        })
    }
}

impl Socket for TcpSocket {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.close();
        let target = format!("{}:{}", self.host, self.port);
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                TransportError::from_io(
                    TransportErrorKind::Connect,
                    &format!("resolving {target}"),
                    e,
                )
            })?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    let configure = |s: &TcpStream| -> std::io::Result<()> {
                        s.set_read_timeout(Some(self.read_timeout))?;
                        s.set_write_timeout(Some(self.write_timeout))?;
                        s.set_nodelay(true)
                    };
                    configure(&stream).map_err(|e| {
                        TransportError::from_io(
                            TransportErrorKind::Connect,
                            &format!("configuring {addr}"),
                            e,
                        )
                    })?;
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_err = Some((addr, e)),
            }
        }

        Err(match last_err {
            Some((addr, e)) => TransportError::from_io(
                TransportErrorKind::Connect,
                &format!("connecting to {addr}"),
                e,
            ),
            None => TransportError::new(
                TransportErrorKind::Connect,
                format!("{target} resolved to no addresses"),
            ),
        })
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        self.stream()?
            .read_exact(&mut buf)
            .map_err(|e| TransportError::from_io(TransportErrorKind::Read, "reading", e))?;
        Ok(buf)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream()?;
        stream
            .write_all(bytes)
            .and_then(|()| stream.flush())
            .map_err(|e| TransportError::from_io(TransportErrorKind::Write, "writing", e))
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
