//! UDP transport for audio datagrams
//!
//! The real-time loops only need two things from the network: send one
//! datagram, and poll for one datagram without blocking. `Transport` is that
//! seam; `UdpTransport` is the socket behind it.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::error::StartupError;

// =============================================================================
// Transport
// =============================================================================

/// Datagram endpoint used by the ingest and transmit paths
pub trait Transport {
    /// Send one datagram. Fire and forget: no acknowledgement, no retry.
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Receive one datagram without blocking
    ///
    /// # Returns
    /// * `Ok(Some(len))` - A datagram was copied into `buf` (truncated to `buf.len()`)
    /// * `Ok(None)` - Nothing is waiting
    /// * `Err(e)` - Socket error
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;
}

// =============================================================================
// UDP Transport
// =============================================================================

/// Non-blocking UDP socket
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind a receiving socket on `addr`
    pub fn bind(addr: SocketAddr) -> Result<Self, StartupError> {
        let bind_err = |source| StartupError::Bind {
            addr: addr.to_string(),
            source,
        };

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;

        Ok(Self {
            socket: socket.into(),
        })
    }

    /// Create a sending socket connected to `host:port`
    ///
    /// Tries each resolved address in turn and keeps the first one a socket
    /// can be created for.
    pub fn connect(host: &str, port: u16) -> Result<Self, StartupError> {
        let endpoint = format!("{}:{}", host, port);
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|_| StartupError::Resolve(endpoint.clone()))?;

        for remote in addrs {
            match Self::connect_to(remote) {
                Ok(transport) => {
                    debug!(%remote, "sending to");
                    return Ok(transport);
                }
                Err(e) => warn!(%remote, "socket: {}", e),
            }
        }

        Err(StartupError::Resolve(endpoint))
    }

    fn connect_to(remote: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = Socket::new(Domain::for_address(remote), Type::DGRAM, Some(Protocol::UDP))?;
        socket.bind(&local.into())?;
        socket.connect(&remote.into())?;

        Ok(Self {
            socket: socket.into(),
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let sent = self.socket.send(datagram)?;
        if sent != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {} of {} bytes", sent, datagram.len()),
            ));
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        loop {
            match self.socket.recv(buf) {
                Ok(len) => return Ok(Some(len)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
