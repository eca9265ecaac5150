use log::{info, warn};
use picomq::{transport, MulticastTransport, TransportError};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};
use tokio::net::UdpSocket;

/// Joins `group` on `interface` and hands the socket to tokio.
///
/// Must be called from within a tokio runtime.
pub fn bind_multicast(interface: Ipv4Addr, group: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    UdpSocket::from_std(transport::bind_multicast(interface, group, port)?)
}

/// Multicast transport over a tokio `UdpSocket`.
///
/// The engine only ever calls the non-blocking `try_*` socket methods, the
/// async side is limited to [`TokioMulticast::readable`], which lets a task
/// sleep until `poll_once` has something to do.
#[derive(Debug)]
pub struct TokioMulticast {
    interface: Ipv4Addr,
    socket: Option<UdpSocket>,
    local_address: Option<IpAddr>,
    ttl: Option<u8>,
}

impl TokioMulticast {
    pub fn new(interface: Ipv4Addr) -> Self {
        Self { interface, socket: None, local_address: None, ttl: None }
    }

    /// Wraps an already bound socket.
    pub fn from_socket(socket: UdpSocket, local_address: Option<IpAddr>) -> Self {
        Self {
            interface: Ipv4Addr::UNSPECIFIED,
            socket: Some(socket),
            local_address,
            ttl: None,
        }
    }

    /// Waits until a datagram can be read.
    pub async fn readable(&self) -> io::Result<()> {
        self.socket()?.readable().await
    }

    /// Waits until a datagram can be sent. A freshly joined socket has no
    /// readiness yet, so a send without waiting here may see `WouldBlock`.
    pub async fn writable(&self) -> io::Result<()> {
        self.socket()?.writable().await
    }

    fn socket(&self) -> io::Result<&UdpSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "multicast group not joined"))
    }
}

impl MulticastTransport for TokioMulticast {
    fn join_multicast_group(&mut self, group: Ipv4Addr, port: u16) -> Result<(), TransportError> {
        self.socket = Some(bind_multicast(self.interface, group, port)?);
        self.ttl = None;

        self.local_address = match transport::discover_local_address(self.interface, group, port)
        {
            Ok(address) => Some(address),
            Err(e) => {
                warn!("Couldn't determine local address, own messages will be delivered - {}", e);
                None
            },
        };

        info!("Joined multicast group {}:{} on {}", group, port, self.interface);
        Ok(())
    }

    fn receive_nonblocking(
        &mut self,
        buf: &mut [u8],
    ) -> Result<Option<(IpAddr, usize)>, TransportError> {
        let socket = match &self.socket {
            Some(socket) => socket,
            None => return Ok(None),
        };

        match socket.try_recv_from(buf) {
            Ok((len, source)) => Ok(Some((source.ip(), len))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn send_multicast(
        &mut self,
        datagram: &[u8],
        group: Ipv4Addr,
        port: u16,
        ttl: u8,
    ) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotJoined)?;

        if self.ttl != Some(ttl) {
            socket.set_multicast_ttl_v4(ttl.into())?;
            self.ttl = Some(ttl);
        }

        let written = socket.try_send_to(datagram, SocketAddr::from((group, port)))?;

        if written != datagram.len() {
            return Err(TransportError::ShortWrite { written, expected: datagram.len() });
        }

        Ok(())
    }

    fn local_address(&self) -> Option<IpAddr> {
        self.local_address
    }
}
