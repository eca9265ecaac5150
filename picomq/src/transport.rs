use crate::types::TransportError;
use log::{info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket},
};

/// The datagram capability the engine needs from the network stack.
///
/// Every method must return promptly. `receive_nonblocking` in particular
/// reports `Ok(None)` instead of waiting when nothing is pending.
pub trait MulticastTransport {
    /// Starts receiving datagrams sent to `group` on `port`.
    fn join_multicast_group(&mut self, group: Ipv4Addr, port: u16) -> Result<(), TransportError>;

    /// Reads one pending datagram into `buf`, returning its source address and
    /// length. Datagrams longer than `buf` are truncated.
    fn receive_nonblocking(
        &mut self,
        buf: &mut [u8],
    ) -> Result<Option<(IpAddr, usize)>, TransportError>;

    /// Sends `datagram` as a single multicast datagram.
    fn send_multicast(
        &mut self,
        datagram: &[u8],
        group: Ipv4Addr,
        port: u16,
        ttl: u8,
    ) -> Result<(), TransportError>;

    /// The address this device's own transmissions arrive from, if known.
    fn local_address(&self) -> Option<IpAddr>;
}

/// Finds the address the host would use to reach `group`, without sending
/// anything. An explicit `interface` wins.
pub fn discover_local_address(
    interface: Ipv4Addr,
    group: Ipv4Addr,
    port: u16,
) -> io::Result<IpAddr> {
    if !interface.is_unspecified() {
        return Ok(interface.into());
    }

    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    probe.connect((group, port))?;

    Ok(probe.local_addr()?.ip())
}

/// Binds a non-blocking socket to `port` and joins `group` on `interface`.
///
/// An explicit `interface` is also used for outgoing multicast, so our own
/// datagrams come back from the address we expect.
pub fn bind_multicast(interface: Ipv4Addr, group: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.join_multicast_v4(&group, &interface)?;

    if !interface.is_unspecified() {
        socket.set_multicast_if_v4(&interface)?;
    }

    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// Multicast transport over a std `UdpSocket`.
#[derive(Debug)]
pub struct UdpMulticast {
    interface: Ipv4Addr,
    socket: Option<UdpSocket>,
    local_address: Option<IpAddr>,
    ttl: Option<u8>,
}

impl UdpMulticast {
    pub fn new(interface: Ipv4Addr) -> Self {
        Self { interface, socket: None, local_address: None, ttl: None }
    }

    /// The port the socket is bound to, once the group is joined. Differs from
    /// the requested one only when joining on port 0.
    pub fn local_port(&self) -> Option<u16> {
        self.socket.as_ref()?.local_addr().ok().map(|address| address.port())
    }
}

impl MulticastTransport for UdpMulticast {
    fn join_multicast_group(&mut self, group: Ipv4Addr, port: u16) -> Result<(), TransportError> {
        self.socket = Some(bind_multicast(self.interface, group, port)?);
        self.ttl = None;

        self.local_address = match discover_local_address(self.interface, group, port) {
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
        // Nothing can arrive before the group is joined.
        let socket = match &self.socket {
            Some(socket) => socket,
            None => return Ok(None),
        };

        match socket.recv_from(buf) {
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

        let written = socket.send_to(datagram, (group, port))?;

        if written != datagram.len() {
            return Err(TransportError::ShortWrite { written, expected: datagram.len() });
        }

        Ok(())
    }

    fn local_address(&self) -> Option<IpAddr> {
        self.local_address
    }
}
