use crate::{DEFAULT_GROUP, DEFAULT_PORT, DEFAULT_TTL};
use std::net::{Ipv4Addr, SocketAddrV4};

/// What a receive cycle does after a datagram fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedPolicy {
    /// Drop the datagram and end the cycle. Whatever is still pending waits for
    /// the next poll.
    AbortCycle,
    /// Drop only the offending datagram and keep going.
    SkipFrame,
}

impl Default for MalformedPolicy {
    fn default() -> Self {
        MalformedPolicy::AbortCycle
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub group: Ipv4Addr,
    pub port: u16,
    /// Multicast time-to-live. 1 keeps traffic on the local link.
    pub ttl: u8,
    /// Interface to join the group on and send from. Unspecified lets the OS
    /// choose.
    pub interface: Ipv4Addr,
    pub malformed: MalformedPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP,
            port: DEFAULT_PORT,
            ttl: DEFAULT_TTL,
            interface: Ipv4Addr::UNSPECIFIED,
            malformed: MalformedPolicy::default(),
        }
    }
}

impl Config {
    pub fn with_group(self, group: Ipv4Addr) -> Self {
        Self { group, ..self }
    }

    pub fn with_port(self, port: u16) -> Self {
        Self { port, ..self }
    }

    pub fn with_ttl(self, ttl: u8) -> Self {
        Self { ttl, ..self }
    }

    pub fn with_interface(self, interface: Ipv4Addr) -> Self {
        Self { interface, ..self }
    }

    pub fn with_malformed_policy(self, malformed: MalformedPolicy) -> Self {
        Self { malformed, ..self }
    }

    pub fn multicast_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.group, self.port)
    }
}
