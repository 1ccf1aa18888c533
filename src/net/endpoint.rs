//! Endpoint value types.
//!
//! An endpoint supplies an address-family tag and its serialisation to the
//! OS socket-address layout, which is everything bind and connect need.

use crate::error::{Error, ErrorKind, Result};
use socket2::SockAddr;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Address family of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4.
    Inet,
    /// IPv6.
    Inet6,
    /// Unix-domain (filesystem path).
    Unix,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet => f.write_str("inet"),
            Self::Inet6 => f.write_str("inet6"),
            Self::Unix => f.write_str("unix"),
        }
    }
}

/// A connectable or bindable network address.
pub trait Endpoint {
    /// The family tag for socket creation.
    fn family(&self) -> AddressFamily;

    /// The OS socket-address layout for bind/connect.
    fn to_sock_addr(&self) -> Result<SockAddr>;
}

/// An IPv4 or IPv6 address plus a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcpEndpoint {
    addr: SocketAddr,
}

impl TcpEndpoint {
    /// Creates an endpoint from an address and a port.
    #[must_use]
    pub const fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
        }
    }

    /// Creates an endpoint from a socket address.
    #[must_use]
    pub const fn from_socket_addr(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// The IP address.
    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    /// The port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The endpoint as a socket address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for TcpEndpoint {
    /// IPv4 renders as `a.b.c.d:port`, IPv6 as `[addr]:port`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.addr, f)
    }
}

impl Endpoint for TcpEndpoint {
    fn family(&self) -> AddressFamily {
        if self.addr.is_ipv4() {
            AddressFamily::Inet
        } else {
            AddressFamily::Inet6
        }
    }

    fn to_sock_addr(&self) -> Result<SockAddr> {
        Ok(SockAddr::from(self.addr))
    }
}

/// A Unix-domain endpoint: a filesystem path, bounded by the AF_UNIX
/// address length.
#[cfg(unix)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnixEndpoint {
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl UnixEndpoint {
    /// Creates an endpoint for `path`. The length bound is checked when the
    /// endpoint is serialised.
    #[must_use]
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The filesystem path.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[cfg(unix)]
impl fmt::Display for UnixEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[cfg(unix)]
impl Endpoint for UnixEndpoint {
    fn family(&self) -> AddressFamily {
        AddressFamily::Unix
    }

    fn to_sock_addr(&self) -> Result<SockAddr> {
        SockAddr::unix(&self.path)
            .map_err(|_| Error::new(ErrorKind::AddressFamilyNotSupported))
    }
}
