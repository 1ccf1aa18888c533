//! Stream socket channels.
//!
//! [`StreamChannel`] is a connected stream socket (TCP or Unix-domain);
//! [`StreamListener`] accepts connections and hands out new channels.
//! Partial transfers are normal; a peer that has shut down surfaces
//! `EndOfFile` on receive, never a zero-byte success.

use crate::buffer::Buffer;
use crate::cancel::StopToken;
use crate::error::{Error, ErrorKind, Result};
use crate::handle::{RawHandle, UniqueHandle};
use crate::net::{AddressFamily, Endpoint, TcpEndpoint};
use crate::reactor::{os, ReactorHandle};
use socket2::{Domain, Protocol, Socket, Type};

fn make_socket(family: AddressFamily) -> Result<Socket> {
    let (domain, protocol) = match family {
        AddressFamily::Inet => (Domain::IPV4, Some(Protocol::TCP)),
        AddressFamily::Inet6 => (Domain::IPV6, Some(Protocol::TCP)),
        #[cfg(unix)]
        AddressFamily::Unix => (Domain::UNIX, None),
        #[cfg(not(unix))]
        AddressFamily::Unix => return Err(Error::new(ErrorKind::AddressFamilyNotSupported)),
    };
    let socket = Socket::new(domain, Type::STREAM, protocol).map_err(Error::from_os)?;
    #[cfg(unix)]
    socket.set_nonblocking(true).map_err(Error::from_os)?;
    Ok(socket)
}

#[cfg(unix)]
fn into_raw(socket: Socket) -> RawHandle {
    use std::os::unix::io::IntoRawFd;
    socket.into_raw_fd()
}

#[cfg(windows)]
fn into_raw(socket: Socket) -> RawHandle {
    use std::os::windows::io::IntoRawSocket;
    socket.into_raw_socket() as RawHandle
}

/// A connected stream socket.
#[derive(Debug, Default)]
pub struct StreamChannel {
    handle: UniqueHandle,
    reactor: Option<ReactorHandle>,
}

impl StreamChannel {
    /// Creates a closed channel; connect it to open it.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(handle: UniqueHandle, reactor: ReactorHandle) -> Self {
        Self {
            handle,
            reactor: Some(reactor),
        }
    }

    /// Returns true if the channel is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    fn raw(&self) -> Result<RawHandle> {
        if self.handle.is_open() {
            Ok(self.handle.get())
        } else {
            Err(Error::new(ErrorKind::ChannelNotOpen))
        }
    }

    fn reactor(&self) -> Result<&ReactorHandle> {
        self.reactor
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::ChannelNotOpen))
    }

    fn prepare_connect<E: Endpoint>(
        &self,
        endpoint: &E,
    ) -> Result<(socket2::SockAddr, RawHandle, ReactorHandle)> {
        if self.is_open() {
            return Err(Error::new(ErrorKind::ChannelAlreadyOpen));
        }
        let addr = endpoint.to_sock_addr()?;
        let socket = make_socket(endpoint.family())?;
        let raw = into_raw(socket);
        let reactor = ReactorHandle::acquire()?;
        if let Err(err) = reactor.get().associate(raw) {
            let mut handle = UniqueHandle::new(raw);
            let _ = handle.close();
            return Err(err);
        }
        Ok((addr, raw, reactor))
    }

    fn connect_failed(raw: RawHandle, reactor: &ReactorHandle) {
        reactor.get().deassociate(raw);
        let mut handle = UniqueHandle::new(raw);
        let _ = handle.close();
    }

    /// Connects to `endpoint`, blocking until the handshake resolves.
    pub fn connect<E: Endpoint>(&mut self, endpoint: &E) -> Result<()> {
        let (addr, raw, reactor) = self.prepare_connect(endpoint)?;
        match os::connect_sync(raw, &addr) {
            Ok(()) => {
                self.handle.assign(raw);
                self.reactor = Some(reactor);
                Ok(())
            }
            Err(err) => {
                Self::connect_failed(raw, &reactor);
                Err(Error::from_os(err))
            }
        }
    }

    /// Connects to `endpoint` without blocking the caller.
    pub async fn async_connect<E: Endpoint>(
        &mut self,
        endpoint: &E,
        token: Option<&StopToken>,
    ) -> Result<()> {
        let (addr, raw, reactor) = self.prepare_connect(endpoint)?;
        match reactor.get().async_connect(raw, &addr, token).await {
            Ok(()) => {
                self.handle.assign(raw);
                self.reactor = Some(reactor);
                Ok(())
            }
            Err(err) => {
                Self::connect_failed(raw, &reactor);
                Err(err)
            }
        }
    }

    /// Receives some bytes into `buf`, blocking until data arrives.
    pub fn recv_some<B: Buffer + ?Sized>(&mut self, buf: &mut B) -> Result<usize> {
        let raw = self.raw()?;
        let n = {
            let mut ranges = buf.writable_ranges();
            let Some(range) = ranges.first_mut().filter(|r| !r.is_empty()) else {
                return Ok(0);
            };
            os::recv_sync(raw, range).map_err(Error::from_os)?
        };
        if n == 0 {
            return Err(Error::new(ErrorKind::EndOfFile));
        }
        buf.commit(n);
        Ok(n)
    }

    /// Asynchronous [`recv_some`](Self::recv_some).
    pub async fn async_recv_some<B: Buffer + ?Sized>(
        &mut self,
        buf: &mut B,
        token: Option<&StopToken>,
    ) -> Result<usize> {
        let raw = self.raw()?;
        let reactor = self.reactor()?.get();
        let n = {
            let mut ranges = buf.writable_ranges();
            let Some(range) = ranges.first_mut().filter(|r| !r.is_empty()) else {
                return Ok(0);
            };
            reactor.async_recv(raw, range, token).await?
        };
        if n == 0 {
            return Err(Error::new(ErrorKind::EndOfFile));
        }
        buf.commit(n);
        Ok(n)
    }

    /// Sends some readable bytes from `buf`, blocking until accepted.
    pub fn send_some<B: Buffer + ?Sized>(&mut self, buf: &mut B) -> Result<usize> {
        let raw = self.raw()?;
        let n = {
            let ranges = buf.readable_ranges();
            let Some(range) = ranges.first().filter(|r| !r.is_empty()) else {
                return Err(Error::new(ErrorKind::NoDataInBuffer));
            };
            os::send_sync(raw, range).map_err(Error::from_os)?
        };
        buf.discard(n);
        Ok(n)
    }

    /// Asynchronous [`send_some`](Self::send_some).
    pub async fn async_send_some<B: Buffer + ?Sized>(
        &mut self,
        buf: &mut B,
        token: Option<&StopToken>,
    ) -> Result<usize> {
        let raw = self.raw()?;
        let reactor = self.reactor()?.get();
        let n = {
            let ranges = buf.readable_ranges();
            let Some(range) = ranges.first().filter(|r| !r.is_empty()) else {
                return Err(Error::new(ErrorKind::NoDataInBuffer));
            };
            reactor.async_send(raw, range, token).await?
        };
        buf.discard(n);
        Ok(n)
    }

    /// Closes the channel.
    pub fn close(&mut self) -> Result<()> {
        let raw = self.raw()?;
        if let Some(reactor) = &self.reactor {
            reactor.get().deassociate(raw);
        }
        let result = self.handle.close();
        self.reactor = None;
        result
    }

    /// Closes the channel without blocking the caller.
    pub async fn async_close(&mut self) -> Result<()> {
        let raw = self.raw()?;
        let reactor = self.reactor.take().expect("open channel without reactor");
        reactor.get().deassociate(raw);
        let released = self.handle.release();
        debug_assert_eq!(released, raw);
        reactor.get().async_close(released).await
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        if self.handle.is_open() {
            if let Some(reactor) = &self.reactor {
                reactor.get().deassociate(self.handle.get());
            }
        }
    }
}

/// A listening stream socket.
#[derive(Debug)]
pub struct StreamListener {
    handle: UniqueHandle,
    reactor: Option<ReactorHandle>,
}

impl StreamListener {
    /// Binds `endpoint` and starts listening.
    ///
    /// `SO_REUSEADDR` is set for every family except Unix-domain.
    pub fn listen<E: Endpoint>(endpoint: &E) -> Result<Self> {
        let addr = endpoint.to_sock_addr()?;
        let socket = make_socket(endpoint.family())?;
        if endpoint.family() != AddressFamily::Unix {
            socket.set_reuse_address(true).map_err(Error::from_os)?;
        }
        socket.bind(&addr).map_err(Error::from_os)?;
        socket.listen(128).map_err(Error::from_os)?;

        let raw = into_raw(socket);
        let reactor = ReactorHandle::acquire()?;
        if let Err(err) = reactor.get().associate(raw) {
            let mut handle = UniqueHandle::new(raw);
            let _ = handle.close();
            return Err(err);
        }
        tracing::debug!(?raw, "listener bound");
        Ok(Self {
            handle: UniqueHandle::new(raw),
            reactor: Some(reactor),
        })
    }

    /// Returns true if the listener is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    fn raw(&self) -> Result<RawHandle> {
        if self.handle.is_open() {
            Ok(self.handle.get())
        } else {
            Err(Error::new(ErrorKind::ChannelNotOpen))
        }
    }

    /// The TCP endpoint the listener is bound to, including the actual port
    /// after binding port zero.
    pub fn local_endpoint(&self) -> Result<TcpEndpoint> {
        let addr = os::local_addr(self.raw()?).map_err(Error::from_os)?;
        addr.as_socket()
            .map(TcpEndpoint::from_socket_addr)
            .ok_or_else(|| Error::new(ErrorKind::AddressFamilyNotSupported))
    }

    fn adopt_client(raw: RawHandle) -> Result<StreamChannel> {
        let handle = UniqueHandle::new(raw);
        let reactor = ReactorHandle::acquire()?;
        reactor.get().associate(raw)?;
        Ok(StreamChannel::from_parts(handle, reactor))
    }

    /// Accepts one connection, blocking until a peer arrives.
    pub fn accept(&self) -> Result<StreamChannel> {
        let raw = os::accept_sync(self.raw()?).map_err(Error::from_os)?;
        Self::adopt_client(raw)
    }

    /// Asynchronous [`accept`](Self::accept) with optional cancellation.
    pub async fn async_accept(&self, token: Option<&StopToken>) -> Result<StreamChannel> {
        let listener = self.raw()?;
        let reactor = self
            .reactor
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::ChannelNotOpen))?;
        let raw = reactor.get().async_accept(listener, token).await?;
        Self::adopt_client(raw)
    }

    /// Closes the listener.
    pub fn close(&mut self) -> Result<()> {
        let raw = self.raw()?;
        if let Some(reactor) = &self.reactor {
            reactor.get().deassociate(raw);
        }
        let result = self.handle.close();
        self.reactor = None;
        result
    }
}

impl Drop for StreamListener {
    fn drop(&mut self) {
        if self.handle.is_open() {
            if let Some(reactor) = &self.reactor {
                reactor.get().deassociate(self.handle.get());
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::buffer::{buffer_write, FixedBuffer};
    use crate::net::UnixEndpoint;
    use std::net::Ipv4Addr;

    #[test]
    fn closed_channel_rejects_io() {
        let mut channel = StreamChannel::new();
        let mut buf = FixedBuffer::<8>::new();
        assert_eq!(
            channel.recv_some(&mut buf).unwrap_err().kind(),
            ErrorKind::ChannelNotOpen
        );
        assert_eq!(
            channel.send_some(&mut buf).unwrap_err().kind(),
            ErrorKind::ChannelNotOpen
        );
        assert_eq!(channel.close().unwrap_err().kind(), ErrorKind::ChannelNotOpen);
    }

    #[test]
    fn tcp_listen_connect_echo() {
        let listener =
            StreamListener::listen(&TcpEndpoint::new(Ipv4Addr::LOCALHOST.into(), 0)).unwrap();
        let endpoint = listener.local_endpoint().unwrap();
        assert_ne!(endpoint.port(), 0);

        let server = std::thread::spawn(move || {
            let mut peer = listener.accept().unwrap();
            let mut buf = FixedBuffer::<64>::new();
            let n = peer.recv_some(&mut buf).unwrap();
            assert_eq!(peer.send_some(&mut buf).unwrap(), n);
            peer.close().unwrap();
        });

        let mut client = StreamChannel::new();
        client.connect(&endpoint).unwrap();

        let mut buf = FixedBuffer::<64>::new();
        buffer_write(&mut buf, b"marco");
        client.send_some(&mut buf).unwrap();

        buf.reset();
        let n = client.recv_some(&mut buf).unwrap();
        let mut out = [0u8; 5];
        buf.read(&mut out[..n.min(5)]);
        assert_eq!(&out[..n], b"marco");

        // The peer closed: the next read is end of stream, not zero bytes.
        buf.reset();
        let err = client.recv_some(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EndOfFile);

        client.close().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn unix_listen_connect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echo.sock");
        let endpoint = UnixEndpoint::new(&path);
        let listener = StreamListener::listen(&endpoint).unwrap();

        let server = std::thread::spawn(move || {
            let mut peer = listener.accept().unwrap();
            let mut buf = FixedBuffer::<16>::new();
            let n = peer.recv_some(&mut buf).unwrap();
            assert_eq!(n, 2);
            peer.close().unwrap();
        });

        let mut client = StreamChannel::new();
        client.connect(&endpoint).unwrap();
        let mut buf = FixedBuffer::<16>::new();
        buffer_write(&mut buf, b"hi");
        client.send_some(&mut buf).unwrap();
        client.close().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn unix_listener_has_no_tcp_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nop.sock");
        let listener = StreamListener::listen(&UnixEndpoint::new(&path)).unwrap();
        let err = listener.local_endpoint().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AddressFamilyNotSupported);
    }

    #[test]
    fn connect_to_dead_port_fails() {
        // Bind then immediately close to get a port nobody listens on.
        let listener =
            StreamListener::listen(&TcpEndpoint::new(Ipv4Addr::LOCALHOST.into(), 0)).unwrap();
        let endpoint = listener.local_endpoint().unwrap();
        drop(listener);

        let mut channel = StreamChannel::new();
        let err = channel.connect(&endpoint).unwrap_err();
        assert_ne!(err.kind(), ErrorKind::Cancelled);
        assert!(!channel.is_open());
    }
}
