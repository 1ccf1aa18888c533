//! Thin wrappers over the fd-level syscalls the readiness backend retries.
//!
//! Each wrapper converts the `-1`/`errno` convention into `io::Result` and
//! keeps the unsafe confined to this module. Socket creation and address
//! handling live with `socket2`; these are only the calls issued against an
//! already-owned descriptor.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

/// Platform representation of validated open flags: open(2) flag bits.
pub type OpenSpec = libc::c_int;

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn cvt_size(ret: libc::ssize_t) -> io::Result<usize> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        #[allow(clippy::cast_sign_loss)]
        Ok(ret as usize)
    }
}

/// Returns true for the errno meaning "retry after readiness".
pub fn is_would_block(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EAGAIN | libc::EWOULDBLOCK))
}

/// Sets `O_NONBLOCK` on the descriptor.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own; no memory is passed.
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL, 0) })?;
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    Ok(())
}

/// Opens `path` with the given open(2) flags and a 0o666 create mode.
pub fn open(path: &Path, flags: libc::c_int) -> io::Result<RawFd> {
    let path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::ENOENT))?;
    // SAFETY: the path pointer is valid for the duration of the call.
    cvt(unsafe { libc::open(path.as_ptr(), flags, 0o666 as libc::c_int) })
}

/// close(2).
pub fn close(fd: RawFd) -> io::Result<()> {
    // SAFETY: the caller owns the descriptor and closes it exactly once.
    cvt(unsafe { libc::close(fd) }).map(|_| ())
}

/// pread(2).
pub fn pread(fd: RawFd, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    #[allow(clippy::cast_possible_wrap)]
    // SAFETY: the buffer pointer and length describe a live mutable slice.
    cvt_size(unsafe { libc::pread(fd, buf.as_mut_ptr().cast(), buf.len(), offset as libc::off_t) })
}

/// write(2).
pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    // SAFETY: the buffer pointer and length describe a live slice.
    cvt_size(unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) })
}

/// pwrite(2).
pub fn pwrite(fd: RawFd, buf: &[u8], offset: u64) -> io::Result<usize> {
    #[allow(clippy::cast_possible_wrap)]
    // SAFETY: as for `write`.
    cvt_size(unsafe { libc::pwrite(fd, buf.as_ptr().cast(), buf.len(), offset as libc::off_t) })
}

/// recv(2) with no flags.
pub fn recv(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: the buffer pointer and length describe a live mutable slice.
    cvt_size(unsafe { libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), 0) })
}

/// send(2) with `MSG_NOSIGNAL` so a dead peer surfaces as `EPIPE` instead of
/// killing the process.
pub fn send(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    // SAFETY: as for `write`.
    cvt_size(unsafe { libc::send(fd, buf.as_ptr().cast(), buf.len(), libc::MSG_NOSIGNAL) })
}

/// accept(2), discarding the peer address.
pub fn accept(fd: RawFd) -> io::Result<RawFd> {
    // SAFETY: null address output is allowed by accept(2).
    cvt(unsafe { libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut()) })
}

/// connect(2) against a prepared socket address.
pub fn connect(fd: RawFd, addr: &socket2::SockAddr) -> io::Result<()> {
    // SAFETY: SockAddr guarantees a valid sockaddr pointer and length.
    cvt(unsafe { libc::connect(fd, addr.as_ptr().cast(), addr.len()) }).map(|_| ())
}

/// Reads and clears the pending socket error (`SO_ERROR`).
pub fn take_socket_error(fd: RawFd) -> io::Result<()> {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: the out-parameter points at a live c_int of the stated size.
    cvt(unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            std::ptr::addr_of_mut!(err).cast(),
            &mut len,
        )
    })?;
    if err == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(err))
    }
}

/// The local address the socket is bound to.
pub fn local_addr(fd: RawFd) -> io::Result<socket2::SockAddr> {
    // SAFETY: try_init hands us a zeroed sockaddr_storage and its length;
    // getsockname fills both in.
    let ((), addr) = unsafe {
        socket2::SockAddr::try_init(|storage, len| {
            cvt(libc::getsockname(fd, storage.cast(), len)).map(|_| ())
        })
    }?;
    Ok(addr)
}

/// Direction of a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Wait until the descriptor is readable.
    Read,
    /// Wait until the descriptor is writable.
    Write,
}

/// Blocks the calling thread with poll(2) until `fd` is ready in the given
/// direction. Used by the blocking socket variants; async code goes through
/// the reactor instead.
pub fn wait_ready(fd: RawFd, direction: Direction) -> io::Result<()> {
    let events = match direction {
        Direction::Read => libc::POLLIN,
        Direction::Write => libc::POLLOUT,
    };
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    loop {
        // SAFETY: one pollfd entry, infinite timeout.
        let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn pread_at_offset() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"0123456789").unwrap();

        let mut buf = [0u8; 4];
        let n = pread(file.as_raw_fd(), &mut buf, 3).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf, b"3456");
    }

    #[test]
    fn pread_past_end_returns_zero() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"abc").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(pread(file.as_raw_fd(), &mut buf, 100).unwrap(), 0);
    }

    #[test]
    fn pwrite_then_pread_round_trip() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        assert_eq!(pwrite(fd, b"hello", 2).unwrap(), 5);

        let mut buf = [0u8; 5];
        assert_eq!(pread(fd, &mut buf, 2).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn nonblocking_recv_would_block() {
        let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
        set_nonblocking(a.as_raw_fd()).unwrap();
        let mut buf = [0u8; 8];
        let err = recv(a.as_raw_fd(), &mut buf).unwrap_err();
        assert!(is_would_block(&err));
    }

    #[test]
    fn open_missing_file_is_enoent() {
        let err = open(Path::new("/definitely/not/here"), libc::O_RDONLY).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn wait_ready_on_readable_pipe() {
        let (mut a, b) = std::os::unix::net::UnixStream::pair().unwrap();
        a.write_all(b"x").unwrap();
        wait_ready(b.as_raw_fd(), Direction::Read).unwrap();
    }
}
