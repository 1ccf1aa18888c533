//! I/O channels: typed façades over native handles.
//!
//! A channel owns a [`UniqueHandle`] and a reactor handle, and exposes
//! blocking and asynchronous operations built on the reactor's operation
//! futures. Every channel follows the same state machine:
//!
//! ```text
//! Closed ──open/listen/connect/accept──▶ Open ──close──▶ Closed
//! ```
//!
//! All I/O methods on a closed channel return `ChannelNotOpen`; opening an
//! open channel returns `ChannelAlreadyOpen`; dropping a channel closes it
//! and swallows the error. Channels are not internally synchronized:
//! concurrent operations from distinct tasks on one channel are outside the
//! contract (single-owner rule).
//!
//! [`UniqueHandle`]: crate::handle::UniqueHandle

mod file;
mod flags;
mod mem;
mod socket;

pub use file::{DirectFileChannel, InputFileChannel, OutputFileChannel};
pub use flags::FileFlags;
pub use mem::MemChannel;
pub use socket::{StreamChannel, StreamListener};

use crate::buffer::Buffer;
use crate::error::{Error, ErrorKind, Result};
use crate::handle::{RawHandle, UniqueHandle};
use crate::reactor::{os, ReactorHandle};
use std::path::Path;

/// Rejects paths the OS cannot represent before any syscall is attempted.
fn check_path(path: &Path) -> Result<()> {
    let has_nul = {
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStrExt;
            path.as_os_str().as_bytes().contains(&0)
        }
        #[cfg(windows)]
        {
            use std::os::windows::ffi::OsStrExt;
            path.as_os_str().encode_wide().any(|unit| unit == 0)
        }
    };
    if has_nul {
        Err(Error::new(ErrorKind::NotFound))
    } else {
        Ok(())
    }
}

/// Shared implementation object for file channels: holds the handle and the
/// reactor, and offers generic open/read/write. The channel types layer
/// their invariants (read-only, write-only, positioned) on top.
#[derive(Debug, Default)]
struct FileIo {
    handle: UniqueHandle,
    reactor: Option<ReactorHandle>,
}

impl FileIo {
    fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    fn reactor(&self) -> Result<&ReactorHandle> {
        self.reactor
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::ChannelNotOpen))
    }

    fn raw(&self) -> Result<RawHandle> {
        if self.handle.is_open() {
            Ok(self.handle.get())
        } else {
            Err(Error::new(ErrorKind::ChannelNotOpen))
        }
    }

    fn prepare_open(&self, path: &Path, flags: FileFlags) -> Result<os::OsOpenSpec> {
        if self.is_open() {
            return Err(Error::new(ErrorKind::ChannelAlreadyOpen));
        }
        let spec = flags::to_open_spec(flags).ok_or_else(|| Error::new(ErrorKind::InvalidFileFlags))?;
        check_path(path)?;
        Ok(spec)
    }

    fn adopt(&mut self, raw: RawHandle, reactor: ReactorHandle) {
        // On the completion backend every file handle is bound to the port;
        // the readiness backend never watches regular files.
        #[cfg(windows)]
        let _ = reactor.get().associate(raw);
        self.handle.assign(raw);
        self.reactor = Some(reactor);
    }

    fn open(&mut self, path: &Path, flags: FileFlags) -> Result<()> {
        let spec = self.prepare_open(path, flags)?;
        let reactor = ReactorHandle::acquire()?;
        let raw = os::open_sync(path, spec).map_err(Error::from_os)?;
        self.adopt(raw, reactor);
        Ok(())
    }

    async fn async_open(&mut self, path: &Path, flags: FileFlags) -> Result<()> {
        let spec = self.prepare_open(path, flags)?;
        let reactor = ReactorHandle::acquire()?;
        let raw = reactor.get().async_open(path, spec).await?;
        self.adopt(raw, reactor);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::new(ErrorKind::ChannelNotOpen));
        }
        let result = self.handle.close();
        self.reactor = None;
        result
    }

    async fn async_close(&mut self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::new(ErrorKind::ChannelNotOpen));
        }
        let raw = self.handle.release();
        let reactor = self.reactor.take().expect("open channel without reactor");
        reactor.get().async_close(raw).await
    }

    // === Positioned transfers against a caller-supplied buffer ===

    fn read_some_at<B: Buffer + ?Sized>(&self, offset: u64, buf: &mut B) -> Result<usize> {
        let raw = self.raw()?;
        let mut ranges = buf.writable_ranges();
        let Some(range) = ranges.first_mut().filter(|r| !r.is_empty()) else {
            return Ok(0);
        };
        check_span(offset, range.len())?;
        let n = os::read_at_sync(raw, range, offset).map_err(Error::from_os)?;
        drop(ranges);
        if n == 0 {
            return Err(Error::new(ErrorKind::EndOfFile));
        }
        buf.commit(n);
        Ok(n)
    }

    async fn async_read_some_at<B: Buffer + ?Sized>(
        &self,
        offset: u64,
        buf: &mut B,
    ) -> Result<usize> {
        let raw = self.raw()?;
        let want = buf
            .writable_ranges()
            .first()
            .map_or(0, |range| range.len());
        if want == 0 {
            return Ok(0);
        }
        check_span(offset, want)?;
        let data = self.reactor()?.get().async_read_at(raw, want, offset).await?;
        if data.is_empty() {
            return Err(Error::new(ErrorKind::EndOfFile));
        }
        let mut ranges = buf.writable_ranges();
        ranges[0][..data.len()].copy_from_slice(&data);
        drop(ranges);
        buf.commit(data.len());
        Ok(data.len())
    }

    fn write_some_at<B: Buffer + ?Sized>(
        &self,
        offset: Option<u64>,
        buf: &mut B,
    ) -> Result<usize> {
        let raw = self.raw()?;
        let ranges = buf.readable_ranges();
        let Some(range) = ranges.first().filter(|r| !r.is_empty()) else {
            return Err(Error::new(ErrorKind::NoDataInBuffer));
        };
        let n = match offset {
            Some(offset) => {
                check_span(offset, range.len())?;
                os::write_at_sync(raw, range, offset)
            }
            None => os::write_sync(raw, range),
        }
        .map_err(Error::from_os)?;
        drop(ranges);
        buf.discard(n);
        Ok(n)
    }

    async fn async_write_some_at<B: Buffer + ?Sized>(
        &self,
        offset: Option<u64>,
        buf: &mut B,
    ) -> Result<usize> {
        let raw = self.raw()?;
        let data = {
            let ranges = buf.readable_ranges();
            match ranges.first().filter(|r| !r.is_empty()) {
                Some(range) => range.to_vec(),
                None => return Err(Error::new(ErrorKind::NoDataInBuffer)),
            }
        };
        let reactor = self.reactor()?.get();
        let n = match offset {
            Some(offset) => {
                check_span(offset, data.len())?;
                reactor.async_write_at(raw, data, offset).await?
            }
            None => reactor.async_write(raw, data).await?,
        };
        buf.discard(n);
        Ok(n)
    }
}

/// Rejects transfers whose end position cannot be represented.
fn check_span(offset: u64, len: usize) -> Result<()> {
    offset
        .checked_add(len as u64)
        .map(|_| ())
        .ok_or_else(|| Error::new(ErrorKind::ValueTooLarge))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nul_path_is_rejected_before_any_syscall() {
        let path = Path::new("bad\0name");
        let err = check_path(path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn span_overflow_is_value_too_large() {
        let err = check_span(u64::MAX, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueTooLarge);
        assert!(check_span(u64::MAX - 2, 2).is_ok());
    }
}
