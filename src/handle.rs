//! Scoped ownership of a native OS resource.
//!
//! [`UniqueHandle`] owns exactly one descriptor (a file descriptor on Unix,
//! a `HANDLE` on Windows) and guarantees it is closed exactly once: either
//! explicitly through [`close`](UniqueHandle::close), or on drop, where any
//! close error is swallowed. The wrapper is move-only; moving transfers
//! ownership and leaves the source empty.

use crate::error::{Error, ErrorKind, Result};

/// The raw descriptor type owned by a [`UniqueHandle`].
#[cfg(unix)]
pub type RawHandle = std::os::unix::io::RawFd;

/// The raw descriptor type owned by a [`UniqueHandle`].
#[cfg(windows)]
pub type RawHandle = isize;

#[cfg(unix)]
const EMPTY: RawHandle = -1;

#[cfg(windows)]
const EMPTY: RawHandle = -1; // INVALID_HANDLE_VALUE

/// Exclusive owner of one OS descriptor.
#[derive(Debug)]
pub struct UniqueHandle {
    raw: RawHandle,
}

impl UniqueHandle {
    /// Creates an empty handle that owns nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self { raw: EMPTY }
    }

    /// Takes ownership of `raw`.
    #[must_use]
    pub const fn new(raw: RawHandle) -> Self {
        Self { raw }
    }

    /// Returns true if this handle owns a descriptor.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.raw != EMPTY
    }

    /// Returns the owned descriptor without giving up ownership.
    ///
    /// # Panics
    ///
    /// Panics if the handle is empty.
    #[must_use]
    pub fn get(&self) -> RawHandle {
        assert!(self.is_open(), "UniqueHandle::get on an empty handle");
        self.raw
    }

    /// Replaces the owned descriptor, closing the previous one if any.
    ///
    /// The close error of the replaced descriptor is dropped, as on drop.
    pub fn assign(&mut self, raw: RawHandle) {
        if self.is_open() {
            let _ = close_raw(self.raw);
        }
        self.raw = raw;
    }

    /// Surrenders ownership of the descriptor, leaving the handle empty.
    ///
    /// # Panics
    ///
    /// Panics if the handle is empty.
    #[must_use]
    pub fn release(&mut self) -> RawHandle {
        assert!(self.is_open(), "UniqueHandle::release on an empty handle");
        std::mem::replace(&mut self.raw, EMPTY)
    }

    /// Closes the descriptor and empties the handle.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ChannelNotOpen`] if the handle is already
    /// closed, or the OS close error.
    pub fn close(&mut self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::new(ErrorKind::ChannelNotOpen));
        }
        let raw = std::mem::replace(&mut self.raw, EMPTY);
        close_raw(raw)
    }
}

impl Default for UniqueHandle {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for UniqueHandle {
    fn drop(&mut self) {
        if self.is_open() {
            let _ = close_raw(self.raw);
        }
    }
}

#[cfg(unix)]
fn close_raw(raw: RawHandle) -> Result<()> {
    // SAFETY: `raw` came from the OS through this wrapper and is closed at
    // most once; ownership was cleared by the caller before this call.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::close(raw) };
    if rc == 0 {
        Ok(())
    } else {
        Err(Error::from_os(std::io::Error::last_os_error()))
    }
}

#[cfg(windows)]
fn close_raw(raw: RawHandle) -> Result<()> {
    use windows_sys::Win32::Foundation::CloseHandle;
    // SAFETY: same single-ownership argument as the Unix path.
    #[allow(unsafe_code)]
    let rc = unsafe { CloseHandle(raw as _) };
    if rc != 0 {
        Ok(())
    } else {
        Err(Error::from_os(std::io::Error::last_os_error()))
    }
}
