//! In-memory direct-access channel.

use crate::buffer::Buffer;
use crate::error::{Error, ErrorKind, Result};

/// A direct-access channel over an in-memory region.
///
/// It follows the same open/closed state machine and positioned read/write
/// contract as [`DirectFileChannel`], but owns a byte region instead of an
/// OS handle and never touches the reactor. Reads past the end of the
/// region surface `EndOfFile`; writes stay within the region and report a
/// partial transfer when they hit its end.
///
/// [`DirectFileChannel`]: super::DirectFileChannel
#[derive(Debug, Default)]
pub struct MemChannel {
    region: Option<Vec<u8>>,
}

impl MemChannel {
    /// Creates a closed channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the channel is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.region.is_some()
    }

    /// Opens the channel over `region`.
    pub fn open(&mut self, region: Vec<u8>) -> Result<()> {
        if self.is_open() {
            return Err(Error::new(ErrorKind::ChannelAlreadyOpen));
        }
        self.region = Some(region);
        Ok(())
    }

    /// Closes the channel, returning the region.
    pub fn close(&mut self) -> Result<Vec<u8>> {
        self.region
            .take()
            .ok_or_else(|| Error::new(ErrorKind::ChannelNotOpen))
    }

    fn region(&self) -> Result<&Vec<u8>> {
        self.region
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::ChannelNotOpen))
    }

    /// Reads some bytes at `offset` into `buf`.
    pub fn read_some_at<B: Buffer + ?Sized>(&self, offset: u64, buf: &mut B) -> Result<usize> {
        let region = self.region()?;
        let n = {
            let mut ranges = buf.writable_ranges();
            let Some(range) = ranges.first_mut().filter(|r| !r.is_empty()) else {
                return Ok(0);
            };
            super::check_span(offset, range.len())?;
            let Ok(start) = usize::try_from(offset) else {
                return Err(Error::new(ErrorKind::EndOfFile));
            };
            if start >= region.len() {
                return Err(Error::new(ErrorKind::EndOfFile));
            }
            let n = range.len().min(region.len() - start);
            range[..n].copy_from_slice(&region[start..start + n]);
            n
        };
        buf.commit(n);
        Ok(n)
    }

    /// Writes some readable bytes from `buf` at `offset`.
    pub fn write_some_at<B: Buffer + ?Sized>(&mut self, offset: u64, buf: &mut B) -> Result<usize> {
        if !self.is_open() {
            return Err(Error::new(ErrorKind::ChannelNotOpen));
        }
        let n = {
            let region = self.region.as_mut().expect("checked above");
            let ranges = buf.readable_ranges();
            let Some(range) = ranges.first().filter(|r| !r.is_empty()) else {
                return Err(Error::new(ErrorKind::NoDataInBuffer));
            };
            super::check_span(offset, range.len())?;
            let Ok(start) = usize::try_from(offset) else {
                return Err(Error::new(ErrorKind::ValueTooLarge));
            };
            if start >= region.len() {
                return Ok(0);
            }
            let n = range.len().min(region.len() - start);
            region[start..start + n].copy_from_slice(&range[..n]);
            n
        };
        buf.discard(n);
        Ok(n)
    }
}
