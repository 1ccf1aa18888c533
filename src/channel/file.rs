//! File channels.
//!
//! Three façades over the same implementation object:
//!
//! - [`InputFileChannel`] — sequential reads behind an internal cursor.
//! - [`OutputFileChannel`] — sequential writes behind a cursor, or at the
//!   end of file in append mode.
//! - [`DirectFileChannel`] — positioned reads and writes with explicit
//!   offsets and no cursor.
//!
//! Reads that hit the end of the file surface `EndOfFile`, never a
//! zero-byte success.

use super::{FileFlags, FileIo};
use crate::buffer::Buffer;
use crate::error::{Error, ErrorKind, Result};
use std::path::Path;

/// Sequential file reader.
#[derive(Debug, Default)]
pub struct InputFileChannel {
    io: FileIo,
    position: u64,
}

impl InputFileChannel {
    /// Creates a closed channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the channel is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.io.is_open()
    }

    fn input_flags(flags: FileFlags) -> Result<FileFlags> {
        if flags.intersects(FileFlags::WRITE) {
            return Err(Error::new(ErrorKind::InvalidFileFlags));
        }
        Ok(flags | FileFlags::READ)
    }

    /// Opens `path` for reading.
    pub fn open(&mut self, path: impl AsRef<Path>, flags: FileFlags) -> Result<()> {
        self.io.open(path.as_ref(), Self::input_flags(flags)?)?;
        self.position = 0;
        Ok(())
    }

    /// Opens `path` for reading without blocking the caller.
    pub async fn async_open(&mut self, path: impl AsRef<Path>, flags: FileFlags) -> Result<()> {
        self.io
            .async_open(path.as_ref(), Self::input_flags(flags)?)
            .await?;
        self.position = 0;
        Ok(())
    }

    /// Reads some bytes at the cursor into `buf`, advancing the cursor.
    pub fn read_some<B: Buffer + ?Sized>(&mut self, buf: &mut B) -> Result<usize> {
        let n = self.io.read_some_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }

    /// Asynchronous [`read_some`](Self::read_some).
    pub async fn async_read_some<B: Buffer + ?Sized>(&mut self, buf: &mut B) -> Result<usize> {
        let n = self.io.async_read_some_at(self.position, buf).await?;
        self.position += n as u64;
        Ok(n)
    }

    /// Closes the channel.
    pub fn close(&mut self) -> Result<()> {
        self.io.close()
    }

    /// Closes the channel without blocking the caller.
    pub async fn async_close(&mut self) -> Result<()> {
        self.io.async_close().await
    }
}

/// Sequential file writer.
#[derive(Debug, Default)]
pub struct OutputFileChannel {
    io: FileIo,
    position: u64,
    append: bool,
}

impl OutputFileChannel {
    /// Creates a closed channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the channel is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.io.is_open()
    }

    fn output_flags(flags: FileFlags) -> Result<FileFlags> {
        if flags.intersects(FileFlags::READ) {
            return Err(Error::new(ErrorKind::InvalidFileFlags));
        }
        Ok(flags | FileFlags::WRITE)
    }

    /// Opens `path` for writing.
    pub fn open(&mut self, path: impl AsRef<Path>, flags: FileFlags) -> Result<()> {
        self.io.open(path.as_ref(), Self::output_flags(flags)?)?;
        self.position = 0;
        self.append = flags.contains(FileFlags::APPEND);
        Ok(())
    }

    /// Opens `path` for writing without blocking the caller.
    pub async fn async_open(&mut self, path: impl AsRef<Path>, flags: FileFlags) -> Result<()> {
        self.io
            .async_open(path.as_ref(), Self::output_flags(flags)?)
            .await?;
        self.position = 0;
        self.append = flags.contains(FileFlags::APPEND);
        Ok(())
    }

    /// Writes some readable bytes from `buf`, discarding what was written.
    ///
    /// In append mode the bytes land at the end of the file; otherwise they
    /// land at the cursor, which then advances.
    pub fn write_some<B: Buffer + ?Sized>(&mut self, buf: &mut B) -> Result<usize> {
        let offset = if self.append {
            None
        } else {
            Some(self.position)
        };
        let n = self.io.write_some_at(offset, buf)?;
        if !self.append {
            self.position += n as u64;
        }
        Ok(n)
    }

    /// Asynchronous [`write_some`](Self::write_some).
    pub async fn async_write_some<B: Buffer + ?Sized>(&mut self, buf: &mut B) -> Result<usize> {
        let offset = if self.append {
            None
        } else {
            Some(self.position)
        };
        let n = self.io.async_write_some_at(offset, buf).await?;
        if !self.append {
            self.position += n as u64;
        }
        Ok(n)
    }

    /// Closes the channel.
    pub fn close(&mut self) -> Result<()> {
        self.io.close()
    }

    /// Closes the channel without blocking the caller.
    pub async fn async_close(&mut self) -> Result<()> {
        self.io.async_close().await
    }
}

/// Direct-access file channel: positioned transfers, no cursor.
#[derive(Debug, Default)]
pub struct DirectFileChannel {
    io: FileIo,
}

impl DirectFileChannel {
    /// Creates a closed channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the channel is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.io.is_open()
    }

    /// Opens `path` with the given flags.
    pub fn open(&mut self, path: impl AsRef<Path>, flags: FileFlags) -> Result<()> {
        self.io.open(path.as_ref(), flags)
    }

    /// Opens `path` without blocking the caller.
    pub async fn async_open(&mut self, path: impl AsRef<Path>, flags: FileFlags) -> Result<()> {
        self.io.async_open(path.as_ref(), flags).await
    }

    /// Reads some bytes at `offset` into `buf`.
    pub fn read_some_at<B: Buffer + ?Sized>(&self, offset: u64, buf: &mut B) -> Result<usize> {
        self.io.read_some_at(offset, buf)
    }

    /// Asynchronous [`read_some_at`](Self::read_some_at).
    pub async fn async_read_some_at<B: Buffer + ?Sized>(
        &self,
        offset: u64,
        buf: &mut B,
    ) -> Result<usize> {
        self.io.async_read_some_at(offset, buf).await
    }

    /// Writes some readable bytes from `buf` at `offset`.
    pub fn write_some_at<B: Buffer + ?Sized>(&self, offset: u64, buf: &mut B) -> Result<usize> {
        self.io.write_some_at(Some(offset), buf)
    }

    /// Asynchronous [`write_some_at`](Self::write_some_at).
    pub async fn async_write_some_at<B: Buffer + ?Sized>(
        &self,
        offset: u64,
        buf: &mut B,
    ) -> Result<usize> {
        self.io.async_write_some_at(Some(offset), buf).await
    }

    /// Closes the channel.
    pub fn close(&mut self) -> Result<()> {
        self.io.close()
    }

    /// Closes the channel without blocking the caller.
    pub async fn async_close(&mut self) -> Result<()> {
        self.io.async_close().await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::buffer::{buffer_write, FixedBuffer};

    fn fixture(contents: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn sequential_read_advances() {
        let (_dir, path) = fixture(b"abcdef");
        let mut channel = InputFileChannel::new();
        channel.open(&path, FileFlags::NONE).unwrap();

        let mut buf = FixedBuffer::<3>::new();
        assert_eq!(channel.read_some(&mut buf).unwrap(), 3);
        let mut out = [0u8; 3];
        buf.read(&mut out);
        assert_eq!(&out, b"abc");

        buf.reset();
        assert_eq!(channel.read_some(&mut buf).unwrap(), 3);
        buf.read(&mut out);
        assert_eq!(&out, b"def");

        buf.reset();
        let err = channel.read_some(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EndOfFile);
        channel.close().unwrap();
    }

    #[test]
    fn input_rejects_write_flag_without_creating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.txt");
        let mut channel = InputFileChannel::new();
        let err = channel.open(&path, FileFlags::WRITE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFileFlags);
        assert!(!path.exists());
        assert!(!channel.is_open());
    }

    #[test]
    fn operations_on_closed_channel() {
        let mut channel = InputFileChannel::new();
        let mut buf = FixedBuffer::<4>::new();
        assert_eq!(
            channel.read_some(&mut buf).unwrap_err().kind(),
            ErrorKind::ChannelNotOpen
        );
        assert_eq!(channel.close().unwrap_err().kind(), ErrorKind::ChannelNotOpen);
    }

    #[test]
    fn open_twice_is_already_open() {
        let (_dir, path) = fixture(b"x");
        let mut channel = InputFileChannel::new();
        channel.open(&path, FileFlags::NONE).unwrap();
        let err = channel.open(&path, FileFlags::NONE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelAlreadyOpen);
        channel.close().unwrap();
    }

    #[test]
    fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut writer = OutputFileChannel::new();
        writer
            .open(&path, FileFlags::CREATE_NEW | FileFlags::OPEN_EXISTING)
            .unwrap();
        let mut buf = FixedBuffer::<16>::new();
        buffer_write(&mut buf, b"hello world");
        assert_eq!(writer.write_some(&mut buf).unwrap(), 11);
        writer.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn output_rejects_read_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.txt");
        let mut channel = OutputFileChannel::new();
        let err = channel
            .open(&path, FileFlags::READ | FileFlags::OPEN_EXISTING)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFileFlags);
    }

    #[test]
    fn write_with_empty_buffer_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut channel = OutputFileChannel::new();
        channel
            .open(&path, FileFlags::CREATE_NEW | FileFlags::OPEN_EXISTING)
            .unwrap();

        let mut buf = FixedBuffer::<8>::new();
        let err = channel.write_some(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoDataInBuffer);
        channel.close().unwrap();
    }

    #[test]
    fn append_mode_lands_at_end() {
        let (_dir, path) = fixture(b"head:");
        let mut channel = OutputFileChannel::new();
        channel
            .open(
                &path,
                FileFlags::APPEND | FileFlags::OPEN_EXISTING,
            )
            .unwrap();

        let mut buf = FixedBuffer::<8>::new();
        buffer_write(&mut buf, b"tail");
        channel.write_some(&mut buf).unwrap();
        channel.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"head:tail");
    }

    #[test]
    fn direct_access_reads_at_offset() {
        let (_dir, path) = fixture(b"0123456789");
        let mut channel = DirectFileChannel::new();
        channel.open(&path, FileFlags::READ).unwrap();

        let mut buf = FixedBuffer::<5>::new();
        assert_eq!(channel.read_some_at(3, &mut buf).unwrap(), 5);
        let mut out = [0u8; 5];
        buf.read(&mut out);
        assert_eq!(&out, b"34567");

        // No cursor: the same offset reads the same bytes again.
        buf.reset();
        assert_eq!(channel.read_some_at(3, &mut buf).unwrap(), 5);
        channel.close().unwrap();
    }

    #[test]
    fn direct_access_read_past_end_is_eof() {
        let (_dir, path) = fixture(b"short");
        let mut channel = DirectFileChannel::new();
        channel.open(&path, FileFlags::READ).unwrap();

        let mut buf = FixedBuffer::<4>::new();
        let err = channel.read_some_at(50, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EndOfFile);
        channel.close().unwrap();
    }

    #[test]
    fn direct_access_offset_overflow() {
        let (_dir, path) = fixture(b"x");
        let mut channel = DirectFileChannel::new();
        channel.open(&path, FileFlags::READ).unwrap();

        let mut buf = FixedBuffer::<4>::new();
        let err = channel.read_some_at(u64::MAX, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueTooLarge);
        channel.close().unwrap();
    }

    #[test]
    fn reopen_after_close() {
        let (_dir, path) = fixture(b"abc");
        let mut channel = InputFileChannel::new();
        channel.open(&path, FileFlags::NONE).unwrap();
        channel.close().unwrap();
        channel.open(&path, FileFlags::NONE).unwrap();
        assert!(channel.is_open());
        channel.close().unwrap();
    }

    #[test]
    fn nul_in_path_is_not_found() {
        let mut channel = InputFileChannel::new();
        let err = channel.open("bad\0path", FileFlags::NONE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
