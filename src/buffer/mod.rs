//! Buffer contract consumed by I/O operations.
//!
//! A buffer is a producer/consumer window over contiguous byte storage with
//! two cursors: everything before the read cursor has been consumed,
//! everything between the read and write cursors is readable, and everything
//! after the write cursor is writable.
//!
//! ```text
//!   consumed        readable          writable
//! ├──────────┤████████████████████┤░░░░░░░░░░░░░░│
//!            read               write          end
//! ```
//!
//! Read operations fill the buffer: they copy into a span from
//! [`writable_ranges`](Buffer::writable_ranges) and then
//! [`commit`](Buffer::commit) what was produced. Write operations drain it:
//! they copy out of a span from [`readable_ranges`](Buffer::readable_ranges)
//! and then [`discard`](Buffer::discard) what was consumed.
//!
//! Two shapes are provided: [`FixedBuffer`], a single fixed extent that
//! becomes unusable once the write cursor reaches the end (until `reset`),
//! and [`DynamicBuffer`], a segmented buffer that allocates equally-sized
//! extents on demand and releases fully-consumed ones.
//!
//! Spans returned by the range methods are valid until the next mutating
//! call; the borrow checker enforces this.

mod dynamic;
mod fixed;

pub use dynamic::DynamicBuffer;
pub use fixed::FixedBuffer;

use smallvec::SmallVec;

/// Bounded sequence of readable spans.
pub type ReadableRanges<'a> = SmallVec<[&'a [u8]; 2]>;

/// Bounded sequence of writable spans.
pub type WritableRanges<'a> = SmallVec<[&'a mut [u8]; 2]>;

/// A producer/consumer byte window.
pub trait Buffer {
    /// Returns the contiguous span(s) of data written but not yet discarded.
    fn readable_ranges(&self) -> ReadableRanges<'_>;

    /// Returns the contiguous span(s) available for writing.
    fn writable_ranges(&mut self) -> WritableRanges<'_>;

    /// Marks up to `n` bytes at the front of the writable window as written.
    ///
    /// Returns the number of bytes actually committed, clamped to the
    /// available write space.
    fn commit(&mut self, n: usize) -> usize;

    /// Removes up to `n` bytes from the front of the readable window.
    ///
    /// Returns the number of bytes actually discarded, clamped to the
    /// readable size.
    fn discard(&mut self, n: usize) -> usize;

    /// Total bytes currently readable.
    fn readable_len(&self) -> usize {
        self.readable_ranges().iter().map(|r| r.len()).sum()
    }
}

/// Copies `data` into `buf`, committing as it goes. Returns bytes written,
/// which is less than `data.len()` when the buffer runs out of space.
pub fn buffer_write<B: Buffer + ?Sized>(buf: &mut B, data: &[u8]) -> usize {
    let mut written = 0;
    while written < data.len() {
        let mut copied = 0;
        for range in buf.writable_ranges() {
            let n = range.len().min(data.len() - written - copied);
            if n == 0 {
                break;
            }
            range[..n].copy_from_slice(&data[written + copied..written + copied + n]);
            copied += n;
        }
        if copied == 0 {
            break;
        }
        buf.commit(copied);
        written += copied;
    }
    written
}

/// Copies readable data from `buf` into `out`, discarding as it goes.
/// Returns bytes read, which is less than `out.len()` when the buffer has
/// no more data.
pub fn buffer_read<B: Buffer + ?Sized>(buf: &mut B, out: &mut [u8]) -> usize {
    let mut read = 0;
    while read < out.len() {
        let mut copied = 0;
        for range in buf.readable_ranges() {
            let n = range.len().min(out.len() - read - copied);
            if n == 0 {
                break;
            }
            out[read + copied..read + copied + n].copy_from_slice(&range[..n]);
            copied += n;
        }
        if copied == 0 {
            break;
        }
        buf.discard(copied);
        read += copied;
    }
    read
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_round_trip_through_fixed() {
        let mut buf = FixedBuffer::<16>::new();
        assert_eq!(buffer_write(&mut buf, b"hello"), 5);
        let mut out = [0u8; 5];
        assert_eq!(buffer_read(&mut buf, &mut out), 5);
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn helpers_round_trip_through_dynamic() {
        let mut buf = DynamicBuffer::with_extent_size(4);
        assert_eq!(buffer_write(&mut buf, b"hello world"), 11);
        let mut out = [0u8; 11];
        assert_eq!(buffer_read(&mut buf, &mut out), 11);
        assert_eq!(&out, b"hello world");
    }

    #[test]
    fn write_clamps_to_capacity() {
        let mut buf = FixedBuffer::<4>::new();
        assert_eq!(buffer_write(&mut buf, b"abcdef"), 4);
    }
}
