//! Dynamically-sized segmented buffer.

use super::{Buffer, ReadableRanges, WritableRanges};
use std::collections::VecDeque;

/// A buffer backed by a chain of equally-sized extents.
///
/// Writing past the end of the current extent allocates the next one, so the
/// buffer never becomes exhausted the way a [`FixedBuffer`] does. Once the
/// leading extent has been fully discarded it is released. Extent boundaries
/// are invisible to callers except that the range methods may return more
/// than one span.
///
/// [`FixedBuffer`]: super::FixedBuffer
#[derive(Debug)]
pub struct DynamicBuffer {
    extent_size: usize,
    extents: VecDeque<Box<[u8]>>,
    /// Read offset into the front extent.
    read: usize,
    /// Write offset into the back extent; all earlier extents are full.
    write: usize,
}

/// Default extent size, one typical page.
const DEFAULT_EXTENT_SIZE: usize = 4096;

impl DynamicBuffer {
    /// Creates an empty buffer with the default extent size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_extent_size(DEFAULT_EXTENT_SIZE)
    }

    /// Creates an empty buffer whose extents hold `extent_size` bytes each.
    ///
    /// # Panics
    ///
    /// Panics if `extent_size` is zero.
    #[must_use]
    pub fn with_extent_size(extent_size: usize) -> Self {
        assert!(extent_size > 0, "extent size must be non-zero");
        Self {
            extent_size,
            extents: VecDeque::new(),
            read: 0,
            write: 0,
        }
    }

    /// The configured extent size.
    #[must_use]
    pub const fn extent_size(&self) -> usize {
        self.extent_size
    }

    /// Number of extents currently allocated.
    #[must_use]
    pub fn extent_count(&self) -> usize {
        self.extents.len()
    }

    /// Copies all of `data` into the buffer, allocating extents as needed.
    pub fn write(&mut self, data: &[u8]) -> usize {
        super::buffer_write(self, data)
    }

    /// Copies readable data into `out`, releasing exhausted extents.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        super::buffer_read(self, out)
    }
}

impl Default for DynamicBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer for DynamicBuffer {
    fn readable_ranges(&self) -> ReadableRanges<'_> {
        let mut ranges = ReadableRanges::new();
        let last = self.extents.len().saturating_sub(1);
        for (i, extent) in self.extents.iter().enumerate() {
            let start = if i == 0 { self.read } else { 0 };
            let end = if i == last {
                self.write
            } else {
                self.extent_size
            };
            if start < end {
                ranges.push(&extent[start..end]);
            }
        }
        ranges
    }

    fn writable_ranges(&mut self) -> WritableRanges<'_> {
        if self.extents.is_empty() || self.write == self.extent_size {
            self.extents
                .push_back(vec![0; self.extent_size].into_boxed_slice());
            self.write = 0;
        }
        let write = self.write;
        let mut ranges = WritableRanges::new();
        let back = self
            .extents
            .back_mut()
            .expect("extent allocated above");
        ranges.push(&mut back[write..]);
        ranges
    }

    fn commit(&mut self, n: usize) -> usize {
        if self.extents.is_empty() {
            return 0;
        }
        let n = n.min(self.extent_size - self.write);
        self.write += n;
        n
    }

    fn discard(&mut self, n: usize) -> usize {
        let mut remaining = n;
        while remaining > 0 {
            if self.extents.is_empty() {
                break;
            }
            let last = self.extents.len() == 1;
            let end = if last { self.write } else { self.extent_size };
            let avail = end.saturating_sub(self.read);
            if avail == 0 {
                if last {
                    break;
                }
                self.extents.pop_front();
                self.read = 0;
                continue;
            }
            let take = avail.min(remaining);
            self.read += take;
            remaining -= take;
            if self.read == self.extent_size {
                self.extents.pop_front();
                self.read = 0;
                if self.extents.is_empty() {
                    self.write = 0;
                }
            }
        }
        n - remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &[u8] = b"this is a long test string that will fill several extents";

    #[test]
    fn single_write_fills_several_extents() {
        let mut buf = DynamicBuffer::with_extent_size(3);
        assert_eq!(buf.write(INPUT), INPUT.len());
        assert!(buf.extent_count() >= INPUT.len() / 3);
        assert_eq!(buf.readable_len(), INPUT.len());
    }

    #[test]
    fn chunked_read_recovers_exact_contents() {
        let mut buf = DynamicBuffer::with_extent_size(3);
        assert_eq!(buf.write(INPUT), INPUT.len());

        let mut output = Vec::new();
        loop {
            let n = {
                let ranges = buf.readable_ranges();
                let Some(first) = ranges.first().copied() else {
                    break;
                };
                if first.is_empty() {
                    break;
                }
                let n = first.len().min(3);
                output.extend_from_slice(&first[..n]);
                n
            };
            buf.discard(n);
        }
        assert_eq!(output, INPUT);

        let mut tail = [0u8; 3];
        assert_eq!(buf.read(&mut tail), 0);
    }

    #[test]
    fn drain_then_refill() {
        let mut buf = DynamicBuffer::with_extent_size(3);
        let mut out = vec![0u8; INPUT.len()];

        for _ in 0..2 {
            assert_eq!(buf.write(INPUT), INPUT.len());
            assert_eq!(buf.read(&mut out), INPUT.len());
            assert_eq!(out, INPUT);
            assert_eq!(buf.read(&mut out), 0);
        }
    }

    #[test]
    fn exhausted_leading_extents_are_released() {
        let mut buf = DynamicBuffer::with_extent_size(4);
        buf.write(&[1u8; 16]);
        let before = buf.extent_count();
        buf.discard(8);
        assert!(buf.extent_count() < before);
    }

    #[test]
    fn discard_clamps_to_readable() {
        let mut buf = DynamicBuffer::with_extent_size(4);
        buf.write(b"abcdef");
        assert_eq!(buf.discard(100), 6);
        assert_eq!(buf.discard(1), 0);
    }

    #[test]
    fn commit_clamps_to_current_extent() {
        let mut buf = DynamicBuffer::with_extent_size(4);
        // No extents yet: nothing to commit into.
        assert_eq!(buf.commit(4), 0);
        let available = buf.writable_ranges()[0].len();
        assert_eq!(available, 4);
        assert_eq!(buf.commit(100), 4);
    }

    #[test]
    fn ranges_may_span_extents() {
        let mut buf = DynamicBuffer::with_extent_size(2);
        buf.write(b"abcd");
        let ranges = buf.readable_ranges();
        assert!(ranges.len() >= 2);
        let joined: Vec<u8> = ranges.iter().flat_map(|r| r.iter().copied()).collect();
        assert_eq!(joined, b"abcd");
    }
}
