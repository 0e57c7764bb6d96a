//! Frame-aligned block cache between storage reads and the pull callback.
//!
//! Storage is read in capacity-sized blocks so a single pull never waits on
//! more than one bounded read. Only whole frames are ever exposed; a partial
//! trailing frame is handed back to storage (the reader is rewound) so the
//! next refill starts on a frame boundary.

use std::io::{self, Read, Seek, SeekFrom};

use crate::container::read_full;

/// Fixed-capacity byte buffer with a consume cursor.
///
/// Invariant: `read_pos <= filled_len <= capacity`, and `filled_len` is a
/// multiple of `frame_size`.
#[derive(Debug)]
pub struct StreamBuffer {
    data: Box<[u8]>,
    frame_size: usize,
    read_pos: usize,
    filled_len: usize,
}

impl StreamBuffer {
    /// Create a buffer holding up to `capacity` bytes of whole frames.
    ///
    /// The capacity is rounded down to a frame multiple, with a floor of one frame.
    pub fn new(capacity: usize, frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        let capacity = (capacity / frame_size).max(1) * frame_size;
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            frame_size,
            read_pos: 0,
            filled_len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn filled_len(&self) -> usize {
        self.filled_len
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Bytes buffered but not yet handed out.
    pub fn available(&self) -> usize {
        self.filled_len - self.read_pos
    }

    pub fn is_empty(&self) -> bool {
        self.read_pos == self.filled_len
    }

    /// Drop any buffered bytes.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.filled_len = 0;
    }

    /// Load the next block from `reader`.
    ///
    /// Reads at most `capacity` bytes and never more than `bytes_remaining`.
    /// Bytes past the last whole frame are excluded and the reader is rewound
    /// by that amount, so the reader ends up exactly `filled_len` bytes further
    /// along. Returns the new `filled_len`; 0 means storage has nothing more to
    /// give (or less than one frame).
    pub fn refill<R: Read + Seek>(&mut self, reader: &mut R, bytes_remaining: u64) -> io::Result<usize> {
        self.clear();

        let want = usize::try_from(bytes_remaining)
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        if want == 0 {
            return Ok(0);
        }

        let n = read_full(reader, &mut self.data[..want])?;
        let aligned = n - n % self.frame_size;
        let excess = n - aligned;
        if excess > 0 {
            reader.seek(SeekFrom::Current(-(excess as i64)))?;
        }

        self.filled_len = aligned;
        Ok(aligned)
    }

    /// Copy up to `dest.len()` buffered bytes into `dest`, advancing the cursor.
    pub fn copy_into(&mut self, dest: &mut [u8]) -> usize {
        let n = dest.len().min(self.available());
        dest[..n].copy_from_slice(&self.data[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out at most `chunk` bytes per `read` call.
    struct Trickle {
        inner: Cursor<Vec<u8>>,
        chunk: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk);
            self.inner.read(&mut buf[..n])
        }
    }

    impl Seek for Trickle {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    fn source(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn capacity_rounds_down_to_whole_frames() {
        assert_eq!(StreamBuffer::new(2048, 4).capacity(), 2048);
        assert_eq!(StreamBuffer::new(2047, 4).capacity(), 2044);
        assert_eq!(StreamBuffer::new(1, 4).capacity(), 4);
        assert_eq!(StreamBuffer::new(10, 0).frame_size(), 1);
    }

    #[test]
    fn refill_caps_at_bytes_remaining() {
        let mut reader = Cursor::new(source(100));
        let mut buf = StreamBuffer::new(64, 4);
        assert_eq!(buf.refill(&mut reader, 20).unwrap(), 20);
        assert_eq!(reader.position(), 20);
        assert_eq!(buf.refill(&mut reader, 0).unwrap(), 0);
        assert_eq!(reader.position(), 20);
    }

    #[test]
    fn partial_frame_is_rewound() {
        let mut reader = Cursor::new(source(100));
        let mut buf = StreamBuffer::new(64, 4);
        let filled = buf.refill(&mut reader, 10).unwrap();
        assert_eq!(filled, 8);
        assert_eq!(filled % 4, 0);
        assert_eq!(reader.position(), 8);
    }

    #[test]
    fn trailing_partial_frame_at_eof_yields_zero() {
        let mut reader = Cursor::new(source(6));
        let mut buf = StreamBuffer::new(64, 4);
        assert_eq!(buf.refill(&mut reader, 100).unwrap(), 4);
        assert_eq!(reader.position(), 4);
        assert_eq!(buf.refill(&mut reader, 100).unwrap(), 0);
        assert_eq!(reader.position(), 4);
        assert!(buf.is_empty());
    }

    #[test]
    fn short_reads_are_accumulated() {
        let mut reader = Trickle { inner: Cursor::new(source(64)), chunk: 3 };
        let mut buf = StreamBuffer::new(32, 4);
        assert_eq!(buf.refill(&mut reader, 64).unwrap(), 32);
        assert_eq!(reader.inner.position(), 32);
    }

    #[test]
    fn repeated_refills_reconstruct_source_exactly() {
        let src = source(1000);
        for capacity in [4usize, 6, 30, 64, 2048] {
            let mut reader = Trickle { inner: Cursor::new(src.clone()), chunk: 5 };
            let mut buf = StreamBuffer::new(capacity, 4);
            let mut remaining = src.len() as u64;
            let mut out = Vec::new();
            loop {
                let before = reader.inner.position();
                let filled = buf.refill(&mut reader, remaining).unwrap();
                assert_eq!(filled % 4, 0);
                assert_eq!(reader.inner.position(), before + filled as u64);
                if filled == 0 {
                    break;
                }
                remaining -= filled as u64;
                let mut block = vec![0u8; filled];
                assert_eq!(buf.copy_into(&mut block), filled);
                out.extend_from_slice(&block);
            }
            assert_eq!(out, src, "capacity {capacity}");
        }
    }

    #[test]
    fn copy_into_advances_cursor() {
        let mut reader = Cursor::new(source(16));
        let mut buf = StreamBuffer::new(16, 4);
        buf.refill(&mut reader, 16).unwrap();

        let mut first = [0u8; 6];
        assert_eq!(buf.copy_into(&mut first), 6);
        assert_eq!(buf.read_pos(), 6);
        assert_eq!(buf.available(), 10);

        let mut rest = [0u8; 32];
        assert_eq!(buf.copy_into(&mut rest), 10);
        assert!(buf.is_empty());
        assert_eq!(&rest[..10], &source(16)[6..]);
    }
}
