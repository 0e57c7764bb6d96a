//! Pull-based data source handed to the audio transport.
//!
//! The transport calls [`PullSource::pull`] from its own thread whenever it
//! wants more audio. The source owns the container and the stream buffer, so
//! once registered it is the only writer of streaming state.

use std::io::{Read, Seek};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::container::TrackContainer;
use crate::error::PlaybackError;
use crate::stream_buffer::StreamBuffer;

/// Data-pull contract consumed by a [`crate::transport::Transport`].
pub trait PullSource: Send {
    /// Fill the front of `dest` with whole frames.
    ///
    /// The requested length is `dest.len()`. Returns the number of bytes written:
    /// never more than requested, always a multiple of [`PullSource::frame_size`],
    /// and 0 once the stream is exhausted.
    fn pull(&mut self, dest: &mut [u8]) -> usize;

    fn frame_size(&self) -> usize;
}

/// Counters published by a [`TrackSource`] for the control context.
#[derive(Debug, Default)]
pub struct SourceStats {
    /// Bytes written into transport buffers.
    pub bytes_delivered: AtomicU64,
    /// Storage refills performed.
    pub refills: AtomicU64,
    /// Bytes refilled from storage but not yet pulled.
    pub buffered: AtomicU64,
    /// Set when storage ran dry before the declared data length.
    pub truncated: AtomicBool,
}

/// [`PullSource`] reading PCM frames out of an opened container.
pub struct TrackSource<R> {
    container: Option<TrackContainer<R>>,
    buffer: StreamBuffer,
    stats: Arc<SourceStats>,
}

impl<R: Read + Seek + Send> TrackSource<R> {
    pub fn new(container: TrackContainer<R>, buffer_capacity: usize) -> Self {
        let frame_size = container.format().frame_size();
        Self {
            container: Some(container),
            buffer: StreamBuffer::new(buffer_capacity, frame_size),
            stats: Arc::new(SourceStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SourceStats> {
        self.stats.clone()
    }

    pub fn bytes_remaining(&self) -> u64 {
        self.container.as_ref().map(|c| c.bytes_remaining()).unwrap_or(0)
    }

    /// Release the container (and its storage handle) immediately.
    pub fn close(&mut self) {
        self.container = None;
        self.buffer.clear();
        self.stats.buffered.store(0, Ordering::Relaxed);
    }

    /// Load the next block, accounting refilled bytes against the container.
    ///
    /// Returns `false` when nothing more can be delivered; the container's
    /// remaining count is zeroed so the session can drain.
    fn refill(&mut self) -> bool {
        let Some(container) = self.container.as_mut() else {
            return false;
        };
        let remaining = container.bytes_remaining();
        let frame_size = self.buffer.frame_size() as u64;

        match self.buffer.refill(container.reader_mut(), remaining) {
            Ok(0) if remaining < frame_size => {
                tracing::debug!(bytes = remaining, "discarding trailing partial frame");
                container.abandon();
                false
            }
            Ok(0) => {
                let err = PlaybackError::TruncatedStream { remaining };
                tracing::warn!(kind = err.kind(), "{err}; ending track early");
                self.stats.truncated.store(true, Ordering::Relaxed);
                container.abandon();
                false
            }
            Ok(filled) => {
                // Publish the buffered tail before the remaining count can hit
                // zero, so the control context never sees both at zero early.
                self.stats.buffered.store(filled as u64, Ordering::Release);
                container.consume(filled as u64);
                self.stats.refills.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                tracing::warn!(remaining, "storage read failed; ending track early: {e}");
                self.stats.truncated.store(true, Ordering::Relaxed);
                container.abandon();
                false
            }
        }
    }
}

impl<R: Read + Seek + Send> PullSource for TrackSource<R> {
    fn pull(&mut self, dest: &mut [u8]) -> usize {
        let frame_size = self.buffer.frame_size();
        let want = dest.len() - dest.len() % frame_size;
        if want == 0 {
            return 0;
        }

        let mut produced = 0;
        while produced < want {
            if self.buffer.is_empty() && (self.bytes_remaining() == 0 || !self.refill()) {
                break;
            }
            produced += self.buffer.copy_into(&mut dest[produced..want]);
        }

        if produced > 0 {
            self.stats
                .bytes_delivered
                .fetch_add(produced as u64, Ordering::Relaxed);
        }
        self.stats
            .buffered
            .store(self.buffer.available() as u64, Ordering::Release);
        produced
    }

    fn frame_size(&self) -> usize {
        self.buffer.frame_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::tests::{FailAfter, ramp, wav_with};
    use std::io::Cursor;

    fn open(samples: &[u8], capacity: usize) -> TrackSource<Cursor<Vec<u8>>> {
        let c = TrackContainer::open(Cursor::new(wav_with(&[], samples))).unwrap();
        TrackSource::new(c, capacity)
    }

    #[test]
    fn ten_frames_across_odd_pulls() {
        let samples = ramp(40);
        let mut src = open(&samples, 2048);
        let mut out = Vec::new();
        let mut sizes = Vec::new();
        loop {
            let mut dest = [0u8; 7];
            let n = src.pull(&mut dest);
            sizes.push(n);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&dest[..n]);
        }
        assert_eq!(out, samples);
        assert_eq!(out.len() / 4, 10);
        assert!(sizes[..sizes.len() - 1].iter().all(|&n| n == 4));
        assert_eq!(src.bytes_remaining(), 0);
        assert_eq!(src.stats().bytes_delivered.load(Ordering::Relaxed), 40);
    }

    #[test]
    fn pull_is_frame_aligned_and_bounded_for_any_request() {
        let samples = ramp(4096);
        for n in 0..40usize {
            let mut src = open(&samples, 64);
            let mut dest = vec![0u8; n];
            let got = src.pull(&mut dest);
            assert!(got <= n);
            assert_eq!(got % 4, 0);
            if n < 4 {
                assert_eq!(got, 0);
            } else {
                assert_eq!(got, n - n % 4);
            }
        }
    }

    #[test]
    fn reconstructs_stream_byte_for_byte() {
        let samples = ramp(10_000);
        let mut src = open(&samples, 100);
        let mut out = Vec::new();
        let mut sizes = [1usize, 3, 7, 513, 2, 64, 1000].into_iter().cycle();
        loop {
            let mut dest = vec![0u8; sizes.next().unwrap()];
            let n = src.pull(&mut dest);
            if n == 0 && dest.len() >= 4 {
                break;
            }
            out.extend_from_slice(&dest[..n]);
        }
        assert_eq!(out, samples);
    }

    #[test]
    fn remaining_decrements_by_refill_amount() {
        let samples = ramp(400);
        let mut src = open(&samples, 100);
        let mut dest = [0u8; 8];
        assert_eq!(src.pull(&mut dest), 8);
        // One refill of 100 bytes has been accounted, not the 8 copied.
        assert_eq!(src.bytes_remaining(), 300);
        assert_eq!(src.stats().refills.load(Ordering::Relaxed), 1);
        assert_eq!(src.stats().buffered.load(Ordering::Relaxed), 92);
    }

    #[test]
    fn truncated_file_ends_early_and_drains() {
        let samples = ramp(40);
        let mut bytes = wav_with(&[], &samples);
        // Declare 400 sample bytes but only ship 40.
        let len_at = bytes.len() - 40 - 4;
        bytes[len_at..len_at + 4].copy_from_slice(&400u32.to_le_bytes());
        let c = TrackContainer::open(Cursor::new(bytes)).unwrap();
        let mut src = TrackSource::new(c, 2048);

        let mut dest = vec![0u8; 1000];
        assert_eq!(src.pull(&mut dest), 40);
        assert_eq!(&dest[..40], &samples[..]);
        assert_eq!(src.bytes_remaining(), 0);
        assert!(src.stats().truncated.load(Ordering::Relaxed));
        assert_eq!(src.pull(&mut dest), 0);
    }

    #[test]
    fn storage_error_mid_stream_is_truncation() {
        let samples = ramp(400);
        let bytes = wav_with(&[], &samples);
        let header = (bytes.len() - samples.len()) as u64;
        let c = TrackContainer::open(FailAfter::new(bytes, header + 128)).unwrap();
        let mut src = TrackSource::new(c, 64);

        let mut dest = vec![0u8; 1000];
        assert_eq!(src.pull(&mut dest), 128);
        assert_eq!(&dest[..128], &samples[..128]);
        assert_eq!(src.bytes_remaining(), 0);
        assert!(src.stats().truncated.load(Ordering::Relaxed));
        assert_eq!(src.stats().buffered.load(Ordering::Relaxed), 0);
        assert_eq!(src.pull(&mut dest), 0);
    }

    #[test]
    fn unaligned_data_length_drops_partial_tail() {
        let samples = ramp(42);
        let mut src = open(&samples, 2048);
        let mut dest = vec![0u8; 100];
        assert_eq!(src.pull(&mut dest), 40);
        assert_eq!(src.pull(&mut dest), 0);
        assert_eq!(src.bytes_remaining(), 0);
        assert!(!src.stats().truncated.load(Ordering::Relaxed));
    }

    #[test]
    fn closed_source_returns_zero() {
        let mut src = open(&ramp(40), 2048);
        src.close();
        let mut dest = [0u8; 16];
        assert_eq!(src.pull(&mut dest), 0);
        assert_eq!(src.bytes_remaining(), 0);
    }
}
