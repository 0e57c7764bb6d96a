use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use crate::container::{ContainerFormat, RemainingBytes};
use crate::source::SourceStats;

/// Why the last track stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// All declared sample bytes were delivered.
    Eof,
    /// Storage ran dry before the declared data length.
    Truncated,
    /// Replaced by another selection or torn down explicitly.
    Stopped,
    /// The track could not be opened or registered.
    Error,
}

/// Point-in-time view of the session, for logs and the CLI.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub now_playing: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub data_len: Option<u64>,
    pub bytes_delivered: Option<u64>,
    pub frames_delivered: Option<u64>,
    pub truncated: bool,
    pub bytes_remaining: Option<u64>,
    pub elapsed_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub end_reason: Option<EndReason>,
}

/// Shared playback status state updated by the session.
#[derive(Debug, Default)]
pub struct SessionStatus {
    /// Storage path of the current track.
    pub now_playing: Option<String>,
    /// Format of the current track.
    pub format: Option<ContainerFormat>,
    /// Declared sample-data length.
    pub data_len: Option<u64>,
    /// Counters published by the pull side.
    pub source_stats: Option<Arc<SourceStats>>,
    /// Outstanding sample bytes.
    pub remaining: Option<RemainingBytes>,
    /// Terminal reason from the last track.
    pub end_reason: Option<EndReason>,
}

impl SessionStatus {
    /// Create a shared, mutex-protected status store.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let bytes_delivered = self
            .source_stats
            .as_ref()
            .map(|s| s.bytes_delivered.load(Ordering::Relaxed));
        let frames_delivered = match (bytes_delivered, self.format) {
            (Some(bytes), Some(f)) if f.frame_size() > 0 => Some(bytes / f.frame_size() as u64),
            _ => None,
        };
        let truncated = self
            .source_stats
            .as_ref()
            .is_some_and(|s| s.truncated.load(Ordering::Relaxed));
        let byte_rate = self
            .format
            .map(|f| u64::from(f.byte_rate))
            .filter(|r| *r > 0);
        let elapsed_ms = match (bytes_delivered, byte_rate) {
            (Some(bytes), Some(rate)) => Some(bytes.saturating_mul(1000) / rate),
            _ => None,
        };
        let duration_ms = match (self.data_len, byte_rate) {
            (Some(len), Some(rate)) => Some(len.saturating_mul(1000) / rate),
            _ => None,
        };
        StatusSnapshot {
            now_playing: self.now_playing.clone(),
            sample_rate: self.format.map(|f| f.sample_rate),
            channels: self.format.map(|f| f.channels),
            data_len: self.data_len,
            bytes_delivered,
            frames_delivered,
            truncated,
            bytes_remaining: self.remaining.as_ref().map(|r| r.get()),
            elapsed_ms,
            duration_ms,
            end_reason: self.end_reason,
        }
    }

    /// Record the end of the current track and return its final snapshot.
    ///
    /// Format and counters stay readable until the next track starts.
    pub fn finish(&mut self, reason: EndReason) -> StatusSnapshot {
        self.now_playing = None;
        self.end_reason = Some(reason);
        self.snapshot()
    }

    /// Clear track-specific fields when no track was started.
    pub fn clear_playback(&mut self) {
        self.now_playing = None;
        self.format = None;
        self.data_len = None;
        self.source_stats = None;
        self.remaining = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::TrackContainer;
    use crate::container::tests::{ramp, wav_with};
    use std::io::Cursor;

    #[test]
    fn snapshot_reports_elapsed_and_duration() {
        let container = TrackContainer::open(Cursor::new(wav_with(&[], &ramp(40)))).unwrap();
        let stats = Arc::new(SourceStats::default());
        stats.bytes_delivered.store(176_400, Ordering::Relaxed);

        let mut state = SessionStatus::default();
        state.format = Some(*container.format());
        state.data_len = Some(352_800);
        state.source_stats = Some(stats);
        state.remaining = Some(container.remaining_handle());

        let snap = state.snapshot();
        assert_eq!(snap.elapsed_ms, Some(1000));
        assert_eq!(snap.frames_delivered, Some(44_100));
        assert!(!snap.truncated);
        assert_eq!(snap.duration_ms, Some(2000));
        assert_eq!(snap.bytes_remaining, Some(40));
        assert_eq!(snap.sample_rate, Some(44_100));
    }

    #[test]
    fn finish_keeps_counters_of_the_ended_track() {
        let stats = Arc::new(SourceStats::default());
        stats.bytes_delivered.store(40, Ordering::Relaxed);
        stats.truncated.store(true, Ordering::Relaxed);
        let container = TrackContainer::open(Cursor::new(wav_with(&[], &ramp(40)))).unwrap();

        let mut state = SessionStatus::default();
        state.now_playing = Some("/sdcard/1/music1.wav".to_string());
        state.format = Some(*container.format());
        state.data_len = Some(40);
        state.source_stats = Some(stats);

        let snap = state.finish(EndReason::Truncated);
        assert!(snap.now_playing.is_none());
        assert_eq!(snap.bytes_delivered, Some(40));
        assert_eq!(snap.frames_delivered, Some(10));
        assert!(snap.truncated);
        assert_eq!(snap.end_reason, Some(EndReason::Truncated));
        assert_eq!(state.snapshot(), snap);
    }

    #[test]
    fn clear_playback_keeps_end_reason() {
        let mut state = SessionStatus::default();
        state.now_playing = Some("/sdcard/1/music1.wav".to_string());
        state.data_len = Some(10);
        state.end_reason = Some(EndReason::Eof);

        state.clear_playback();

        let snap = state.snapshot();
        assert!(snap.now_playing.is_none());
        assert!(snap.data_len.is_none());
        assert!(snap.elapsed_ms.is_none());
        assert_eq!(snap.end_reason, Some(EndReason::Eof));
    }
}
