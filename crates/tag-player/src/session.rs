//! Playback session: open → stream → drain lifecycle for one track at a time.
//!
//! The session is driven from the control context. While a track is
//! streaming, the container and stream buffer live inside the data source
//! owned by the transport; the session only watches the published remaining
//! count and counters. Teardown always takes the source back from the
//! transport before dropping it, so the pull context can never observe a
//! released storage handle.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use crate::config::StreamConfig;
use crate::container::{RemainingBytes, TrackContainer};
use crate::error::Result;
use crate::source::{SourceStats, TrackSource};
use crate::status::{EndReason, SessionStatus};
use crate::storage::TrackStorage;
use crate::transport::{ResumePolicy, Transport, TransportEvent};

/// Lifecycle states.
///
/// `Drained` and `Failed` are transient: the session releases the track and
/// returns to `Idle` within the same call that entered them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Opening,
    Streaming,
    Drained,
    Failed,
}

/// Result of one [`PlaybackSession::poll`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Idle,
    Streaming { remaining: u64 },
    Finished(EndReason),
}

struct ActiveTrack {
    path: String,
    remaining: RemainingBytes,
    stats: Arc<SourceStats>,
}

/// Owns the storage and transport collaborators and the single live track.
pub struct PlaybackSession<S: TrackStorage, T: Transport> {
    storage: S,
    transport: T,
    config: StreamConfig,
    resume: ResumePolicy,
    state: SessionState,
    connected: bool,
    active: Option<ActiveTrack>,
    status: Arc<Mutex<SessionStatus>>,
}

impl<S: TrackStorage, T: Transport> PlaybackSession<S, T> {
    pub fn new(storage: S, transport: T, config: StreamConfig) -> Self {
        Self {
            storage,
            transport,
            config,
            resume: ResumePolicy::default(),
            state: SessionState::Idle,
            connected: false,
            active: None,
            status: SessionStatus::shared(),
        }
    }

    pub fn with_resume_policy(mut self, resume: ResumePolicy) -> Self {
        self.resume = resume;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> Arc<Mutex<SessionStatus>> {
        self.status.clone()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Path of the streaming track, if any.
    pub fn now_playing(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.path.as_str())
    }

    /// Outstanding sample bytes of the current track (0 when idle).
    pub fn bytes_remaining(&self) -> u64 {
        self.active.as_ref().map(|a| a.remaining.get()).unwrap_or(0)
    }

    /// Start streaming `path`, replacing whatever is playing.
    ///
    /// On failure the session is back in `Idle` and the error says why.
    pub fn select(&mut self, path: &str) -> Result<()> {
        if self.state != SessionState::Idle {
            tracing::info!(
                previous = self.now_playing().unwrap_or(""),
                next = path,
                "replacing active track"
            );
            self.release(EndReason::Stopped);
        }

        self.state = SessionState::Opening;
        match self.open_track(path) {
            Ok(active) => {
                tracing::info!(
                    path,
                    data_bytes = active.remaining.get(),
                    "track streaming"
                );
                self.active = Some(active);
                self.state = SessionState::Streaming;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                tracing::warn!(path, kind = e.kind(), "track open failed: {e}");
                self.release(EndReason::Error);
                Err(e)
            }
        }
    }

    fn open_track(&mut self, path: &str) -> Result<ActiveTrack> {
        let reader = self.storage.open(path)?;
        let container = TrackContainer::open(reader)?;
        let format = *container.format();
        let data_len = container.data_len();
        let remaining = container.remaining_handle();

        let source = TrackSource::new(container, self.config.buffer_capacity);
        let stats = source.stats();
        self.transport.register(Box::new(source))?;
        self.transport.start_media()?;

        if let Ok(mut s) = self.status.lock() {
            s.now_playing = Some(path.to_string());
            s.format = Some(format);
            s.data_len = Some(data_len);
            s.source_stats = Some(stats.clone());
            s.remaining = Some(remaining.clone());
            s.end_reason = None;
        }

        Ok(ActiveTrack {
            path: path.to_string(),
            remaining,
            stats,
        })
    }

    /// Check the streaming track for completion.
    ///
    /// Completion means every declared sample byte has been refilled and the
    /// pull side has handed the last buffered bytes to the transport.
    pub fn poll(&mut self) -> SessionEvent {
        if self.state != SessionState::Streaming {
            return SessionEvent::Idle;
        }
        let Some(active) = self.active.as_ref() else {
            return SessionEvent::Idle;
        };

        let remaining = active.remaining.get();
        let buffered = active.stats.buffered.load(Ordering::Acquire);
        if remaining > 0 || buffered > 0 {
            return SessionEvent::Streaming { remaining };
        }

        let reason = if active.stats.truncated.load(Ordering::Relaxed) {
            EndReason::Truncated
        } else {
            EndReason::Eof
        };
        self.state = SessionState::Drained;
        self.release(reason);
        SessionEvent::Finished(reason)
    }

    /// Stop the current track, if any. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if self.state == SessionState::Idle && self.active.is_none() {
            return;
        }
        self.release(EndReason::Stopped);
    }

    /// React to a transport link event.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                tracing::info!("transport connected");
                self.connected = true;
            }
            TransportEvent::Disconnected => {
                tracing::info!("transport disconnected");
                self.connected = false;
            }
            TransportEvent::Started => tracing::debug!("transport media started"),
            TransportEvent::Suspended => {
                let resume = self.connected
                    && match self.resume {
                        ResumePolicy::Always => true,
                        ResumePolicy::WhileStreaming => self.state == SessionState::Streaming,
                    };
                tracing::info!(resume, "transport media suspended");
                if resume {
                    if let Err(e) = self.transport.start_media() {
                        tracing::warn!("media restart failed: {e}");
                    }
                }
            }
        }
    }

    /// Deregister the source, then drop it (releasing storage), then go idle.
    fn release(&mut self, reason: EndReason) {
        let source = self.transport.deregister();
        drop(source);

        let mut status = match self.status.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match self.active.take() {
            Some(active) => {
                let snap = status.finish(reason);
                tracing::info!(
                    path = %active.path,
                    reason = ?reason,
                    bytes_delivered = snap.bytes_delivered.unwrap_or(0),
                    frames_delivered = snap.frames_delivered.unwrap_or(0),
                    elapsed_ms = snap.elapsed_ms.unwrap_or(0),
                    duration_ms = snap.duration_ms.unwrap_or(0),
                    truncated = snap.truncated,
                    "track ended"
                );
            }
            None => {
                status.clear_playback();
                status.end_reason = Some(reason);
            }
        }
        drop(status);
        self.state = SessionState::Idle;
    }
}

impl<S: TrackStorage, T: Transport> Drop for PlaybackSession<S, T> {
    fn drop(&mut self) {
        self.teardown();
    }
}
