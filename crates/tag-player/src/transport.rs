//! Audio transport abstraction.
//!
//! A transport owns the real-time side of playback: it keeps at most one
//! registered [`PullSource`] and calls it from its own thread on its own
//! schedule. Ownership of the source moves into the transport on
//! [`Transport::register`] and back out on [`Transport::deregister`], which is
//! what keeps the control context from ever touching streaming state while the
//! pull side is live.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::error::{PlaybackError, Result};
use crate::source::PullSource;

/// Link-level events reported by a transport to the control context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    /// Media started flowing (pull callback active).
    Started,
    /// The peer suspended media; pulls stop until a new start request.
    Suspended,
}

/// What the control context does when the peer suspends media.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResumePolicy {
    /// Re-issue a start request whenever connected, even after the track finished.
    Always,
    /// Re-issue a start request only while a track is streaming.
    #[default]
    WhileStreaming,
}

/// Pull-based audio sink.
pub trait Transport {
    /// Hand `source` to the transport's pull context, replacing nothing.
    ///
    /// Fails if a source is already registered.
    fn register(&mut self, source: Box<dyn PullSource>) -> Result<()>;

    /// Take the registered source back. After this returns the pull context
    /// will not touch it again.
    fn deregister(&mut self) -> Option<Box<dyn PullSource>>;

    /// Ask the transport to start (or resume) pulling media.
    fn start_media(&mut self) -> Result<()>;
}

/// Shared slot holding the registered source.
///
/// The control context only locks it to install or remove a source; the pull
/// context uses [`SourceSlot::try_pull`] and never waits on the lock.
#[derive(Clone, Default)]
pub struct SourceSlot {
    inner: Arc<Mutex<Option<Box<dyn PullSource>>>>,
}

impl SourceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, source: Box<dyn PullSource>) -> Result<()> {
        let mut g = self
            .inner
            .lock()
            .map_err(|_| PlaybackError::Transport("source slot poisoned".to_string()))?;
        if g.is_some() {
            return Err(PlaybackError::Transport(
                "a source is already registered".to_string(),
            ));
        }
        *g = Some(source);
        Ok(())
    }

    /// Remove the registered source, waiting out any in-flight pull.
    pub fn take(&self) -> Option<Box<dyn PullSource>> {
        match self.inner.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Pull from the registered source without blocking.
    ///
    /// Returns `None` when the slot is empty or momentarily held by the control
    /// context; callers should treat that as an underrun.
    pub fn try_pull(&self, dest: &mut [u8]) -> Option<usize> {
        let mut g = self.inner.try_lock().ok()?;
        let source = g.as_mut()?;
        Some(source.pull(dest))
    }
}

/// Transport that pulls fixed-size blocks on a timer thread and hands the
/// bytes to a sink closure.
///
/// Stands in for a hardware link: useful headless (`--sink null`) and for
/// exercising the session from a second thread in tests.
pub struct ClockedTransport {
    slot: SourceSlot,
    started: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    events: Sender<TransportEvent>,
    bytes_pulled: Arc<AtomicU64>,
    join: Option<thread::JoinHandle<()>>,
}

/// Byte sink for [`ClockedTransport`].
pub type BlockSink = Box<dyn FnMut(&[u8]) + Send>;

impl ClockedTransport {
    /// Spawn the pull thread. `block_bytes` are requested every `period`.
    pub fn spawn(
        block_bytes: usize,
        period: Duration,
        events: Sender<TransportEvent>,
        mut sink: BlockSink,
    ) -> Self {
        let slot = SourceSlot::new();
        let started = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let bytes_pulled = Arc::new(AtomicU64::new(0));

        let slot_cb = slot.clone();
        let started_cb = started.clone();
        let stop_cb = stop.clone();
        let pulled_cb = bytes_pulled.clone();
        let join = thread::Builder::new()
            .name("clocked-transport".to_string())
            .spawn(move || {
                let mut block = vec![0u8; block_bytes.max(1)];
                while !stop_cb.load(Ordering::Relaxed) {
                    if started_cb.load(Ordering::Relaxed) {
                        if let Some(n) = slot_cb.try_pull(&mut block) {
                            if n > 0 {
                                pulled_cb.fetch_add(n as u64, Ordering::Relaxed);
                                sink(&block[..n]);
                            }
                        }
                    }
                    thread::sleep(period);
                }
            })
            .ok();
        if join.is_none() {
            tracing::error!("failed to spawn clocked transport thread");
        }

        let _ = events.send(TransportEvent::Connected);
        Self {
            slot,
            started,
            stop,
            events,
            bytes_pulled,
            join,
        }
    }

    /// Clocked transport paced at the real-time rate for `byte_rate` bytes/sec.
    pub fn realtime(byte_rate: u32, block_bytes: usize, events: Sender<TransportEvent>) -> Self {
        let period = Duration::from_secs_f64(block_bytes as f64 / f64::from(byte_rate.max(1)));
        Self::spawn(block_bytes, period, events, Box::new(|_| {}))
    }

    /// Simulate the peer suspending media.
    #[cfg(test)]
    pub(crate) fn suspend(&self) {
        self.started.store(false, Ordering::Relaxed);
        let _ = self.events.send(TransportEvent::Suspended);
    }

    #[cfg(test)]
    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    /// Total bytes handed to the sink.
    pub fn bytes_pulled(&self) -> u64 {
        self.bytes_pulled.load(Ordering::Relaxed)
    }
}

impl Transport for ClockedTransport {
    fn register(&mut self, source: Box<dyn PullSource>) -> Result<()> {
        self.slot.install(source)
    }

    fn deregister(&mut self) -> Option<Box<dyn PullSource>> {
        self.slot.take()
    }

    fn start_media(&mut self) -> Result<()> {
        if !self.started.swap(true, Ordering::Relaxed) {
            let _ = self.events.send(TransportEvent::Started);
        }
        Ok(())
    }
}

impl Drop for ClockedTransport {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        let _ = self.events.send(TransportEvent::Disconnected);
    }
}
