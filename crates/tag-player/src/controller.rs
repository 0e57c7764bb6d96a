//! Control loop: tag presentations in, session selections and motor state out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::motor::Motor;
use crate::session::{PlaybackSession, SessionEvent};
use crate::status::EndReason;
use crate::storage::TrackStorage;
use crate::tags::{TagReader, TrackMap, Uid};
use crate::transport::{Transport, TransportEvent};

/// Observable outcome of one [`Controller::step`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    /// A mapped tag started a track.
    Selected { uid: Uid, path: String },
    /// A mapped tag was presented but its track could not be started.
    SelectFailed { uid: Uid, path: String },
    /// A tag with no configured track was presented.
    Unmapped(Uid),
    /// The playing track ended on its own.
    Finished(EndReason),
}

/// Owns every collaborator and drives them from one thread.
pub struct Controller<R, S, T, M>
where
    R: TagReader,
    S: TrackStorage,
    T: Transport,
    M: Motor,
{
    reader: R,
    tracks: TrackMap,
    session: PlaybackSession<S, T>,
    motor: M,
    transport_events: Receiver<TransportEvent>,
    held: Option<Uid>,
    reader_open: bool,
}

impl<R, S, T, M> Controller<R, S, T, M>
where
    R: TagReader,
    S: TrackStorage,
    T: Transport,
    M: Motor,
{
    pub fn new(
        reader: R,
        tracks: TrackMap,
        session: PlaybackSession<S, T>,
        motor: M,
        transport_events: Receiver<TransportEvent>,
    ) -> Self {
        Self {
            reader,
            tracks,
            session,
            motor,
            transport_events,
            held: None,
            reader_open: true,
        }
    }

    pub fn session(&self) -> &PlaybackSession<S, T> {
        &self.session
    }

    #[cfg(test)]
    pub(crate) fn session_mut(&mut self) -> &mut PlaybackSession<S, T> {
        &mut self.session
    }

    #[cfg(test)]
    pub(crate) fn motor(&self) -> &M {
        &self.motor
    }

    /// One control tick: transport events, session completion, then the tag reader.
    pub fn step(&mut self) -> Vec<ControlEvent> {
        let mut out = Vec::new();

        while let Ok(ev) = self.transport_events.try_recv() {
            self.session.handle_transport_event(ev);
        }

        if let SessionEvent::Finished(reason) = self.session.poll() {
            self.motor.stop();
            out.push(ControlEvent::Finished(reason));
        }

        if !self.reader_open {
            return out;
        }
        let uid = match self.reader.poll() {
            Ok(Some(uid)) => uid,
            Ok(None) => {
                self.held = None;
                return out;
            }
            Err(e) => {
                tracing::warn!("tag reader stopped: {e}");
                self.reader_open = false;
                return out;
            }
        };

        // A tag left in the field keeps reporting; act on it once.
        if self.held.as_ref() == Some(&uid) {
            return out;
        }
        self.held = Some(uid.clone());
        tracing::info!(uid = %uid, "tag presented");

        let path = match self.tracks.select(&uid) {
            Ok(path) => path.to_string(),
            Err(e) => {
                tracing::warn!("{e}");
                out.push(ControlEvent::Unmapped(uid));
                return out;
            }
        };

        match self.session.select(&path) {
            Ok(()) => {
                self.motor.start();
                out.push(ControlEvent::Selected { uid, path });
            }
            Err(e) => {
                self.motor.stop();
                tracing::error!(uid = %uid, path = %path, kind = e.kind(), "selection failed: {e}");
                out.push(ControlEvent::SelectFailed { uid, path });
            }
        }
        out
    }

    /// Whether the tag reader is still delivering.
    #[cfg(test)]
    pub(crate) fn reader_open(&self) -> bool {
        self.reader_open
    }

    /// Step until `stop` is set, sleeping `interval` between ticks.
    pub fn run(&mut self, stop: &AtomicBool, interval: Duration) {
        tracing::info!(tracks = self.tracks.len(), "waiting for tags");
        while !stop.load(Ordering::Relaxed) {
            self.step();
            thread::sleep(interval);
        }
        self.shutdown();
    }

    /// Stop the track and the motor.
    pub fn shutdown(&mut self) {
        self.session.teardown();
        self.motor.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::container::tests::{fmt_payload, ramp, riff, wav_with};
    use crate::session::SessionState;
    use crate::session::tests::ManualTransport;
    use crate::storage::tests::MemoryStorage;
    use crate::tags::ChannelTagReader;
    use crossbeam_channel::Sender;
    use std::collections::VecDeque;
    use std::io;

    #[derive(Default)]
    struct FakeMotor {
        running: bool,
        starts: usize,
    }

    impl Motor for FakeMotor {
        fn start(&mut self) {
            if !self.running {
                self.starts += 1;
            }
            self.running = true;
        }
        fn stop(&mut self) {
            self.running = false;
        }
        fn is_running(&self) -> bool {
            self.running
        }
    }

    /// Replays a fixed sequence of reader polls, then reports no tag.
    struct ScriptedReader(VecDeque<Option<Uid>>);

    impl TagReader for ScriptedReader {
        fn poll(&mut self) -> io::Result<Option<Uid>> {
            Ok(self.0.pop_front().flatten())
        }
    }

    type TestController<R> = Controller<R, MemoryStorage, ManualTransport, FakeMotor>;

    fn uid(bytes: &[u8]) -> Uid {
        Uid::new(bytes).unwrap()
    }

    fn controller<R: TagReader>(reader: R, storage: MemoryStorage) -> (TestController<R>, Sender<TransportEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let session = PlaybackSession::new(storage, ManualTransport::default(), StreamConfig::default());
        let c = Controller::new(reader, TrackMap::factory(), session, FakeMotor::default(), rx);
        (c, tx)
    }

    fn factory_storage() -> MemoryStorage {
        MemoryStorage::default()
            .with("/sdcard/1/music1.wav", wav_with(&[], &ramp(40)))
            .with("/sdcard/2/music2.wav", wav_with(&[], &ramp(4000)))
    }

    #[test]
    fn mapped_tag_starts_track_and_motor_until_drained() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (mut c, _events) = controller(ChannelTagReader::new(rx), factory_storage());

        tx.send(uid(&[0xDE, 0xAD, 0xBE, 0xEF])).unwrap();
        let events = c.step();
        assert_eq!(
            events,
            vec![ControlEvent::Selected {
                uid: uid(&[0xDE, 0xAD, 0xBE, 0xEF]),
                path: "/sdcard/1/music1.wav".to_string()
            }]
        );
        assert!(c.motor().is_running());

        assert_eq!(c.session_mut().transport_mut().pull(100).len(), 40);
        assert_eq!(c.step(), vec![ControlEvent::Finished(EndReason::Eof)]);
        assert!(!c.motor().is_running());
        assert_eq!(c.session().state(), SessionState::Idle);
    }

    #[test]
    fn held_tag_is_acted_on_once() {
        let tag = uid(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let script = [Some(tag.clone()), Some(tag.clone()), Some(tag.clone()), None, Some(tag.clone())];
        let (mut c, _events) = controller(ScriptedReader(script.into()), factory_storage());

        let selections: usize = (0..5)
            .map(|_| {
                c.step()
                    .iter()
                    .filter(|e| matches!(e, ControlEvent::Selected { .. }))
                    .count()
            })
            .sum();
        assert_eq!(selections, 2);
        assert_eq!(c.motor().starts, 1);
    }

    #[test]
    fn unmapped_tag_leaves_current_track_playing() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (mut c, _events) = controller(ChannelTagReader::new(rx), factory_storage());
        tx.send(uid(&[0xAA, 0xBB, 0xCC, 0xDD])).unwrap();
        c.step();

        let stray = uid(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00]);
        tx.send(stray.clone()).unwrap();
        assert_eq!(c.step(), vec![ControlEvent::Unmapped(stray)]);
        assert_eq!(c.session().now_playing(), Some("/sdcard/2/music2.wav"));
        assert!(c.motor().is_running());
    }

    #[test]
    fn failed_selection_stops_motor() {
        let storage = factory_storage().with(
            "/sdcard/3/music3.wav",
            riff(&[(b"fmt ", fmt_payload(1, 2, 48_000, 16)), (b"data", ramp(40))]),
        );
        let (tx, rx) = crossbeam_channel::unbounded();
        let (mut c, _events) = controller(ChannelTagReader::new(rx), storage);

        tx.send(uid(&[0xAA, 0xBB, 0xCC, 0xDD])).unwrap();
        c.step();
        assert!(c.motor().is_running());

        tx.send(uid(&[0x11, 0x22, 0x33, 0x44])).unwrap();
        let events = c.step();
        assert!(matches!(events.as_slice(), [ControlEvent::SelectFailed { .. }]));
        assert!(!c.motor().is_running());
        assert_eq!(c.session().state(), SessionState::Idle);
        assert!(c.session().transport().source.is_none());
    }

    #[test]
    fn transport_events_reach_the_session() {
        let (tag_tx, rx) = crossbeam_channel::unbounded();
        let (mut c, events) = controller(ChannelTagReader::new(rx), factory_storage());
        tag_tx.send(uid(&[0xAA, 0xBB, 0xCC, 0xDD])).unwrap();
        c.step();
        assert_eq!(c.session().transport().starts, 1);

        events.send(TransportEvent::Connected).unwrap();
        events.send(TransportEvent::Suspended).unwrap();
        c.step();
        assert_eq!(c.session().transport().starts, 2);
    }

    #[test]
    fn closed_reader_keeps_session_running() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (mut c, _events) = controller(ChannelTagReader::new(rx), factory_storage());
        tx.send(uid(&[0xDE, 0xAD, 0xBE, 0xEF])).unwrap();
        c.step();
        drop(tx);
        c.step();
        assert!(!c.reader_open());

        c.session_mut().transport_mut().pull(100);
        assert_eq!(c.step(), vec![ControlEvent::Finished(EndReason::Eof)]);
    }

    #[test]
    fn run_exits_on_stop_flag_and_tears_down() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (mut c, _events) = controller(ChannelTagReader::new(rx), factory_storage());
        tx.send(uid(&[0xAA, 0xBB, 0xCC, 0xDD])).unwrap();
        c.step();

        let stop = AtomicBool::new(true);
        c.run(&stop, Duration::from_millis(1));
        assert!(!c.motor().is_running());
        assert_eq!(c.session().state(), SessionState::Idle);
    }
}
