//! tagbox runtime helpers.
//!
//! Builds the transport, storage, session, and control loop for each mode.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use cpal::traits::DeviceTrait;
use crossbeam_channel::{Receiver, Sender};

use tag_player::container::TrackContainer;
use tag_player::controller::Controller;
use tag_player::motor::{LogPins, StepperMotor};
use tag_player::playback::CpalTransport;
use tag_player::session::{PlaybackSession, SessionEvent};
use tag_player::source::PullSource;
use tag_player::transport::{ClockedTransport, Transport, TransportEvent};
use tag_player::{device, error};

use crate::cli::{Args, Sink};
use crate::config::AppConfig;
use crate::tag_input;

/// Bytes per second of the only accepted format (44.1 kHz, stereo, 16-bit).
const PCM_BYTE_RATE: u32 = 44_100 * 4;
/// Block size pulled by the null sink per tick.
const NULL_SINK_BLOCK_BYTES: usize = 4096;

/// Transport chosen on the command line.
pub enum HostTransport {
    Cpal(CpalTransport),
    Null(ClockedTransport),
}

impl Transport for HostTransport {
    fn register(&mut self, source: Box<dyn PullSource>) -> error::Result<()> {
        match self {
            Self::Cpal(t) => t.register(source),
            Self::Null(t) => t.register(source),
        }
    }

    fn deregister(&mut self) -> Option<Box<dyn PullSource>> {
        match self {
            Self::Cpal(t) => t.deregister(),
            Self::Null(t) => t.deregister(),
        }
    }

    fn start_media(&mut self) -> error::Result<()> {
        match self {
            Self::Cpal(t) => t.start_media(),
            Self::Null(t) => t.start_media(),
        }
    }
}

impl HostTransport {
    /// Log what the output side did over its lifetime.
    pub fn log_totals(&self) {
        match self {
            Self::Cpal(t) => {
                let c = t.counters();
                tracing::info!(
                    played_frames = c.played_frames.load(Ordering::Relaxed),
                    underrun_frames = c.underrun_frames.load(Ordering::Relaxed),
                    underrun_events = c.underrun_events.load(Ordering::Relaxed),
                    "output totals"
                );
            }
            Self::Null(t) => {
                tracing::info!(bytes_pulled = t.bytes_pulled(), "null sink totals");
            }
        }
    }
}

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Open the transport selected by `--sink`.
pub fn open_transport(
    sink: Sink,
    device_name: Option<&str>,
    events: Sender<TransportEvent>,
) -> Result<HostTransport> {
    match sink {
        Sink::Null => {
            tracing::info!("null sink: audio is pulled in real time and discarded");
            Ok(HostTransport::Null(ClockedTransport::realtime(
                PCM_BYTE_RATE,
                NULL_SINK_BLOCK_BYTES,
                events,
            )))
        }
        Sink::Cpal => {
            let host = cpal::default_host();
            let device = device::pick_device(&host, device_name)?;
            let config = device::pick_output_config(&device)?;
            let mut stream_config: cpal::StreamConfig = config.clone().into();
            if let Some(buf) = device::pick_buffer_size(&config) {
                stream_config.buffer_size = buf;
            }
            tracing::info!(device = %device.description()?, "output device");
            tracing::info!(
                output_rate_hz = stream_config.sample_rate,
                channels = stream_config.channels,
                sample_format = ?config.sample_format(),
                buffer_size = ?stream_config.buffer_size,
                "device output config"
            );
            let transport = CpalTransport::open(&device, &config, &stream_config, events)
                .context("open output stream")?;
            Ok(HostTransport::Cpal(transport))
        }
    }
}

fn install_stop_flag() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_signal = stop.clone();
    ctrlc::set_handler(move || {
        stop_for_signal.store(true, Ordering::Relaxed);
    })
    .context("install ctrl-c handler")?;
    Ok(stop)
}

/// Tag-driven control loop. Runs until Ctrl-C.
pub fn run(args: &Args, config: &AppConfig) -> Result<()> {
    let stop = install_stop_flag()?;
    let stream = config.stream_config(args.buffer_bytes);
    let tracks = config.track_map()?;
    let motor = StepperMotor::new(config.motor_config()?, LogPins);

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let device_name = config.device(args.device.as_deref());
    let transport = open_transport(args.sink, device_name.as_deref(), events_tx)?;
    let session = PlaybackSession::new(config.storage(), transport, stream.clone())
        .with_resume_policy(config.resume_policy());

    let reader = tag_input::spawn_stdin_reader()?;
    tracing::info!(tracks = tracks.len(), "enter tag UIDs as hex, one per line");
    let mut controller = Controller::new(reader, tracks, session, motor, events_rx);
    controller.run(&stop, stream.poll_interval);
    controller.session().transport().log_totals();
    tracing::info!("stopped");
    Ok(())
}

/// Stream one track and return once it drains (or on Ctrl-C).
pub fn play_one(args: &Args, config: &AppConfig, path: &str) -> Result<()> {
    let stop = install_stop_flag()?;
    let stream = config.stream_config(args.buffer_bytes);

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let device_name = config.device(args.device.as_deref());
    let transport = open_transport(args.sink, device_name.as_deref(), events_tx)?;
    let mut session = PlaybackSession::new(config.storage(), transport, stream.clone())
        .with_resume_policy(config.resume_policy());
    drain_events(&mut session, &events_rx);

    session
        .select(path)
        .with_context(|| format!("play {path}"))?;
    let status = session.status();

    loop {
        drain_events(&mut session, &events_rx);
        match session.poll() {
            SessionEvent::Finished(reason) => {
                tracing::info!(?reason, "playback finished");
                break;
            }
            SessionEvent::Streaming { remaining } => {
                tracing::trace!(remaining, "streaming");
            }
            SessionEvent::Idle => break,
        }
        if stop.load(Ordering::Relaxed) {
            session.teardown();
            break;
        }
        thread::sleep(stream.poll_interval);
    }

    if let Ok(s) = status.lock() {
        let snap = s.snapshot();
        tracing::info!(
            end_reason = ?snap.end_reason,
            bytes_delivered = snap.bytes_delivered.unwrap_or(0),
            frames_delivered = snap.frames_delivered.unwrap_or(0),
            elapsed_ms = snap.elapsed_ms.unwrap_or(0),
            duration_ms = snap.duration_ms.unwrap_or(0),
            truncated = snap.truncated,
            "session ended"
        );
    }
    session.transport().log_totals();
    Ok(())
}

fn drain_events<S, T>(session: &mut PlaybackSession<S, T>, events: &Receiver<TransportEvent>)
where
    S: tag_player::storage::TrackStorage,
    T: Transport,
{
    while let Ok(ev) = events.try_recv() {
        session.handle_transport_event(ev);
    }
}

/// Print the parsed container format of a local file.
pub fn inspect(path: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;
    let container =
        TrackContainer::open(file).with_context(|| format!("parse {:?}", path))?;
    let format = container.format();
    let data_len = container.data_len();
    let duration_ms = data_len.saturating_mul(1000) / u64::from(format.byte_rate.max(1));
    println!("{}", path.display());
    println!("  format code:     {}", format.format_code);
    println!("  channels:        {}", format.channels);
    println!("  sample rate:     {} Hz", format.sample_rate);
    println!("  bits per sample: {}", format.bits_per_sample);
    println!("  block align:     {}", format.block_align);
    println!("  byte rate:       {}", format.byte_rate);
    println!("  data bytes:      {data_len}");
    println!("  frames:          {}", data_len / format.frame_size() as u64);
    println!("  duration:        {}.{:03} s", duration_ms / 1000, duration_ms % 1000);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_needs_no_device_and_reports_totals() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let transport = open_transport(Sink::Null, Some("ignored"), tx).unwrap();
        assert!(matches!(transport, HostTransport::Null(_)));
        assert_eq!(rx.try_recv(), Ok(TransportEvent::Connected));
        transport.log_totals();
        drop(transport);
        assert_eq!(rx.try_recv(), Ok(TransportEvent::Disconnected));
    }
}
