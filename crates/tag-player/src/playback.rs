//! CPAL-backed transport.
//!
//! Builds the CPAL output stream and provides the real-time audio callback.
//! The callback:
//! - pulls 16-bit little-endian PCM frames from the registered source without blocking
//! - applies basic channel mapping (stereo → mono/stereo/multichannel)
//! - converts samples to the device sample format
//! - outputs silence when nothing is registered or the source runs dry

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use crate::error::PlaybackError;
use crate::source::PullSource;
use crate::transport::{SourceSlot, Transport, TransportEvent};

/// Bytes in one source frame (stereo, 16-bit).
const SRC_FRAME_BYTES: usize = 4;

/// Counters updated by the output callback.
#[derive(Debug, Default)]
pub struct OutputCounters {
    /// Frames written from source audio.
    pub played_frames: AtomicU64,
    /// Frames written as silence while a source was registered.
    pub underrun_frames: AtomicU64,
    /// Callbacks that had to pad with silence while a source was registered.
    pub underrun_events: AtomicU64,
}

/// [`Transport`] that plays pulled PCM on a CPAL output device.
///
/// The stream is created paused; [`Transport::start_media`] starts it.
pub struct CpalTransport {
    slot: SourceSlot,
    stream: cpal::Stream,
    started: bool,
    events: Sender<TransportEvent>,
    counters: Arc<OutputCounters>,
}

impl CpalTransport {
    /// Build an output stream on `device` and report the link as connected.
    pub fn open(
        device: &cpal::Device,
        config: &cpal::SupportedStreamConfig,
        stream_config: &cpal::StreamConfig,
        events: Sender<TransportEvent>,
    ) -> Result<Self> {
        let slot = SourceSlot::new();
        let counters = Arc::new(OutputCounters::default());
        let stream = build_output_stream(
            device,
            stream_config,
            config.sample_format(),
            &slot,
            &counters,
            events.clone(),
        )?;
        if let Err(e) = stream.pause() {
            tracing::debug!("initial pause not supported: {e}");
        }
        let _ = events.send(TransportEvent::Connected);
        Ok(Self {
            slot,
            stream,
            started: false,
            events,
            counters,
        })
    }

    pub fn counters(&self) -> Arc<OutputCounters> {
        self.counters.clone()
    }
}

impl Transport for CpalTransport {
    fn register(&mut self, source: Box<dyn PullSource>) -> crate::error::Result<()> {
        if source.frame_size() != SRC_FRAME_BYTES {
            return Err(PlaybackError::Transport(format!(
                "unsupported frame size {}",
                source.frame_size()
            )));
        }
        self.slot.install(source)
    }

    fn deregister(&mut self) -> Option<Box<dyn PullSource>> {
        self.slot.take()
    }

    fn start_media(&mut self) -> crate::error::Result<()> {
        self.stream
            .play()
            .map_err(|e| PlaybackError::Transport(format!("start stream: {e}")))?;
        if !self.started {
            self.started = true;
            let _ = self.events.send(TransportEvent::Started);
        }
        Ok(())
    }
}

impl Drop for CpalTransport {
    fn drop(&mut self) {
        let _ = self.stream.pause();
        let _ = self.events.send(TransportEvent::Disconnected);
    }
}

/// Build a CPAL output stream that plays audio pulled from `slot`.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    slot: &SourceSlot,
    counters: &Arc<OutputCounters>,
    events: Sender<TransportEvent>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, slot, counters, events),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, slot, counters, events),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, slot, counters, events),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, slot, counters, events),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    slot: &SourceSlot,
    counters: &Arc<OutputCounters>,
    events: Sender<TransportEvent>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = usize::from(config.channels).max(1);
    let slot_cb = slot.clone();
    let counters_cb = counters.clone();
    // Grown on the first callback (and whenever the device asks for more),
    // then reused.
    let mut scratch: Vec<u8> = Vec::new();

    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!("stream error: {err}");
        let _ = events.send(TransportEvent::Disconnected);
    };

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / channels_out;
            let want = frames * SRC_FRAME_BYTES;
            if scratch.len() < want {
                scratch.resize(want, 0);
            }

            let pulled = slot_cb.try_pull(&mut scratch[..want]);
            let got_frames = pulled.unwrap_or(0) / SRC_FRAME_BYTES;

            for (frame, out) in data.chunks_mut(channels_out).enumerate() {
                if frame < got_frames {
                    let at = frame * SRC_FRAME_BYTES;
                    let left = pcm16_to_f32([scratch[at], scratch[at + 1]]);
                    let right = pcm16_to_f32([scratch[at + 2], scratch[at + 3]]);
                    for (ch, sample) in out.iter_mut().enumerate() {
                        *sample = <T as cpal::Sample>::from_sample::<f32>(map_stereo(
                            left,
                            right,
                            channels_out,
                            ch,
                        ));
                    }
                } else {
                    out.fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
                }
            }

            if got_frames > 0 {
                counters_cb
                    .played_frames
                    .fetch_add(got_frames as u64, Ordering::Relaxed);
            }
            // Only count underruns while a track is actually registered.
            if pulled.is_some() && got_frames < frames {
                counters_cb.underrun_events.fetch_add(1, Ordering::Relaxed);
                counters_cb
                    .underrun_frames
                    .fetch_add((frames - got_frames) as u64, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

fn pcm16_to_f32(bytes: [u8; 2]) -> f32 {
    f32::from(i16::from_le_bytes(bytes)) / 32_768.0
}

/// Map a stereo source frame onto output channel `dst_ch`.
///
/// Mapping rules:
/// - stereo → mono: average L/R
/// - stereo → stereo: pass-through
/// - stereo → N>2: L/R on the first two channels, silence elsewhere
fn map_stereo(left: f32, right: f32, dst_channels: usize, dst_ch: usize) -> f32 {
    match (dst_channels, dst_ch) {
        (1, _) => 0.5 * (left + right),
        (_, 0) => left,
        (_, 1) => right,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_conversion_spans_unit_range() {
        assert_eq!(pcm16_to_f32(0i16.to_le_bytes()), 0.0);
        assert_eq!(pcm16_to_f32(i16::MIN.to_le_bytes()), -1.0);
        assert!((pcm16_to_f32(i16::MAX.to_le_bytes()) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn map_stereo_to_mono_averages() {
        assert_eq!(map_stereo(0.5, -0.5, 1, 0), 0.0);
        assert_eq!(map_stereo(1.0, 0.0, 1, 0), 0.5);
    }

    #[test]
    fn map_stereo_passes_through_and_silences_extra_channels() {
        assert_eq!(map_stereo(0.25, 0.75, 2, 0), 0.25);
        assert_eq!(map_stereo(0.25, 0.75, 2, 1), 0.75);
        assert_eq!(map_stereo(0.25, 0.75, 6, 4), 0.0);
    }
}
