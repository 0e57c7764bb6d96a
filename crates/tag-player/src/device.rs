//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - picking a stream config that runs at the track rate (no resampling)

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

use crate::container::{REQUIRED_CHANNELS, REQUIRED_SAMPLE_RATE};

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
///
/// Returns an error if no suitable device is found.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose an output config running at exactly 44.1 kHz.
///
/// Among configs that support the rate, prefers stereo, then the sample format
/// ranked by [`sample_format_rank`].
pub fn pick_output_config(device: &cpal::Device) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();
    if ranges.is_empty() {
        return Err(anyhow!("No supported output configs"));
    }

    let mut best: Option<((bool, u8), cpal::SupportedStreamConfigRange)> = None;
    for range in ranges {
        if !supports_rate(range.min_sample_rate(), range.max_sample_rate(), REQUIRED_SAMPLE_RATE) {
            continue;
        }
        let key = (
            range.channels() != REQUIRED_CHANNELS,
            sample_format_rank(range.sample_format()),
        );
        let replace = match &best {
            None => true,
            Some((best_key, _)) => key < *best_key,
        };
        if replace {
            best = Some((key, range));
        }
    }

    best.map(|(_, range)| range.with_sample_rate(REQUIRED_SAMPLE_RATE))
        .ok_or_else(|| anyhow!("No output config supports {REQUIRED_SAMPLE_RATE} Hz"))
}

/// Prefer a fixed buffer size if the device advertises one.
///
/// Picks the largest size up to a cap to reduce underruns. Returns `None` when
/// the device only supports the default buffer size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            const MAX_FRAMES: u32 = 4096;
            let chosen = if *max > MAX_FRAMES {
                if *min > MAX_FRAMES { *min } else { MAX_FRAMES }
            } else {
                *max
            };
            Some(cpal::BufferSize::Fixed(chosen))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn supports_rate(min: u32, max: u32, rate: u32) -> bool {
    min <= rate && rate <= max
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// Print available output devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
