//! RIFF/WAVE container parsing.
//!
//! Validates the stream format and leaves the reader positioned on the first
//! byte of the sample-data chunk. Only 44.1 kHz / 16-bit / stereo linear PCM is
//! accepted; anything else is rejected before a single sample byte is read.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{PlaybackError, Result};

const RIFF_TAG: &[u8; 4] = b"RIFF";
const WAVE_TAG: &[u8; 4] = b"WAVE";
const FMT_TAG: &[u8; 4] = b"fmt ";
const DATA_TAG: &[u8; 4] = b"data";

/// Size of the fixed `fmt ` payload the parser understands.
const FMT_PAYLOAD_LEN: usize = 16;

/// Linear PCM format code.
pub const FORMAT_PCM: u16 = 1;
pub const REQUIRED_CHANNELS: u16 = 2;
pub const REQUIRED_SAMPLE_RATE: u32 = 44_100;
pub const REQUIRED_BITS_PER_SAMPLE: u16 = 16;

/// Declared stream format from the `fmt ` record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContainerFormat {
    pub format_code: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl ContainerFormat {
    fn parse(payload: &[u8; FMT_PAYLOAD_LEN]) -> Self {
        Self {
            format_code: u16::from_le_bytes([payload[0], payload[1]]),
            channels: u16::from_le_bytes([payload[2], payload[3]]),
            sample_rate: u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]),
            byte_rate: u32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]]),
            block_align: u16::from_le_bytes([payload[12], payload[13]]),
            bits_per_sample: u16::from_le_bytes([payload[14], payload[15]]),
        }
    }

    /// Bytes per interleaved frame (one sample per channel).
    pub fn frame_size(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bits_per_sample / 8)
    }

    fn validate(&self) -> Result<()> {
        if self.format_code != FORMAT_PCM {
            return Err(PlaybackError::format(format!(
                "format code {} is not linear PCM",
                self.format_code
            )));
        }
        if self.channels != REQUIRED_CHANNELS {
            return Err(PlaybackError::format(format!(
                "{} channels (need {REQUIRED_CHANNELS})",
                self.channels
            )));
        }
        if self.sample_rate != REQUIRED_SAMPLE_RATE {
            return Err(PlaybackError::format(format!(
                "{} Hz (need {REQUIRED_SAMPLE_RATE})",
                self.sample_rate
            )));
        }
        if self.bits_per_sample != REQUIRED_BITS_PER_SAMPLE {
            return Err(PlaybackError::format(format!(
                "{} bits per sample (need {REQUIRED_BITS_PER_SAMPLE})",
                self.bits_per_sample
            )));
        }
        Ok(())
    }
}

/// Read-only view of a container's outstanding sample bytes.
///
/// Handed to the control context so it can watch for completion without
/// touching the streaming state.
#[derive(Clone, Debug)]
pub struct RemainingBytes(Arc<AtomicU64>);

impl RemainingBytes {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// An opened track: storage reader, validated format, and outstanding sample bytes.
///
/// The reader is positioned inside the sample-data chunk for the whole lifetime
/// of the container. Dropping the container releases the storage handle.
pub struct TrackContainer<R> {
    reader: R,
    format: ContainerFormat,
    data_len: u64,
    remaining: Arc<AtomicU64>,
}

impl<R: Read + Seek> TrackContainer<R> {
    /// Parse the container header and position `reader` at the sample data.
    pub fn open(mut reader: R) -> Result<Self> {
        let mut preamble = [0u8; 12];
        if read_full(&mut reader, &mut preamble)? < preamble.len() {
            return Err(PlaybackError::format("header shorter than RIFF preamble"));
        }
        if &preamble[0..4] != RIFF_TAG || &preamble[8..12] != WAVE_TAG {
            return Err(PlaybackError::format("missing RIFF/WAVE tags"));
        }

        let mut format: Option<ContainerFormat> = None;
        // (offset of first sample byte, declared length) for a data chunk that
        // appeared ahead of `fmt `.
        let mut pending_data: Option<(u64, u64)> = None;

        loop {
            let mut header = [0u8; 8];
            if read_full(&mut reader, &mut header)? < header.len() {
                break;
            }
            let tag: [u8; 4] = [header[0], header[1], header[2], header[3]];
            let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;

            if &tag == FMT_TAG {
                let fmt = read_format(&mut reader, len)?;
                fmt.validate()?;
                tracing::debug!(
                    channels = fmt.channels,
                    rate_hz = fmt.sample_rate,
                    bits = fmt.bits_per_sample,
                    "container format accepted"
                );
                format = Some(fmt);
                if let Some((offset, data_len)) = pending_data {
                    if data_len == 0 {
                        return Err(PlaybackError::EmptyData);
                    }
                    reader.seek(SeekFrom::Start(offset))?;
                    return Ok(Self::new(reader, fmt, data_len));
                }
            } else if &tag == DATA_TAG {
                // Format errors take precedence: an empty data chunk ahead of
                // `fmt ` is only reported once the format has been accepted.
                match format {
                    Some(_) if len == 0 => return Err(PlaybackError::EmptyData),
                    Some(fmt) => return Ok(Self::new(reader, fmt, len)),
                    None => {
                        let offset = reader.stream_position()?;
                        pending_data = Some((offset, len));
                        skip(&mut reader, len)?;
                    }
                }
            } else {
                tracing::trace!(tag = %String::from_utf8_lossy(&tag), len, "skipping chunk");
                skip(&mut reader, len)?;
            }
        }

        if format.is_none() {
            return Err(PlaybackError::format("missing fmt chunk"));
        }
        Err(PlaybackError::NoDataChunk)
    }

    fn new(reader: R, format: ContainerFormat, data_len: u64) -> Self {
        Self {
            reader,
            format,
            data_len,
            remaining: Arc::new(AtomicU64::new(data_len)),
        }
    }
}

impl<R> TrackContainer<R> {
    pub fn format(&self) -> &ContainerFormat {
        &self.format
    }

    /// Declared length of the sample-data chunk.
    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    pub fn bytes_remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn remaining_handle(&self) -> RemainingBytes {
        RemainingBytes(self.remaining.clone())
    }

    pub(crate) fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Account for `n` sample bytes moved into the transport-visible buffer.
    pub(crate) fn consume(&mut self, n: u64) {
        let left = self.bytes_remaining().saturating_sub(n);
        self.remaining.store(left, Ordering::Release);
    }

    /// Give up on the rest of the sample data (truncated or unusable tail).
    pub(crate) fn abandon(&mut self) {
        self.remaining.store(0, Ordering::Release);
    }
}

fn read_format<R: Read + Seek>(reader: &mut R, len: u64) -> Result<ContainerFormat> {
    if len < FMT_PAYLOAD_LEN as u64 {
        return Err(PlaybackError::format(format!("fmt chunk is {len} bytes")));
    }
    let mut payload = [0u8; FMT_PAYLOAD_LEN];
    if read_full(reader, &mut payload)? < FMT_PAYLOAD_LEN {
        return Err(PlaybackError::format("fmt chunk cut short"));
    }
    skip(reader, len - FMT_PAYLOAD_LEN as u64)?;
    Ok(ContainerFormat::parse(&payload))
}

fn skip<R: Seek>(reader: &mut R, len: u64) -> io::Result<()> {
    if len > 0 {
        let offset = i64::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk length overflow"))?;
        reader.seek(SeekFrom::Current(offset))?;
    }
    Ok(())
}

/// Read until `buf` is full or the reader reports end of data.
///
/// Returns how many bytes landed in `buf`.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
