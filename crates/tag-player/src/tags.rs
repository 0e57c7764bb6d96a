//! Tag UIDs, the tag-reader seam, and UID → track selection.

use std::fmt;
use std::io;
use std::str::FromStr;

use crossbeam_channel::Receiver;

use crate::error::PlaybackError;

/// Unique identifier read from a presented tag (4–7 bytes).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Uid(Vec<u8>);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UidError {
    #[error("UID must be {min}-{max} bytes, got {0}", min = Uid::MIN_LEN, max = Uid::MAX_LEN)]
    Length(usize),
    #[error("invalid hex in UID: {0:?}")]
    Hex(String),
}

impl Uid {
    pub const MIN_LEN: usize = 4;
    pub const MAX_LEN: usize = 7;

    pub fn new(bytes: &[u8]) -> Result<Self, UidError> {
        if !(Self::MIN_LEN..=Self::MAX_LEN).contains(&bytes.len()) {
            return Err(UidError::Length(bytes.len()));
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for Uid {
    type Err = UidError;

    /// Accepts `DE:AD:BE:EF`, `de-ad-be-ef`, `de ad be ef` or `deadbeef`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .chars()
            .filter(|c| !(c.is_whitespace() || matches!(*c, ':' | '-')))
            .collect();
        if digits.len() % 2 != 0 {
            return Err(UidError::Hex(s.trim().to_string()));
        }
        let bytes = (0..digits.len())
            .step_by(2)
            .map(|i| {
                digits
                    .get(i..i + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(|| UidError::Hex(s.trim().to_string()))
            })
            .collect::<Result<Vec<u8>, _>>()?;
        Self::new(&bytes)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

/// Tag-reader collaborator.
pub trait TagReader {
    /// One poll of the reader: `None` when no tag is in the field.
    fn poll(&mut self) -> io::Result<Option<Uid>>;
}

/// [`TagReader`] fed from a channel (stdin thread, tests, remote input).
pub struct ChannelTagReader {
    rx: Receiver<Uid>,
}

impl ChannelTagReader {
    pub fn new(rx: Receiver<Uid>) -> Self {
        Self { rx }
    }
}

impl TagReader for ChannelTagReader {
    fn poll(&mut self) -> io::Result<Option<Uid>> {
        match self.rx.try_recv() {
            Ok(uid) => Ok(Some(uid)),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
            Err(crossbeam_channel::TryRecvError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "tag input closed",
            )),
        }
    }
}

/// UID → track path table. Matching is exact on bytes and length; there is no
/// default track.
#[derive(Clone, Debug, Default)]
pub struct TrackMap {
    entries: Vec<(Uid, String)>,
}

impl TrackMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory tag table: three demo tags on the first three track folders.
    pub fn factory() -> Self {
        let mut map = Self::new();
        for (uid, path) in [
            ([0xDE, 0xAD, 0xBE, 0xEF], "/sdcard/1/music1.wav"),
            ([0xAA, 0xBB, 0xCC, 0xDD], "/sdcard/2/music2.wav"),
            ([0x11, 0x22, 0x33, 0x44], "/sdcard/3/music3.wav"),
        ] {
            map.insert(Uid(uid.to_vec()), path);
        }
        map
    }

    /// Add or replace the track for `uid`.
    pub fn insert(&mut self, uid: Uid, path: impl Into<String>) {
        let path = path.into();
        match self.entries.iter_mut().find(|(u, _)| *u == uid) {
            Some(entry) => entry.1 = path,
            None => self.entries.push((uid, path)),
        }
    }

    pub fn lookup(&self, uid: &Uid) -> Option<&str> {
        self.entries
            .iter()
            .find(|(u, _)| u == uid)
            .map(|(_, p)| p.as_str())
    }

    /// Like [`TrackMap::lookup`], but an unknown UID is an [`PlaybackError::UnmappedTag`].
    pub fn select(&self, uid: &Uid) -> Result<&str, PlaybackError> {
        self.lookup(uid)
            .ok_or_else(|| PlaybackError::UnmappedTag(uid.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
