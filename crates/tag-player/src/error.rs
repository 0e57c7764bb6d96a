//! Error taxonomy for track selection and playback.
//!
//! Every variant fails only the current selection attempt; the control loop
//! logs it and goes back to waiting for the next tag.

use std::io;

/// Errors surfaced while selecting, opening, or streaming a track.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// The storage path is missing or unreadable.
    #[error("open {path}: {source}")]
    StorageOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Storage failed mid-read while the container was being parsed.
    #[error("storage read: {0}")]
    Storage(#[from] io::Error),

    /// Header tags, encoding, or stream layout don't match what the player supports.
    #[error("unsupported container: {0}")]
    Format(String),

    /// Storage ran out before a sample-data chunk was found.
    #[error("no data chunk in container")]
    NoDataChunk,

    /// The sample-data chunk declares zero bytes.
    #[error("data chunk is empty")]
    EmptyData,

    /// Storage ran dry while sample bytes were still expected.
    #[error("stream truncated with {remaining} bytes outstanding")]
    TruncatedStream { remaining: u64 },

    /// The tag UID has no configured track.
    #[error("no track mapped for tag {0}")]
    UnmappedTag(String),

    /// The transport refused to take the data source.
    #[error("transport: {0}")]
    Transport(String),
}

impl PlaybackError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Short machine-friendly label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StorageOpen { .. } => "storage_open",
            Self::Storage(_) => "storage",
            Self::Format(_) => "format",
            Self::NoDataChunk => "no_data_chunk",
            Self::EmptyData => "empty_data",
            Self::TruncatedStream { .. } => "truncated_stream",
            Self::UnmappedTag(_) => "unmapped_tag",
            Self::Transport(_) => "transport",
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = PlaybackError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(PlaybackError::NoDataChunk.kind(), "no_data_chunk");
        assert_eq!(PlaybackError::EmptyData.kind(), "empty_data");
        assert_eq!(PlaybackError::format("x").kind(), "format");
        assert_eq!(
            PlaybackError::TruncatedStream { remaining: 4 }.kind(),
            "truncated_stream"
        );
    }

    #[test]
    fn storage_open_message_includes_path() {
        let err = PlaybackError::StorageOpen {
            path: "/sdcard/1/music1.wav".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/sdcard/1/music1.wav"));
    }
}
