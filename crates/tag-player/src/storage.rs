//! Track storage backends.
//!
//! Tracks are addressed by firmware-style paths (`/sdcard/1/music1.wav`). The
//! filesystem backend maps the mount point onto a host directory.

use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::{Component, Path, PathBuf};

use crate::error::{PlaybackError, Result};

/// Storage collaborator: opens a track path for block reads.
pub trait TrackStorage {
    type Reader: Read + Seek + Send + 'static;

    /// Open `path`, failing with [`PlaybackError::StorageOpen`].
    fn open(&self, path: &str) -> Result<Self::Reader>;
}

/// Filesystem storage rooted at a host directory.
#[derive(Clone, Debug)]
pub struct FsStorage {
    mount_point: String,
    root: PathBuf,
}

impl FsStorage {
    /// Paths under `mount_point` resolve inside `root`; any other path is used as-is.
    pub fn new(mount_point: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let mount_point = mount_point.into().trim_end_matches('/').to_string();
        Self {
            mount_point,
            root: root.into(),
        }
    }

    pub fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let Some(rest) = self.strip_mount(path) else {
            return Ok(PathBuf::from(path));
        };
        let rel = Path::new(rest.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path escapes the mount point",
            ));
        }
        Ok(self.root.join(rel))
    }

    fn strip_mount<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.mount_point.is_empty() {
            return None;
        }
        let rest = path.strip_prefix(self.mount_point.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

impl TrackStorage for FsStorage {
    type Reader = File;

    fn open(&self, path: &str) -> Result<File> {
        let open_err = |source: io::Error| PlaybackError::StorageOpen {
            path: path.to_string(),
            source,
        };
        let host_path = self.resolve(path).map_err(open_err)?;
        tracing::debug!(path, host_path = %host_path.display(), "opening track");
        File::open(&host_path).map_err(open_err)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::container::tests::FailAfter;
    use std::collections::HashMap;
    use std::io::SeekFrom;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reader that counts how many times it has been dropped (released).
    pub(crate) struct TrackedReader {
        inner: FailAfter,
        released: Arc<AtomicUsize>,
    }

    impl Read for TrackedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Seek for TrackedReader {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    impl Drop for TrackedReader {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// In-memory storage keyed by track path.
    #[derive(Default)]
    pub(crate) struct MemoryStorage {
        /// Path -> (contents, offset at which reads start failing).
        files: HashMap<String, (Vec<u8>, u64)>,
        pub(crate) opened: Arc<AtomicUsize>,
        pub(crate) released: Arc<AtomicUsize>,
    }

    impl MemoryStorage {
        pub(crate) fn with(self, path: &str, bytes: Vec<u8>) -> Self {
            self.with_failure(path, bytes, u64::MAX)
        }

        /// Like [`MemoryStorage::with`], but reads fail from byte `fail_at` on.
        pub(crate) fn with_failure(mut self, path: &str, bytes: Vec<u8>, fail_at: u64) -> Self {
            self.files.insert(path.to_string(), (bytes, fail_at));
            self
        }
    }

    impl TrackStorage for MemoryStorage {
        type Reader = TrackedReader;

        fn open(&self, path: &str) -> Result<TrackedReader> {
            let (bytes, fail_at) = self
                .files
                .get(path)
                .cloned()
                .ok_or_else(|| PlaybackError::StorageOpen {
                    path: path.to_string(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such track"),
                })?;
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(TrackedReader {
                inner: FailAfter::new(bytes, fail_at),
                released: self.released.clone(),
            })
        }
    }

    #[test]
    fn resolve_maps_mount_point_onto_root() {
        let s = FsStorage::new("/sdcard/", "/srv/tracks");
        assert_eq!(
            s.resolve("/sdcard/1/music1.wav").unwrap(),
            PathBuf::from("/srv/tracks/1/music1.wav")
        );
        assert_eq!(s.resolve("/tmp/x.wav").unwrap(), PathBuf::from("/tmp/x.wav"));
        assert_eq!(
            s.resolve("/sdcardx/a.wav").unwrap(),
            PathBuf::from("/sdcardx/a.wav")
        );
    }

    #[test]
    fn resolve_rejects_parent_components() {
        let s = FsStorage::new("/sdcard", "/srv/tracks");
        assert!(s.resolve("/sdcard/../etc/passwd").is_err());
    }

    #[test]
    fn missing_file_is_storage_open_error() {
        let dir = std::env::temp_dir().join(format!("tag-player-missing-{}", std::process::id()));
        let s = FsStorage::new("/sdcard", &dir);
        let err = s.open("/sdcard/none.wav").unwrap_err();
        assert!(matches!(err, PlaybackError::StorageOpen { .. }));
    }

    #[test]
    fn fs_storage_opens_existing_file() {
        let dir = std::env::temp_dir().join(format!("tag-player-fs-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("1")).unwrap();
        std::fs::write(dir.join("1/music1.wav"), b"RIFF").unwrap();

        let s = FsStorage::new("/sdcard", &dir);
        let mut f = s.open("/sdcard/1/music1.wav").unwrap();
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"RIFF");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
