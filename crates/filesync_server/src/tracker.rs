//! Master file version tracking.
//!
//! The tracker owns the path of the authoritative file. Each read yields a
//! [`FileSnapshot`] whose version is the SHA-256 of exactly the bytes it
//! carries, so content and version can never come from different writes.

use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Result type for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Content written to a freshly created master file.
pub const DEFAULT_MASTER_CONTENT: &str = "# Master file for RMI File Synchronization System\n";

/// Maximum read attempts before giving up on a file that keeps changing.
const MAX_READ_ATTEMPTS: usize = 3;

/// Errors that can occur while reading the master file.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// I/O error on the master file.
    #[error("master file {path}: {source}")]
    Io {
        /// Path to the master file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The master file kept changing while it was being read.
    #[error("master file {path} kept changing during read")]
    Unstable {
        /// Path to the master file.
        path: PathBuf,
    },

    /// The master file is not valid UTF-8 text.
    #[error("master file {path} is not valid UTF-8")]
    NotUtf8 {
        /// Path to the master file.
        path: PathBuf,
    },
}

/// Version marker: lowercase hex SHA-256 of the file content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Computes the version of a byte sequence.
    pub fn of(content: &[u8]) -> Self {
        let digest = Sha256::digest(content);
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A consistent view of the master file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    /// Raw file bytes.
    pub content: Vec<u8>,
    /// Version derived from `content`.
    pub version: Version,
    /// Modification time observed alongside the read.
    pub last_modified: SystemTime,
}

impl FileSnapshot {
    /// Returns the content as text.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    /// Returns the modification time as Unix seconds.
    pub fn last_modified_secs(&self) -> f64 {
        unix_secs(self.last_modified)
    }
}

/// Tracks the authoritative file and its version.
#[derive(Debug)]
pub struct FileVersionTracker {
    path: PathBuf,
    /// Serializes readers so stat/read/stat triples do not interleave.
    read_lock: Mutex<()>,
    /// Last version handed out by [`FileVersionTracker::observe`].
    last_observed: RwLock<Option<Version>>,
}

impl FileVersionTracker {
    /// Opens a tracker over an existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be stat'ed.
    pub fn open(path: &Path) -> TrackerResult<Self> {
        fs::metadata(path).map_err(|source| TrackerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::unchecked(path))
    }

    /// Opens a tracker, creating the file with default content if missing.
    ///
    /// Parent directories are created as needed.
    pub fn open_or_create(path: &Path) -> TrackerResult<Self> {
        if !path.exists() {
            let io_err = |source| TrackerError::Io {
                path: path.to_path_buf(),
                source,
            };
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
            fs::write(path, DEFAULT_MASTER_CONTENT).map_err(io_err)?;
            tracing::info!("Created master file at {}", path.display());
        }
        Self::open(path)
    }

    fn unchecked(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            read_lock: Mutex::new(()),
            last_observed: RwLock::new(None),
        }
    }

    /// Returns the path of the tracked file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads a consistent snapshot of the file.
    ///
    /// The file is stat'ed before and after the read. If its length or
    /// modification time moved, the read is retried. A file that keeps
    /// changing for three consecutive reads is an error; bytes seen to
    /// change mid-read are never served. The version is always derived
    /// from the bytes being returned.
    pub fn status(&self) -> TrackerResult<FileSnapshot> {
        let _guard = self.read_lock.lock();
        settle(&self.path, || {
            let before = self.stat()?;
            let content = fs::read(&self.path).map_err(|source| self.io_error(source))?;
            let after = self.stat()?;
            Ok(RawRead {
                before: FileState::of(&before),
                content,
                after: FileState::of(&after),
            })
        })
    }

    /// Returns the current version.
    pub fn version(&self) -> TrackerResult<Version> {
        self.status().map(|snapshot| snapshot.version)
    }

    /// Returns the modification time of the file.
    pub fn last_modified(&self) -> TrackerResult<SystemTime> {
        self.stat().map(|meta| modified(&meta))
    }

    /// Reads a snapshot and reports whether its version differs from the
    /// one seen by the previous call. The first call always reports a change.
    pub fn observe(&self) -> TrackerResult<(FileSnapshot, bool)> {
        let snapshot = self.status()?;
        let mut last = self.last_observed.write();
        let changed = last.as_ref() != Some(&snapshot.version);
        if changed {
            tracing::debug!(
                "Master version changed: {:?} -> {}",
                last.as_ref().map(Version::as_str),
                snapshot.version
            );
            *last = Some(snapshot.version.clone());
        }
        Ok((snapshot, changed))
    }

    fn stat(&self) -> TrackerResult<Metadata> {
        fs::metadata(&self.path).map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: std::io::Error) -> TrackerError {
        TrackerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    pub(crate) fn not_utf8(&self) -> TrackerError {
        TrackerError::NotUtf8 {
            path: self.path.clone(),
        }
    }
}

/// Length and modification time, compared across one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileState {
    len: u64,
    modified: SystemTime,
}

impl FileState {
    fn of(meta: &Metadata) -> Self {
        Self {
            len: meta.len(),
            modified: modified(meta),
        }
    }
}

/// One stat/read/stat triple.
struct RawRead {
    before: FileState,
    content: Vec<u8>,
    after: FileState,
}

impl RawRead {
    fn is_stable(&self) -> bool {
        self.before == self.after && self.after.len == self.content.len() as u64
    }
}

/// Repeats `read_once` until a read is stable, up to [`MAX_READ_ATTEMPTS`].
fn settle(
    path: &Path,
    mut read_once: impl FnMut() -> TrackerResult<RawRead>,
) -> TrackerResult<FileSnapshot> {
    for attempt in 1..=MAX_READ_ATTEMPTS {
        let read = read_once()?;
        if read.is_stable() {
            let version = Version::of(&read.content);
            return Ok(FileSnapshot {
                content: read.content,
                version,
                last_modified: read.after.modified,
            });
        }
        tracing::debug!(
            "Master file changed during read (attempt {}), retrying",
            attempt
        );
    }

    tracing::warn!(
        "Master file {} kept changing during {} reads",
        path.display(),
        MAX_READ_ATTEMPTS
    );
    Err(TrackerError::Unstable {
        path: path.to_path_buf(),
    })
}

fn modified(meta: &Metadata) -> SystemTime {
    meta.modified().unwrap_or(UNIX_EPOCH)
}

/// Converts a timestamp to fractional Unix seconds.
pub fn unix_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
