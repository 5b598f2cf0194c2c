//! Backing media for store snapshots
//!
//! A `Medium` holds exactly one snapshot and replaces it as a whole.
//! `FileMedium` is the on-disk implementation; `MemoryMedium` keeps the
//! snapshot in process memory and can simulate an unreachable or read-only
//! medium.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::{StoreError, StoreResult};
use crate::platform_durability::{sync_dir, sync_file};

/// Storage for a single, atomically replaceable snapshot.
pub trait Medium: Send + Sync {
    /// Read the current snapshot. `Ok(None)` means nothing has been written yet.
    fn read(&self) -> StoreResult<Option<Vec<u8>>>;

    /// Replace the snapshot with `bytes`. Either the whole buffer becomes the
    /// new snapshot or the previous one is left in place.
    fn replace(&self, bytes: &[u8], durable: bool) -> StoreResult<()>;

    /// Where the snapshot lives, for diagnostics.
    fn location(&self) -> Option<&Path> {
        None
    }
}

/// Snapshot stored in a single file, replaced via write-temp-then-rename.
///
/// Commit sequence:
/// 1. Write the buffer to `<path>.tmp`
/// 2. Sync the temp file, always, so the rename can never expose a short file
/// 3. Rename the temp file over `<path>`. This is the commit point.
/// 4. Sync the parent directory (durable mode only)
///
/// A crash before step 3 leaves the old snapshot and an orphaned temp file,
/// which the next `read` removes.
#[derive(Debug, Clone)]
pub struct FileMedium {
    path: PathBuf,
    temp_path: PathBuf,
    dir: PathBuf,
}

impl FileMedium {
    /// Describe a snapshot file without touching the filesystem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut temp = path.clone().into_os_string();
        temp.push(".tmp");
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self { path, temp_path: PathBuf::from(temp), dir }
    }

    /// Like `new`, but also creates the parent directory.
    pub fn create(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let medium = Self::new(path);
        fs::create_dir_all(&medium.dir)
            .map_err(|e| StoreError::io_at(&medium.dir, "failed to create store directory", &e))?;
        Ok(medium)
    }

    /// Snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_dir(&self) -> StoreResult<()> {
        let meta = fs::metadata(&self.dir)
            .map_err(|e| StoreError::io_at(&self.dir, "store directory unreachable", &e))?;
        if !meta.is_dir() {
            return Err(StoreError::StorageUnavailable {
                path: Some(self.dir.clone()),
                kind: io::ErrorKind::Other,
                message: "store location is not a directory".to_string(),
            });
        }
        Ok(())
    }

    fn write_temp(&self, bytes: &[u8]) -> StoreResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.temp_path)
            .map_err(|e| StoreError::io_at(&self.temp_path, "failed to create temp snapshot", &e))?;
        file.write_all(bytes)
            .map_err(|e| StoreError::io_at(&self.temp_path, "failed to write temp snapshot", &e))?;
        sync_file(&file).map_err(|e| StoreError::io_at(&self.temp_path, "failed to sync temp snapshot", &e))?;
        Ok(())
    }
}

impl Medium for FileMedium {
    fn read(&self) -> StoreResult<Option<Vec<u8>>> {
        self.check_dir()?;

        match fs::remove_file(&self.temp_path) {
            Ok(()) => warn!(path = %self.temp_path.display(), "removed temp snapshot left by an interrupted commit"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io_at(&self.temp_path, "failed to remove stale temp snapshot", &e)),
        }

        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io_at(&self.path, "failed to read snapshot", &e)),
        }
    }

    fn replace(&self, bytes: &[u8], durable: bool) -> StoreResult<()> {
        let committed = self.write_temp(bytes).and_then(|()| {
            fs::rename(&self.temp_path, &self.path)
                .map_err(|e| StoreError::io_at(&self.path, "failed to move snapshot into place", &e))
        });
        if let Err(err) = committed {
            let _ = fs::remove_file(&self.temp_path);
            return Err(err);
        }

        // The rename already committed; a failed directory sync cannot be undone.
        if durable {
            if let Err(e) = sync_dir(&self.dir) {
                warn!(dir = %self.dir.display(), error = %e, "directory sync after commit failed");
            }
        }
        trace!(path = %self.path.display(), bytes = bytes.len(), "snapshot replaced");
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    snapshot: Mutex<Option<Vec<u8>>>,
    read_only: AtomicBool,
    unreachable: AtomicBool,
}

/// In-process medium. Clones share the same snapshot, so a test can keep a
/// handle and flip failure switches while a store owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedium {
    state: Arc<MemoryState>,
}

impl MemoryMedium {
    /// Empty medium: the first read reports no snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Medium pre-loaded with raw snapshot bytes.
    pub fn with_contents(bytes: Vec<u8>) -> Self {
        let medium = Self::new();
        *medium.state.snapshot.lock() = Some(bytes);
        medium
    }

    /// Make every `replace` fail with `PermissionDenied`.
    pub fn set_read_only(&self, on: bool) {
        self.state.read_only.store(on, Ordering::Release);
    }

    /// Make every `read` and `replace` fail with `NotConnected`.
    pub fn set_unreachable(&self, on: bool) {
        self.state.unreachable.store(on, Ordering::Release);
    }

    /// Copy of the stored snapshot bytes.
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.state.snapshot.lock().clone()
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.state.unreachable.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "memory medium unreachable").into());
        }
        Ok(())
    }
}

impl Medium for MemoryMedium {
    fn read(&self) -> StoreResult<Option<Vec<u8>>> {
        self.check_reachable()?;
        Ok(self.contents())
    }

    fn replace(&self, bytes: &[u8], _durable: bool) -> StoreResult<()> {
        self.check_reachable()?;
        if self.state.read_only.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "memory medium is read-only").into());
        }
        *self.state.snapshot.lock() = Some(bytes.to_vec());
        Ok(())
    }
}
