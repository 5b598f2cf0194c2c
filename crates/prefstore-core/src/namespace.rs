//! Named stores under one root directory
//!
//! Each namespace maps to `<root>/<name>.prefs`. A namespace is opened at
//! most once per `Namespaces` value and shared between callers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::store::KeyValueStore;

/// Snapshot file extension for namespace stores
pub const NAMESPACE_EXTENSION: &str = "prefs";

/// Maximum namespace name length in characters
pub const MAX_NAMESPACE_LEN: usize = 64;

/// Registry of open namespace stores.
pub struct Namespaces {
    root: PathBuf,
    config: Config,
    open: Mutex<HashMap<String, Arc<KeyValueStore>>>,
}

impl Namespaces {
    /// Use `root` as the home of all namespace files, creating it if needed.
    pub fn open<P: AsRef<Path>>(root: P, config: Config) -> StoreResult<Self> {
        config.validate()?;
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| StoreError::io_at(&root, "failed to create namespace root", &e))?;
        Ok(Self { root, config, open: Mutex::new(HashMap::new()) })
    }

    /// Store for `name`, opened on first request and shared afterwards.
    pub fn store(&self, name: &str) -> StoreResult<Arc<KeyValueStore>> {
        validate_name(name)?;

        let mut open = self.open.lock();
        if let Some(store) = open.get(name) {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(KeyValueStore::open(self.path_for(name), self.config.clone())?);
        info!(namespace = name, "namespace opened");
        open.insert(name.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// Namespaces with a snapshot file under the root, opened or not. Sorted.
    pub fn list(&self) -> StoreResult<Vec<String>> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| StoreError::io_at(&self.root, "failed to list namespace root", &e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io_at(&self.root, "failed to read namespace root entry", &e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(NAMESPACE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }

        // Opened namespaces that have not committed anything yet have no file
        for name in self.open.lock().keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Flush every open namespace. Stops at the first failure.
    pub fn flush_all(&self) -> StoreResult<()> {
        let stores: Vec<(String, Arc<KeyValueStore>)> = self
            .open
            .lock()
            .iter()
            .map(|(name, store)| (name.clone(), Arc::clone(store)))
            .collect();

        for (name, store) in stores {
            store.flush()?;
            debug!(namespace = %name, "namespace flushed");
        }
        Ok(())
    }

    /// Flush everything and forget the open stores. Handles already given
    /// out stay usable.
    pub fn close(self) -> StoreResult<()> {
        self.flush_all()?;
        let count = self.open.lock().len();
        info!(root = %self.root.display(), namespaces = count, "namespaces closed");
        Ok(())
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, NAMESPACE_EXTENSION))
    }
}

/// Names become file names, so they are restricted to `[a-z0-9_.-]`,
/// must not start with `.`, and are at most `MAX_NAMESPACE_LEN` long.
/// Lowercase only: on case-insensitive filesystems `A` and `a` would share a file.
fn validate_name(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAMESPACE_LEN
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidNamespace(name.to_string()))
    }
}
