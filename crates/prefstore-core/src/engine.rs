//! Storage engine: the heart of PrefStore.
//!
//! StorageEngine keeps the committed mapping in RAM as an immutable snapshot
//! and mirrors it to a `Medium` one whole snapshot at a time.
//!
//! **Read path**: clone the `Arc` of the committed snapshot under a brief read lock
//! **Write path**: copy snapshot, apply batch to the copy, persist the copy, publish it
//! **Failure**: nothing is published, so RAM and medium both keep the pre-batch state

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace};

use crate::config::Config;
use crate::error::StoreResult;
use crate::format::{decode_snapshot, encode_snapshot};
use crate::medium::Medium;

/// Committed key-value mapping. Never mutated once published.
pub type Snapshot = Arc<HashMap<String, String>>;

/// A single step of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert or overwrite a key
    Set { key: String, value: String },
    /// Delete a key; absent keys are ignored
    Remove { key: String },
    /// Delete every key
    Clear,
}

/// Snapshot engine: immutable RAM snapshots + atomic medium replacement.
///
/// All public methods take `&self` for concurrent access.
/// Readers grab the current snapshot and never wait on I/O.
/// Writers serialize through the medium Mutex, so at most one batch is in flight.
pub struct StorageEngine {
    /// Last committed mapping
    committed: RwLock<Snapshot>,
    /// Backing medium, single writer via Mutex
    medium: Mutex<Box<dyn Medium>>,
    /// Set once the medium has been read successfully
    loaded: AtomicBool,
    config: Config,
}

impl StorageEngine {
    /// Wrap a medium. Nothing is read until the first operation or `load()`.
    pub fn new(medium: Box<dyn Medium>, config: Config) -> Self {
        Self {
            committed: RwLock::new(Arc::new(HashMap::new())),
            medium: Mutex::new(medium),
            loaded: AtomicBool::new(false),
            config,
        }
    }

    /// Read the backing snapshot into RAM if that has not happened yet.
    ///
    /// A missing snapshot yields an empty mapping. Unparsable data is
    /// `StorageCorrupt`; an unreachable medium is `StorageUnavailable`.
    /// A failed load leaves the engine unloaded so the next call retries.
    pub fn load(&self) -> StoreResult<()> {
        let medium = self.medium.lock();
        self.load_locked(&**medium)
    }

    fn load_locked(&self, medium: &dyn Medium) -> StoreResult<()> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }

        let at = medium.location();
        let map = match medium.read().map_err(|e| e.with_path(at))? {
            Some(bytes) => decode_snapshot(&bytes).map_err(|e| {
                error!(path = ?at, error = %e, "snapshot could not be parsed");
                e.with_path(at)
            })?,
            None => HashMap::new(),
        };

        info!(path = ?at, entries = map.len(), "store loaded");
        *self.committed.write() = Arc::new(map);
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Current committed snapshot, loading on first use.
    ///
    /// The returned snapshot stays valid and unchanged while later batches commit.
    pub fn snapshot(&self) -> StoreResult<Snapshot> {
        if !self.loaded.load(Ordering::Acquire) {
            self.load()?;
        }
        Ok(Arc::clone(&self.committed.read()))
    }

    /// Apply `batch` in order and persist the result as one unit.
    ///
    /// WRITE ORDERING:
    /// 1. Copy the committed mapping and apply every mutation to the copy
    /// 2. Encode and replace the medium snapshot
    /// 3. Publish the copy as the committed mapping
    ///
    /// Every key and value is checked against the configured limits before
    /// step 1; an invalid mutation fails the whole batch with nothing applied.
    /// If step 2 fails the copy is dropped; neither RAM nor the medium change.
    /// Batches that leave the mapping unchanged skip steps 2 and 3.
    pub fn apply_batch(&self, batch: Vec<Mutation>) -> StoreResult<()> {
        self.validate_batch(&batch)?;

        let medium = self.medium.lock();
        self.load_locked(&**medium)?;

        let current = Arc::clone(&self.committed.read());
        let mut next: HashMap<String, String> = (*current).clone();
        let ops = batch.len();
        let mut changed = false;

        for mutation in batch {
            match mutation {
                Mutation::Set { key, value } => {
                    if next.get(&key) != Some(&value) {
                        next.insert(key, value);
                        changed = true;
                    }
                }
                Mutation::Remove { key } => {
                    changed |= next.remove(&key).is_some();
                }
                Mutation::Clear => {
                    changed |= !next.is_empty();
                    next.clear();
                }
            }
        }

        if !changed {
            trace!(ops, "batch left store unchanged");
            return Ok(());
        }

        let at = medium.location();
        let bytes = encode_snapshot(&next)?;
        if let Err(e) = medium.replace(&bytes, self.config.durable) {
            let e = e.with_path(at);
            error!(path = ?at, ops, error = %e, "batch rolled back");
            return Err(e);
        }

        debug!(ops, entries = next.len(), bytes = bytes.len(), "batch committed");
        *self.committed.write() = Arc::new(next);
        Ok(())
    }

    fn validate_batch(&self, batch: &[Mutation]) -> StoreResult<()> {
        self.config.check_batch_len(batch.len())?;
        let positioned = batch.len() > 1;
        for (i, mutation) in batch.iter().enumerate() {
            let position = positioned.then_some(i);
            match mutation {
                Mutation::Set { key, value } => {
                    self.config.check_key(key, position)?;
                    self.config.check_value(value, position)?;
                }
                Mutation::Remove { key } => self.config.check_key(key, position)?,
                Mutation::Clear => {}
            }
        }
        Ok(())
    }

    /// Write the committed mapping to the medium with a full sync,
    /// regardless of pending changes. Safe to call repeatedly.
    pub fn flush(&self) -> StoreResult<()> {
        let medium = self.medium.lock();
        self.load_locked(&**medium)?;

        let current = Arc::clone(&self.committed.read());
        let bytes = encode_snapshot(&current)?;
        let at = medium.location();
        medium.replace(&bytes, true).map_err(|e| e.with_path(at))?;
        debug!(path = ?at, entries = current.len(), "store flushed");
        Ok(())
    }

    /// Whether the backing snapshot has been read.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Backing location, if the medium has one.
    pub fn location(&self) -> Option<std::path::PathBuf> {
        self.medium.lock().location().map(|p| p.to_path_buf())
    }
}
