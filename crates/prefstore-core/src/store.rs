//! Public operation surface.
//!
//! Every write is validated in full and then handed to the engine as a
//! single batch, so single-key and multi-key writes share the same
//! all-or-nothing guarantee.

use std::path::{Path, PathBuf};

use tracing::{info, trace};

use crate::config::Config;
use crate::engine::{Mutation, StorageEngine};
use crate::error::StoreResult;
use crate::medium::{FileMedium, Medium};

/// Durable string-to-string store with atomic multi-key operations.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct KeyValueStore {
    engine: StorageEngine,
}

impl KeyValueStore {
    /// Open the store backed by the snapshot file at `path`.
    ///
    /// Creates the parent directory. The file itself is read on first access.
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> StoreResult<Self> {
        config.validate()?;
        let medium = FileMedium::create(path.as_ref())?;
        Self::with_medium(medium, config)
    }

    /// Open a store on any backing medium.
    pub fn with_medium<M: Medium + 'static>(medium: M, config: Config) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self { engine: StorageEngine::new(Box::new(medium), config) })
    }

    /// Force the backing snapshot to be read now instead of on first access.
    pub fn load(&self) -> StoreResult<()> {
        self.engine.load()
    }

    /// Store `value` under `key`, overwriting any previous value.
    pub fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_key(key, None)?;
        self.check_value(value, None)?;
        self.engine.apply_batch(vec![Mutation::Set { key: key.to_owned(), value: value.to_owned() }])
    }

    /// Value stored under `key`; `None` if it was never written or was removed.
    pub fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_key(key, None)?;
        let snapshot = self.engine.snapshot()?;
        trace!(key, "get_item");
        Ok(snapshot.get(key).cloned())
    }

    /// Delete `key`. Removing an absent key succeeds without effect.
    pub fn remove_item(&self, key: &str) -> StoreResult<()> {
        self.check_key(key, None)?;
        self.engine.apply_batch(vec![Mutation::Remove { key: key.to_owned() }])
    }

    /// Write every pair or none of them.
    ///
    /// All pairs are validated before anything is applied; the first invalid
    /// pair fails the call. Later pairs win over earlier ones with the same key.
    pub fn multi_set<K, V>(&self, pairs: &[(K, V)]) -> StoreResult<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.check_batch_len(pairs.len())?;
        for (i, (key, value)) in pairs.iter().enumerate() {
            self.check_key(key.as_ref(), Some(i))?;
            self.check_value(value.as_ref(), Some(i))?;
        }

        let batch = pairs
            .iter()
            .map(|(k, v)| Mutation::Set { key: k.as_ref().to_owned(), value: v.as_ref().to_owned() })
            .collect();
        self.engine.apply_batch(batch)
    }

    /// Look up several keys against one snapshot.
    ///
    /// Output has the same length and order as `keys`; unknown keys map to `None`.
    pub fn multi_get<K: AsRef<str>>(&self, keys: &[K]) -> StoreResult<Vec<(String, Option<String>)>> {
        self.check_batch_len(keys.len())?;
        for (i, key) in keys.iter().enumerate() {
            self.check_key(key.as_ref(), Some(i))?;
        }

        let snapshot = self.engine.snapshot()?;
        Ok(keys
            .iter()
            .map(|k| {
                let k = k.as_ref();
                (k.to_owned(), snapshot.get(k).cloned())
            })
            .collect())
    }

    /// Delete several keys as one batch.
    pub fn multi_remove<K: AsRef<str>>(&self, keys: &[K]) -> StoreResult<()> {
        self.check_batch_len(keys.len())?;
        for (i, key) in keys.iter().enumerate() {
            self.check_key(key.as_ref(), Some(i))?;
        }

        let batch = keys.iter().map(|k| Mutation::Remove { key: k.as_ref().to_owned() }).collect();
        self.engine.apply_batch(batch)
    }

    /// Delete every entry in one batch.
    pub fn clear(&self) -> StoreResult<()> {
        self.engine.apply_batch(vec![Mutation::Clear])
    }

    /// Every stored key. Order is stable for a given snapshot only.
    pub fn get_all_keys(&self) -> StoreResult<Vec<String>> {
        let snapshot = self.engine.snapshot()?;
        Ok(snapshot.keys().cloned().collect())
    }

    /// Check if `key` is stored.
    pub fn contains_key(&self, key: &str) -> StoreResult<bool> {
        self.check_key(key, None)?;
        Ok(self.engine.snapshot()?.contains_key(key))
    }

    /// Number of stored entries.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.engine.snapshot()?.len())
    }

    /// Returns true if the store has no entries.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.engine.snapshot()?.is_empty())
    }

    /// Rewrite the committed mapping to the backing medium with a full sync.
    pub fn flush(&self) -> StoreResult<()> {
        self.engine.flush()
    }

    /// Flush and release the store.
    pub fn close(self) -> StoreResult<()> {
        self.engine.flush()?;
        info!(path = ?self.engine.location(), "store closed");
        Ok(())
    }

    /// Backing snapshot file, if the store is file-backed.
    pub fn location(&self) -> Option<PathBuf> {
        self.engine.location()
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        self.engine.config()
    }

    fn check_key(&self, key: &str, position: Option<usize>) -> StoreResult<()> {
        self.config().check_key(key, position)
    }

    fn check_value(&self, value: &str, position: Option<usize>) -> StoreResult<()> {
        self.config().check_value(value, position)
    }

    fn check_batch_len(&self, len: usize) -> StoreResult<()> {
        self.config().check_batch_len(len)
    }
}
