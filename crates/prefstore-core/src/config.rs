//! Configuration management for PrefStore
//!
//! Provides presets for different device classes and a validator
//! that stores run before touching the backing medium.

use crate::error::{StoreError, StoreResult};

/// Hard ceiling for `max_key_size`.
const KEY_SIZE_CEILING: usize = 64 * 1024;

/// Hard ceiling for `max_value_size`.
const VALUE_SIZE_CEILING: usize = 256 * 1024 * 1024;

/// PrefStore configuration with device-class presets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum key size in bytes
    pub max_key_size: usize,
    /// Maximum value size in bytes
    pub max_value_size: usize,
    /// Maximum number of entries accepted by a single multi-key call
    pub max_batch_len: usize,
    /// Sync the parent directory after every commit so the rename itself is
    /// durable. The temp snapshot is synced before the rename either way;
    /// when false a crash may lose the latest commits but never tears the file.
    pub durable: bool,
}

impl Config {
    /// Desktop-class: generous limits, full durability
    pub fn desktop() -> Self {
        Self {
            max_key_size: 1024,
            max_value_size: 16 * 1024 * 1024,
            max_batch_len: 100_000,
            durable: true,
        }
    }

    /// Phone-class: tighter value limit, full durability
    pub fn mobile() -> Self {
        Self {
            max_key_size: 512,
            max_value_size: 2 * 1024 * 1024,
            max_batch_len: 10_000,
            durable: true,
        }
    }

    /// Small devices and flash media that cannot afford a directory sync per commit
    pub fn embedded() -> Self {
        Self {
            max_key_size: 128,
            max_value_size: 64 * 1024,
            max_batch_len: 1_000,
            durable: false,
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> StoreResult<()> {
        if self.max_key_size == 0 || self.max_key_size > KEY_SIZE_CEILING {
            return Err(StoreError::InvalidConfig(format!(
                "max_key_size must be in [1, {}]",
                KEY_SIZE_CEILING
            )));
        }
        if self.max_value_size == 0 || self.max_value_size > VALUE_SIZE_CEILING {
            return Err(StoreError::InvalidConfig("max_value_size must be in [1, 256MB]".into()));
        }
        if self.max_batch_len == 0 {
            return Err(StoreError::InvalidConfig("max_batch_len must be > 0".into()));
        }
        Ok(())
    }

    /// Reject empty keys and keys over `max_key_size`.
    ///
    /// `position` is the entry index inside a multi-key call, if any.
    pub fn check_key(&self, key: &str, position: Option<usize>) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::invalid_key(format!("empty key{}", at_position(position))));
        }
        if key.len() > self.max_key_size {
            return Err(StoreError::invalid_key(format!(
                "key of {} bytes exceeds limit of {} bytes{}",
                key.len(),
                self.max_key_size,
                at_position(position)
            )));
        }
        Ok(())
    }

    /// Reject values over `max_value_size`. Empty values are valid.
    pub fn check_value(&self, value: &str, position: Option<usize>) -> StoreResult<()> {
        if value.len() > self.max_value_size {
            return Err(StoreError::invalid_value(format!(
                "value of {} bytes exceeds limit of {} bytes{}",
                value.len(),
                self.max_value_size,
                at_position(position)
            )));
        }
        Ok(())
    }

    /// Reject multi-key calls with more than `max_batch_len` entries.
    pub fn check_batch_len(&self, len: usize) -> StoreResult<()> {
        if len > self.max_batch_len {
            return Err(StoreError::invalid_value(format!(
                "batch of {} entries exceeds limit of {}",
                len, self.max_batch_len
            )));
        }
        Ok(())
    }
}

/// Suffix naming the batch entry an error refers to.
pub(crate) fn at_position(position: Option<usize>) -> String {
    match position {
        Some(i) => format!(" at batch entry {}", i),
        None => String::new(),
    }
}

impl Default for Config {
    fn default() -> Self { Self::desktop() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_presets_valid() {
        assert!(Config::desktop().validate().is_ok());
        assert!(Config::mobile().validate().is_ok());
        assert!(Config::embedded().validate().is_ok());
    }

    #[test]
    fn test_tier_ordering() {
        let d = Config::desktop();
        let m = Config::mobile();
        let e = Config::embedded();
        assert!(d.max_value_size > m.max_value_size);
        assert!(m.max_value_size > e.max_value_size);
        assert!(!e.durable);
    }

    #[test]
    fn test_rejects_zero_limits() {
        let mut config = Config::default();
        config.max_key_size = 0;
        assert!(matches!(config.validate(), Err(StoreError::InvalidConfig(_))));

        let mut config = Config::default();
        config.max_batch_len = 0;
        assert!(matches!(config.validate(), Err(StoreError::InvalidConfig(_))));

        let mut config = Config::default();
        config.max_value_size = VALUE_SIZE_CEILING + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_key_and_value_checks() {
        let config = Config::embedded();
        assert!(matches!(config.check_key("", None), Err(StoreError::InvalidKey { .. })));
        assert!(config.check_key(&"k".repeat(128), None).is_ok());

        let err = config.check_key(&"k".repeat(129), Some(3)).unwrap_err();
        assert!(err.to_string().contains("batch entry 3"));

        assert!(config.check_value("", None).is_ok());
        assert!(matches!(
            config.check_value(&"v".repeat(64 * 1024 + 1), None),
            Err(StoreError::InvalidValue { .. })
        ));
        assert!(config.check_batch_len(1_000).is_ok());
        assert!(config.check_batch_len(1_001).is_err());
    }
}
