//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::constants::PAGE_SIZE;
use crate::error::{ConfigError, ConfigResult};

/// Configuration for the storage core.
///
/// # Example
///
/// ```rust
/// use rill_common::StorageConfig;
///
/// let config = StorageConfig::default();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Total size of the page arena in bytes. Must be a nonzero multiple of
    /// the page size.
    pub arena_bytes: usize,

    /// Seconds between GC sweeps.
    pub gc_interval_secs: u64,

    /// Capacity hint for the primary hash index.
    pub index_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            arena_bytes: 1024 * PAGE_SIZE,
            gc_interval_secs: 1,
            index_capacity: 1024 * 1024,
        }
    }
}

impl StorageConfig {
    /// Creates a configuration with the given arena size and defaults for
    /// everything else.
    #[must_use]
    pub fn with_arena_bytes(arena_bytes: usize) -> Self {
        Self {
            arena_bytes,
            ..Self::default()
        }
    }

    /// Returns the number of pages the arena holds.
    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> usize {
        self.arena_bytes / PAGE_SIZE
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.arena_bytes == 0 {
            return Err(ConfigError::EmptyArena);
        }
        if self.arena_bytes % PAGE_SIZE != 0 {
            return Err(ConfigError::UnalignedArena {
                size: self.arena_bytes,
                page_size: PAGE_SIZE,
            });
        }
        if self.gc_interval_secs == 0 {
            return Err(ConfigError::invalid_field(
                "gc_interval_secs",
                "must be nonzero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(StorageConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_arena() {
        let config = StorageConfig::with_arena_bytes(0);
        assert!(matches!(config.validate(), Err(ConfigError::EmptyArena)));
    }

    #[test]
    fn test_rejects_unaligned_arena() {
        let config = StorageConfig::with_arena_bytes(PAGE_SIZE + 1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnalignedArena { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_gc_interval() {
        let config = StorageConfig {
            gc_interval_secs: 0,
            ..StorageConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_page_count() {
        let config = StorageConfig::with_arena_bytes(8 * PAGE_SIZE);
        assert_eq!(config.page_count(), 8);
    }
}
