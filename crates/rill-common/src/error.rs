//! Error types for the foundation crate.

use thiserror::Error;

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while validating a [`StorageConfig`](crate::StorageConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configured arena size is zero.
    #[error("arena size must be greater than zero")]
    EmptyArena,

    /// The configured arena size is not a multiple of the page size.
    #[error("arena size {size} is not a multiple of the page size {page_size}")]
    UnalignedArena {
        /// Configured arena size in bytes.
        size: usize,
        /// System page size in bytes.
        page_size: usize,
    },

    /// A configuration field is out of its accepted range.
    #[error("invalid value for {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid-field error.
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
