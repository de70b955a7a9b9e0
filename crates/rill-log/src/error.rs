//! Log error types.

use thiserror::Error;

use crate::page::MAX_ENTRY_SIZE;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur while appending to a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LogError {
    /// The payload does not fit in a page.
    #[error("log entry of {size} payload bytes exceeds the page capacity of {max} bytes")]
    EntryTooLarge {
        /// Requested payload size.
        size: u32,
        /// Maximum entry size (header and padding included).
        max: u32,
    },

    /// The page arena has no free pages left.
    #[error("page arena exhausted")]
    OutOfSpace,
}

impl LogError {
    /// Creates an entry-too-large error for the given payload size.
    #[must_use]
    pub fn entry_too_large(size: u32) -> Self {
        Self::EntryTooLarge {
            size,
            max: MAX_ENTRY_SIZE,
        }
    }
}
