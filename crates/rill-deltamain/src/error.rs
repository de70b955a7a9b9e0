//! Row-store and GC error types.

use thiserror::Error;

use rill_log::LogError;

/// Result type for row-store and GC operations.
pub type GcResult<T> = Result<T, GcError>;

/// Errors that can occur during a GC sweep.
#[derive(Debug, Error)]
pub enum GcError {
    /// The page arena could not supply a fill page.
    #[error("page arena exhausted while constructing a fill page")]
    OutOfSpace,

    /// A log entry could not be decoded.
    #[error("malformed {kind} entry: {reason}")]
    MalformedEntry {
        /// Entry kind name, e.g. `"insert"`.
        kind: &'static str,
        /// Why decoding failed.
        reason: String,
    },

    /// An underlying log operation failed.
    #[error(transparent)]
    Log(#[from] LogError),
}

impl GcError {
    /// Creates a malformed-entry error.
    pub fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedEntry {
            kind,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = GcError::malformed("insert", "truncated header");
        let msg = format!("{}", err);
        assert!(msg.contains("insert"));
        assert!(msg.contains("truncated header"));
    }

    #[test]
    fn test_log_error_conversion() {
        let err: GcError = LogError::OutOfSpace.into();
        assert!(matches!(err, GcError::Log(LogError::OutOfSpace)));
    }
}
