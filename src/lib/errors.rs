//! Custom error types for collapse operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for collapse operations
pub type Result<T> = std::result::Result<T, CollapseError>;

/// Error type for collapse operations
#[derive(Error, Debug)]
pub enum CollapseError {
    /// Contradictory layout options, unknown format, or an unparseable value
    #[error("Invalid configuration: {reason}")]
    ConfigInvalid {
        /// Explanation of what is wrong with the configuration
        reason: String,
    },

    /// An input path does not exist or is not of the required kind
    #[error("{expected} '{}' does not exist", .path.display())]
    PathMissing {
        /// What the path was expected to be (e.g., "Input file", "Sample directory")
        expected: String,
        /// The offending path
        path: PathBuf,
    },

    /// An underlying read or write failed mid-stream
    #[error("I/O failure on '{}': {source}", .path.display())]
    IoFailure {
        /// Path of the file being read or written
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A malformed record in a sequence or details file
    #[error("Malformed record in '{}': {reason}", .path.display())]
    FormatError {
        /// Path of the file containing the malformed record
        path: PathBuf,
        /// Explanation of the problem
        reason: String,
    },

    /// An occurrence counter would exceed its representable range
    #[error("Occurrence counter overflow while merging records")]
    CounterOverflow,

    /// An internal invariant was violated; indicates a bug
    #[error("Internal invariant violated: {reason}")]
    InvariantViolated {
        /// Description of the violated invariant
        reason: String,
    },
}

impl CollapseError {
    /// Wrap an I/O error with the path it occurred on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CollapseError::IoFailure { path: path.into(), source }
    }

    /// Build a format error for the given path.
    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        CollapseError::FormatError { path: path.into(), reason: reason.into() }
    }
}
