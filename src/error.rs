//! Error types for tree-publish.
//!
//! Planning-phase errors ([`ScanError`], [`PlanError`], [`ConfigError`]) abort a
//! run before any network call. Execution-phase failures never surface here:
//! they are recorded per file as [`crate::model::ErrorKind`] in the run report.

use std::path::PathBuf;

use thiserror::Error;

/// The tree source could not be read in full.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    #[error("tree source root {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("file {0} is not part of the tree")]
    UnknownFile(String),

    #[error("tree source listed {0} more than once")]
    DuplicatePath(String),
}

/// Convenience constructor for [`ScanError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ScanError {
    ScanError::Io {
        path: path.into(),
        source,
    }
}

/// Invalid configuration values, detected before any I/O.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid classification pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Errors returned by the strategy planner.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("cannot plan an empty tree")]
    EmptyTree,

    #[error("invalid limits: max_files_per_batch={max_files}, max_bytes_per_batch={max_bytes} (both must be > 0)")]
    InvalidLimits { max_files: usize, max_bytes: u64 },

    #[error("entry {0} appears more than once")]
    DuplicatePath(String),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

/// Errors raised by a transport outside of a batch outcome.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("destination unavailable: {0}")]
    Unavailable(String),

    #[error("transport call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// The remote state could not be listed for verification.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("remote listing of {prefix:?} failed: {source}")]
    Listing {
        prefix: String,
        #[source]
        source: TransportError,
    },

    #[error("remote listing of {prefix:?} timed out after {after:?}")]
    Timeout {
        prefix: String,
        after: std::time::Duration,
    },
}

/// Top-level error for a full analyze → plan → run → verify cycle.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),
}
