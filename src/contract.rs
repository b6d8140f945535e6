//! # contract: the capabilities the publisher consumes
//!
//! The core never talks to a filesystem, a website or an HTTP API directly.
//! It goes through the traits below, which are implemented by real clients in
//! [`crate::source`] and [`crate::transport`] and by `mockall` mocks in tests.
//!
//! - [`TreeSource`]: lists and reads the local tree.
//! - [`Transport`]: submits one batch and reports a per-file outcome.
//! - [`FileWriter`]: one stateless per-file write, the building block of the
//!   direct transport.
//! - [`UiSession`]: one stateful interactive session, wrapped by the
//!   interactive transport. Driving a specific website is outside this crate.
//! - [`RemoteLister`]: lists what is actually present remotely.
//!
//! Mocks are exported under the `test-export-mocks` feature so integration
//! tests can use them.

use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::cancel::CancelToken;
use crate::error::{ScanError, TransportError};
use crate::model::{Batch, ErrorKind, TransportMode, UploadOutcome};

/// A file as listed by a tree source, before classification and hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Tree-relative, `/`-separated path.
    pub path: String,
    pub size_bytes: u64,
}

/// Read access to the local tree.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait TreeSource: Send + Sync {
    /// Every file of the tree. Fails as a whole if any part is unreadable.
    fn list(&self) -> Result<Vec<SourceFile>, ScanError>;

    /// Bytes of one listed file.
    fn read(&self, path: &str) -> Result<Vec<u8>, ScanError>;
}

/// Executes batches against the remote service.
///
/// Every returned [`UploadOutcome`] must account for every file of the
/// submitted batch exactly once, in either `succeeded` or `failed`.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    fn mode(&self) -> TransportMode;

    /// Upload every file of `batch`. Never called concurrently by the engine.
    async fn submit(&self, batch: &Batch, cancel: &CancelToken) -> UploadOutcome;

    /// Make sure the destination directory exists. Idempotent: an existing
    /// prefix is a success.
    async fn ensure_prefix(&self, prefix: &str) -> Result<(), TransportError>;
}

/// One stateless write of a single file.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait FileWriter: Send + Sync {
    /// Write `content` to the tree-relative `path`, recording `message` as the
    /// change description.
    async fn put_file(&self, path: &str, content: Vec<u8>, message: &str) -> Result<(), ErrorKind>;
}

/// Lists what is present on the remote side.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteLister: Send + Sync {
    /// Every file path under `prefix`, as full remote paths.
    async fn list(&self, prefix: &str) -> Result<BTreeSet<String>, TransportError>;
}

/// Lifecycle of an interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Ready,
    Submitting,
    Committed,
    Failed,
    Closed,
}

/// Failure of a single interactive step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    /// The element or page the step needs could not be located.
    #[error("step {0:?} could not locate its target")]
    NotFound(String),

    /// The site refused the action (e.g. file too large, name invalid).
    #[error("step rejected: {0}")]
    Rejected(String),

    #[error("session closed")]
    Closed,
}

/// A single stateful session with exactly one active location.
///
/// Implementations live outside this crate (browser automation and the like).
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait UiSession: Send {
    fn state(&self) -> SessionState;

    /// Bring a `Disconnected`/`Connected` session to `Ready`.
    async fn connect(&mut self) -> Result<(), StepError>;

    /// Navigate the session to the upload location for `prefix`.
    async fn open_location(&mut self, prefix: &str) -> Result<(), StepError>;

    /// Create `prefix` if it does not exist yet.
    async fn ensure_directory(&mut self, prefix: &str) -> Result<(), StepError>;

    /// Add one file to the pending change.
    async fn stage_file(&mut self, path: &str, content: Vec<u8>) -> Result<(), StepError>;

    /// Commit every staged file with `message`.
    async fn commit(&mut self, message: &str) -> Result<(), StepError>;

    /// Drop anything staged but not committed, returning to `Ready`.
    async fn discard(&mut self) -> Result<(), StepError>;
}
