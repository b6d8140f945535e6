//! Transport implementations behind the [`crate::contract::Transport`] contract.
//!
//! - [`direct::DirectTransport`]: stateless per-file writes through a
//!   [`crate::contract::FileWriter`], bounded concurrency inside a batch.
//! - [`interactive::InteractiveTransport`]: one serialized
//!   [`crate::contract::UiSession`], one commit per batch.
//! - [`github::GithubClient`]: HTTP `FileWriter` and `RemoteLister` for a
//!   GitHub-compatible contents API.

pub mod direct;
pub mod github;
pub mod interactive;

use crate::analyze::content_hash;
use crate::contract::TreeSource;
use crate::model::{ErrorKind, FileEntry};

/// Read `file` from `source` and check it still matches the scan.
pub(crate) fn read_checked(source: &dyn TreeSource, file: &FileEntry) -> Result<Vec<u8>, ErrorKind> {
    let bytes = source
        .read(&file.path)
        .map_err(|e| ErrorKind::SourceChanged(e.to_string()))?;
    if content_hash(&bytes) != file.content_hash {
        return Err(ErrorKind::SourceChanged(format!(
            "content hash of {} differs from the scanned hash",
            file.path
        )));
    }
    Ok(bytes)
}

pub use direct::DirectTransport;
pub use github::GithubClient;
pub use interactive::InteractiveTransport;
