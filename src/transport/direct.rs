//! Stateless transport: one independent write per file.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::contract::{FileWriter, Transport, TreeSource};
use crate::error::TransportError;
use crate::model::{Batch, ErrorKind, FileEntry, TransportMode, UploadOutcome};

use super::read_checked;

/// Writes every file of a batch through a [`FileWriter`], with at most
/// `concurrency` writes in flight.
pub struct DirectTransport {
    writer: Arc<dyn FileWriter>,
    source: Arc<dyn TreeSource>,
    concurrency: usize,
}

impl DirectTransport {
    pub fn new(writer: Arc<dyn FileWriter>, source: Arc<dyn TreeSource>, concurrency: usize) -> Self {
        Self {
            writer,
            source,
            concurrency: concurrency.max(1),
        }
    }

    async fn write_one(
        &self,
        file: &FileEntry,
        message: &str,
        cancel: &CancelToken,
    ) -> (String, Result<(), ErrorKind>) {
        if cancel.is_cancelled() {
            return (file.path.clone(), Err(ErrorKind::Cancelled));
        }
        let content = match read_checked(self.source.as_ref(), file) {
            Ok(bytes) => bytes,
            Err(kind) => return (file.path.clone(), Err(kind)),
        };
        let result = self.writer.put_file(&file.path, content, message).await;
        match &result {
            Ok(()) => debug!(path = %file.path, "[DIRECT] File written"),
            Err(kind) => warn!(path = %file.path, error = %kind, "[DIRECT] File write failed"),
        }
        (file.path.clone(), result)
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Direct
    }

    async fn submit(&self, batch: &Batch, cancel: &CancelToken) -> UploadOutcome {
        info!(
            batch_id = batch.id,
            files = batch.files.len(),
            concurrency = self.concurrency,
            "[DIRECT] Submitting batch"
        );
        let writes: Vec<_> = batch
            .files
            .iter()
            .map(|file| self.write_one(file, &batch.commit_message, cancel))
            .collect();
        let results: Vec<(String, Result<(), ErrorKind>)> = stream::iter(writes)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut outcome = UploadOutcome::new(batch.id, 0);
        for (path, result) in results {
            outcome.record(path, result);
        }
        info!(
            batch_id = batch.id,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "[DIRECT] Batch submitted"
        );
        outcome
    }

    /// Per-file writes create intermediate directories implicitly.
    async fn ensure_prefix(&self, prefix: &str) -> Result<(), TransportError> {
        debug!(prefix, "[DIRECT] Prefix needs no explicit creation");
        Ok(())
    }
}
