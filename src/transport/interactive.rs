//! Stateful transport over a single interactive session.
//!
//! The session has exactly one active location, so every submission holds the
//! session lock for its whole duration. Each step gets its own timeout; a step
//! that cannot locate its target is transient when interactive fallback is
//! enabled and fatal otherwise.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::RunConfig;
use crate::contract::{SessionState, StepError, Transport, TreeSource, UiSession};
use crate::error::TransportError;
use crate::model::{Batch, ErrorKind, TransportMode, UploadOutcome};

use super::read_checked;

pub struct InteractiveTransport {
    session: Mutex<Box<dyn UiSession>>,
    source: Arc<dyn TreeSource>,
    step_timeout: Duration,
    fallback: bool,
}

impl InteractiveTransport {
    pub fn new(
        session: Box<dyn UiSession>,
        source: Arc<dyn TreeSource>,
        step_timeout: Duration,
        fallback: bool,
    ) -> Self {
        Self {
            session: Mutex::new(session),
            source,
            step_timeout,
            fallback,
        }
    }

    /// Step timeout from `call_timeout_secs`, fallback from `interactive_fallback`.
    pub fn from_config(
        session: Box<dyn UiSession>,
        source: Arc<dyn TreeSource>,
        config: &RunConfig,
    ) -> Self {
        Self::new(session, source, config.call_timeout(), config.interactive_fallback)
    }

    fn classify(&self, err: StepError) -> ErrorKind {
        match err {
            StepError::NotFound(step) if self.fallback => ErrorKind::TransientUi(step),
            StepError::NotFound(step) => ErrorKind::FatalUi(step),
            StepError::Rejected(reason) => ErrorKind::Rejected(reason),
            StepError::Closed => ErrorKind::FatalUi("session closed".into()),
        }
    }

    async fn step<F>(&self, name: &str, fut: F) -> Result<(), ErrorKind>
    where
        F: Future<Output = Result<(), StepError>> + Send,
    {
        match tokio::time::timeout(self.step_timeout, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(step = name, error = %e, "[INTERACTIVE] Step failed");
                Err(self.classify(e))
            }
            Err(_) => {
                warn!(step = name, timeout = ?self.step_timeout, "[INTERACTIVE] Step timed out");
                Err(self.classify(StepError::NotFound(format!("{name} timed out"))))
            }
        }
    }

    /// Bring the session to `Ready`, whatever state the previous batch left it in.
    async fn make_ready(&self, session: &mut Box<dyn UiSession>) -> Result<(), ErrorKind> {
        match session.state() {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(self.classify(StepError::Closed)),
            SessionState::Disconnected | SessionState::Connected => {
                self.step("connect", session.connect()).await
            }
            SessionState::Submitting | SessionState::Committed | SessionState::Failed => {
                self.step("discard", session.discard()).await
            }
        }
    }
}

#[async_trait]
impl Transport for InteractiveTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Interactive
    }

    async fn submit(&self, batch: &Batch, cancel: &CancelToken) -> UploadOutcome {
        let mut session = self.session.lock().await;
        info!(batch_id = batch.id, files = batch.files.len(), prefix = %batch.target_prefix, "[INTERACTIVE] Submitting batch");

        if cancel.is_cancelled() {
            return UploadOutcome::all_failed(batch, 0, ErrorKind::Cancelled);
        }
        if let Err(kind) = self.make_ready(&mut session).await {
            error!(batch_id = batch.id, error = %kind, "[INTERACTIVE] Session not ready");
            return UploadOutcome::all_failed(batch, 0, kind);
        }
        if let Err(kind) = self
            .step("open_location", session.open_location(&batch.target_prefix))
            .await
        {
            return UploadOutcome::all_failed(batch, 0, kind);
        }

        let mut outcome = UploadOutcome::new(batch.id, 0);
        let mut staged = Vec::new();
        for file in &batch.files {
            let staged_result = match read_checked(self.source.as_ref(), file) {
                Ok(content) => self.step("stage_file", session.stage_file(&file.path, content)).await,
                Err(kind) => Err(kind),
            };
            match staged_result {
                Ok(()) => {
                    debug!(path = %file.path, "[INTERACTIVE] File staged");
                    staged.push(file.path.clone());
                }
                Err(kind) => outcome.record(file.path.clone(), Err(kind)),
            }
        }

        if staged.is_empty() {
            if let Err(kind) = self.step("discard", session.discard()).await {
                warn!(error = %kind, "[INTERACTIVE] Could not discard after empty staging");
            }
            return outcome;
        }

        match self.step("commit", session.commit(&batch.commit_message)).await {
            Ok(()) => {
                for path in staged {
                    outcome.record(path, Ok(()));
                }
            }
            Err(kind) => {
                for path in staged {
                    outcome.record(path, Err(kind.clone()));
                }
                if let Err(discard_err) = self.step("discard", session.discard()).await {
                    warn!(error = %discard_err, "[INTERACTIVE] Could not discard after failed commit");
                }
            }
        }
        info!(
            batch_id = batch.id,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "[INTERACTIVE] Batch submitted"
        );
        outcome
    }

    async fn ensure_prefix(&self, prefix: &str) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        self.make_ready(&mut session)
            .await
            .map_err(|kind| TransportError::Unavailable(kind.to_string()))?;
        self.step("ensure_directory", session.ensure_directory(prefix))
            .await
            .map_err(|kind| TransportError::Unavailable(format!("{prefix}: {kind}")))
    }
}
