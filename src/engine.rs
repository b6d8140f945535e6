//! Execution engine: drives a [`PublishPlan`] through a [`Transport`].
//!
//! Batches run strictly in plan order, one at a time. Each batch moves through
//! `Pending → InFlight → (Committed | PartiallyFailed | Failed)`; batches that
//! never start are `Skipped`. Retries resubmit only the files that failed, with
//! exponential backoff. Failures stay with the batch that produced them unless
//! `abort_on_fatal` is set.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::RunConfig;
use crate::contract::Transport;
use crate::model::{Batch, Category, ErrorKind, PublishPlan, TransportMode, UploadOutcome};

/// Attempt budget and backoff schedule for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    /// Delay before the next attempt, after `attempts_made` (≥ 1) attempts:
    /// `base * 2^(attempts_made - 1)`, never above `cap`.
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        let exp = attempts_made.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    pub abort_on_fatal: bool,
    pub call_timeout: Duration,
}

impl From<&RunConfig> for EngineConfig {
    fn from(cfg: &RunConfig) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: cfg.max_attempts,
                base: Duration::from_millis(cfg.backoff_base_ms),
                cap: Duration::from_millis(cfg.backoff_cap_ms),
            },
            abort_on_fatal: cfg.abort_on_fatal,
            call_timeout: cfg.call_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Pending,
    InFlight,
    Committed,
    PartiallyFailed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: u32,
    pub priority: u32,
    pub category: Category,
    pub target_prefix: String,
    pub state: BatchState,
    /// Transport invocations made for this batch.
    pub attempts: u32,
    pub succeeded: BTreeSet<String>,
    /// Final failure per file that never succeeded.
    pub failed: BTreeMap<String, ErrorKind>,
    /// Every outcome returned for this batch, in order.
    pub outcomes: Vec<UploadOutcome>,
}

impl BatchReport {
    fn new(batch: &Batch, state: BatchState) -> Self {
        Self {
            batch_id: batch.id,
            priority: batch.priority,
            category: batch.category,
            target_prefix: batch.target_prefix.clone(),
            state,
            attempts: 0,
            succeeded: BTreeSet::new(),
            failed: BTreeMap::new(),
            outcomes: Vec::new(),
        }
    }

    pub fn has_fatal_failure(&self) -> bool {
        self.failed.values().any(ErrorKind::is_fatal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub batch_id: u32,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Times this file was handed to the transport.
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every batch was attempted.
    Completed,
    /// Halted by `abort_on_fatal`.
    Aborted,
    Cancelled,
}

/// Single source of truth for what a run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub transport: TransportMode,
    pub batches: Vec<BatchReport>,
    pub files: BTreeMap<String, FileReport>,
    /// Transport `submit` calls across the run.
    pub total_attempts: u32,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn batch(&self, id: u32) -> Option<&BatchReport> {
        self.batches.iter().find(|b| b.batch_id == id)
    }

    fn count(&self, status: FileStatus) -> usize {
        self.files.values().filter(|f| f.status == status).count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.count(FileStatus::Succeeded)
    }

    pub fn failed_count(&self) -> usize {
        self.count(FileStatus::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(FileStatus::Skipped)
    }

    pub fn committed_batches(&self) -> impl Iterator<Item = &BatchReport> {
        self.batches
            .iter()
            .filter(|b| b.state == BatchState::Committed)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
            && self.batches.iter().all(|b| b.state == BatchState::Committed)
    }
}

pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Execute `plan` batch by batch. Never fails: every problem ends up in the report.
    pub async fn run(
        &self,
        plan: &PublishPlan,
        transport: &dyn Transport,
        cancel: &CancelToken,
    ) -> RunReport {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%run_id, batches = plan.batches.len(), files = plan.total_files(), mode = ?transport.mode(), "[ENGINE] Run starting");

        let mut confirmed_prefixes = BTreeSet::new();
        let mut batches = Vec::with_capacity(plan.batches.len());
        let mut files = BTreeMap::new();
        let mut total_attempts = 0u32;
        let mut status = RunStatus::Completed;

        for batch in &plan.batches {
            if cancel.is_cancelled() {
                warn!(batch_id = batch.id, "[ENGINE] Cancelled before batch");
                status = RunStatus::Cancelled;
                break;
            }
            let (report, interrupted) = self
                .run_batch(
                    batch,
                    transport,
                    cancel,
                    &mut confirmed_prefixes,
                    &mut files,
                    &mut total_attempts,
                )
                .await;
            let fatal = report.has_fatal_failure();
            batches.push(report);
            if interrupted {
                warn!(batch_id = batch.id, "[ENGINE] Cancelled while batch was unresolved");
                status = RunStatus::Cancelled;
                break;
            }
            if fatal && self.config.abort_on_fatal {
                error!(batch_id = batch.id, "[ENGINE] Non-retryable failure with abort_on_fatal set, halting run");
                status = RunStatus::Aborted;
                break;
            }
        }

        for batch in &plan.batches[batches.len()..] {
            debug!(batch_id = batch.id, "[ENGINE] Batch skipped");
            for path in batch.paths() {
                files.insert(
                    path.to_string(),
                    FileReport {
                        batch_id: batch.id,
                        status: FileStatus::Skipped,
                        error: None,
                        attempts: 0,
                    },
                );
            }
            batches.push(BatchReport::new(batch, BatchState::Skipped));
        }

        let report = RunReport {
            run_id,
            status,
            transport: transport.mode(),
            batches,
            files,
            total_attempts,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            %run_id,
            status = ?report.status,
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            skipped = report.skipped_count(),
            attempts = report.total_attempts,
            elapsed_ms = report.elapsed_ms,
            "[ENGINE] Run finished"
        );
        report
    }

    async fn run_batch(
        &self,
        batch: &Batch,
        transport: &dyn Transport,
        cancel: &CancelToken,
        confirmed_prefixes: &mut BTreeSet<String>,
        files: &mut BTreeMap<String, FileReport>,
        total_attempts: &mut u32,
    ) -> (BatchReport, bool) {
        let mut report = BatchReport::new(batch, BatchState::Pending);
        for path in batch.paths() {
            files.insert(
                path.to_string(),
                FileReport {
                    batch_id: batch.id,
                    status: FileStatus::Failed,
                    error: None,
                    attempts: 0,
                },
            );
        }

        if let Err(kind) = self.confirm_prefix(batch, transport, confirmed_prefixes).await {
            for path in batch.paths() {
                report.failed.insert(path.to_string(), kind.clone());
            }
            report.state = BatchState::Failed;
            finalize_files(&report, files);
            return (report, false);
        }

        report.state = BatchState::InFlight;
        info!(batch_id = batch.id, files = batch.files.len(), bytes = batch.total_bytes(), priority = batch.priority, "[ENGINE] Batch in flight");

        let mut pending: BTreeSet<String> = batch.paths().map(str::to_string).collect();
        let mut interrupted = false;
        loop {
            let attempt = report.attempts + 1;
            let submitted: Cow<'_, Batch> = if attempt == 1 {
                Cow::Borrowed(batch)
            } else {
                Cow::Owned(batch.subset(&pending))
            };

            let outcome = self.submit_once(&submitted, attempt, transport, cancel).await;
            report.attempts = attempt;
            *total_attempts += 1;

            for path in submitted.paths() {
                if let Some(file) = files.get_mut(path) {
                    file.attempts += 1;
                }
            }
            for path in &outcome.succeeded {
                pending.remove(path);
                report.failed.remove(path);
                report.succeeded.insert(path.clone());
            }
            for (path, kind) in &outcome.failed {
                report.failed.insert(path.clone(), kind.clone());
            }
            debug!(batch_id = batch.id, attempt, succeeded = outcome.succeeded.len(), failed = outcome.failed.len(), "[ENGINE] Attempt finished");
            report.outcomes.push(outcome);

            if pending.is_empty() {
                break;
            }
            if cancel.is_cancelled() {
                warn!(batch_id = batch.id, remaining = pending.len(), "[ENGINE] Cancelled with files outstanding");
                interrupted = true;
                break;
            }
            if !report.failed.values().all(ErrorKind::is_retryable) {
                warn!(batch_id = batch.id, attempt, "[ENGINE] Non-retryable failure, not retrying batch");
                break;
            }
            if attempt >= self.config.retry.max_attempts {
                warn!(batch_id = batch.id, attempt, remaining = pending.len(), "[ENGINE] Retry budget exhausted");
                break;
            }
            let delay = self.config.retry.backoff(attempt);
            info!(batch_id = batch.id, attempt, remaining = pending.len(), delay_ms = delay.as_millis() as u64, "[ENGINE] Backing off before retry");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    warn!(batch_id = batch.id, "[ENGINE] Cancelled during backoff");
                    interrupted = true;
                    break;
                }
            }
        }

        report.state = if report.failed.is_empty() {
            BatchState::Committed
        } else if report.has_fatal_failure() || report.succeeded.is_empty() {
            BatchState::Failed
        } else {
            BatchState::PartiallyFailed
        };
        match report.state {
            BatchState::Committed => info!(batch_id = batch.id, attempts = report.attempts, "[ENGINE] Batch committed"),
            state => error!(batch_id = batch.id, ?state, failed = report.failed.len(), "[ENGINE] Batch did not fully commit"),
        }
        finalize_files(&report, files);
        (report, interrupted)
    }

    async fn confirm_prefix(
        &self,
        batch: &Batch,
        transport: &dyn Transport,
        confirmed_prefixes: &mut BTreeSet<String>,
    ) -> Result<(), ErrorKind> {
        let prefix = batch.target_prefix.as_str();
        if prefix.is_empty() || confirmed_prefixes.contains(prefix) {
            return Ok(());
        }
        match tokio::time::timeout(self.config.call_timeout, transport.ensure_prefix(prefix)).await {
            Ok(Ok(())) => {
                debug!(prefix, "[ENGINE] Prefix confirmed");
                confirmed_prefixes.insert(prefix.to_string());
                Ok(())
            }
            Ok(Err(e)) => {
                error!(batch_id = batch.id, prefix, error = %e, "[ENGINE] Could not confirm prefix");
                Err(ErrorKind::PrefixUnavailable(e.to_string()))
            }
            Err(_) => {
                error!(batch_id = batch.id, prefix, "[ENGINE] ensure_prefix timed out");
                Err(ErrorKind::PrefixUnavailable(format!(
                    "timed out after {:?}",
                    self.config.call_timeout
                )))
            }
        }
    }

    /// One transport call under the per-call timeout. The returned outcome
    /// covers exactly the submitted files.
    async fn submit_once(
        &self,
        batch: &Batch,
        attempt: u32,
        transport: &dyn Transport,
        cancel: &CancelToken,
    ) -> UploadOutcome {
        let mut outcome =
            match tokio::time::timeout(self.config.call_timeout, transport.submit(batch, cancel)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(batch_id = batch.id, attempt, "[ENGINE] submit timed out");
                    UploadOutcome::all_failed(batch, attempt, ErrorKind::Timeout)
                }
            };
        outcome.batch_id = batch.id;
        outcome.attempt = attempt;

        let submitted: BTreeSet<&str> = batch.paths().collect();
        let stray: Vec<String> = outcome
            .succeeded
            .iter()
            .chain(outcome.failed.keys())
            .filter(|p| !submitted.contains(p.as_str()))
            .cloned()
            .collect();
        for path in stray {
            warn!(batch_id = batch.id, path = %path, "[ENGINE] Transport reported a file that was not submitted");
            outcome.succeeded.remove(&path);
            outcome.failed.remove(&path);
        }
        for path in submitted {
            if !outcome.succeeded.contains(path) && !outcome.failed.contains_key(path) {
                warn!(batch_id = batch.id, path, "[ENGINE] Transport omitted a file from its outcome");
                outcome.failed.insert(
                    path.to_string(),
                    ErrorKind::Network("no outcome reported by transport".into()),
                );
            }
        }
        outcome
    }
}

fn finalize_files(report: &BatchReport, files: &mut BTreeMap<String, FileReport>) {
    for path in &report.succeeded {
        if let Some(file) = files.get_mut(path) {
            file.status = FileStatus::Succeeded;
            file.error = None;
        }
    }
    for (path, kind) in &report.failed {
        if let Some(file) = files.get_mut(path) {
            file.status = FileStatus::Failed;
            file.error = Some(kind.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base: Duration::from_millis(100),
            cap: Duration::from_millis(1_000),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(1_000));
    }
}
