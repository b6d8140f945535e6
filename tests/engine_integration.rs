use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tree_publish::cancel::CancelToken;
use tree_publish::contract::{MockTransport, Transport};
use tree_publish::engine::{BatchState, Engine, EngineConfig, FileStatus, RetryPolicy, RunStatus};
use tree_publish::error::TransportError;
use tree_publish::model::{
    Batch, BatchLimits, Category, ErrorKind, FileEntry, PublishPlan, TransportMode, UploadOutcome,
};
use tree_publish::plan::plan;

fn entry(path: &str, category: Category) -> FileEntry {
    FileEntry {
        path: path.to_string(),
        size_bytes: 100,
        category,
        content_hash: String::new(),
    }
}

fn engine(max_attempts: u32, abort_on_fatal: bool) -> Engine {
    Engine::new(EngineConfig {
        retry: RetryPolicy {
            max_attempts,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(4),
        },
        abort_on_fatal,
        call_timeout: Duration::from_secs(5),
    })
}

/// One root-level batch per category listed, `per_batch` files each.
fn root_plan(categories: &[Category], per_batch: usize) -> PublishPlan {
    let entries: Vec<FileEntry> = categories
        .iter()
        .flat_map(|c| (0..per_batch).map(move |i| entry(&format!("{c}_{i:02}.txt"), *c)))
        .collect();
    plan(
        &entries,
        BatchLimits {
            max_files_per_batch: per_batch,
            max_bytes_per_batch: 1 << 20,
        },
        categories,
    )
    .unwrap()
}

fn succeed_all(batch: &Batch) -> UploadOutcome {
    let mut outcome = UploadOutcome::new(batch.id, 0);
    for path in batch.paths() {
        outcome.record(path, Ok(()));
    }
    outcome
}

fn direct_mock() -> MockTransport {
    let mut transport = MockTransport::new();
    transport.expect_mode().return_const(TransportMode::Direct);
    transport
}

#[tokio::test]
async fn retry_resubmits_only_the_failed_subset() {
    let plan = root_plan(&[Category::Module], 50);
    let flaky: BTreeSet<String> = ["module_07.txt", "module_21.txt", "module_49.txt"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let submitted: Arc<Mutex<Vec<BTreeSet<String>>>> = Arc::default();

    let mut transport = direct_mock();
    let seen = submitted.clone();
    let flaky_paths = flaky.clone();
    transport.expect_submit().times(2).returning(move |batch: &Batch, _: &CancelToken| {
        let paths: BTreeSet<String> = batch.paths().map(str::to_string).collect();
        let first_call = seen.lock().unwrap().is_empty();
        seen.lock().unwrap().push(paths);
        let mut outcome = UploadOutcome::new(batch.id, 0);
        for path in batch.paths() {
            if first_call && flaky_paths.contains(path) {
                outcome.record(path, Err(ErrorKind::Network("502".into())));
            } else {
                outcome.record(path, Ok(()));
            }
        }
        outcome
    });

    let report = engine(3, false).run(&plan, &transport, &CancelToken::new()).await;

    let calls = submitted.lock().unwrap();
    assert_eq!(calls[0].len(), 50);
    assert_eq!(calls[1], flaky);

    let batch = &report.batches[0];
    assert_eq!(batch.state, BatchState::Committed);
    assert_eq!(batch.succeeded.len(), 50);
    assert!(batch.failed.is_empty());
    assert_eq!(batch.attempts, 2);
    assert_eq!(batch.outcomes.len(), 2);
    assert_eq!(batch.outcomes[1].attempt, 2);
    for (path, file) in &report.files {
        let expected = if flaky.contains(path) { 2 } else { 1 };
        assert_eq!(file.attempts, expected, "{path}");
        assert_eq!(file.status, FileStatus::Succeeded);
    }
    assert_eq!(report.total_attempts, 2);
    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.is_success());
}

#[tokio::test]
async fn fatal_failure_stays_in_its_batch_without_abort() {
    let plan = root_plan(&[Category::RootCritical, Category::Config], 2);
    let mut transport = direct_mock();
    transport.expect_submit().times(2).returning(|batch: &Batch, _: &CancelToken| {
        if batch.category == Category::RootCritical {
            UploadOutcome::all_failed(batch, 0, ErrorKind::FatalUi("upload button".into()))
        } else {
            succeed_all(batch)
        }
    });

    let report = engine(3, false).run(&plan, &transport, &CancelToken::new()).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.batches[0].state, BatchState::Failed);
    assert_eq!(report.batches[0].attempts, 1, "fatal failures are not retried");
    assert_eq!(report.batches[1].state, BatchState::Committed);
    assert_eq!(report.failed_count(), 2);
    assert_eq!(report.succeeded_count(), 2);
    assert!(!report.is_success());
}

#[tokio::test]
async fn abort_on_fatal_skips_every_remaining_batch() {
    let plan = root_plan(&[Category::RootCritical, Category::Config, Category::Asset], 2);
    let mut transport = direct_mock();
    transport.expect_submit().times(1).returning(|batch: &Batch, _: &CancelToken| {
        UploadOutcome::all_failed(batch, 0, ErrorKind::Conflict("exists".into()))
    });

    let report = engine(3, true).run(&plan, &transport, &CancelToken::new()).await;

    assert_eq!(report.status, RunStatus::Aborted);
    let states: Vec<BatchState> = report.batches.iter().map(|b| b.state).collect();
    assert_eq!(
        states,
        vec![BatchState::Failed, BatchState::Skipped, BatchState::Skipped]
    );
    assert_eq!(report.skipped_count(), 4);
    assert!(report
        .files
        .values()
        .filter(|f| f.status == FileStatus::Skipped)
        .all(|f| f.attempts == 0 && f.error.is_none()));
}

#[tokio::test]
async fn exhausted_retries_leave_the_batch_partially_failed() {
    let plan = root_plan(&[Category::Module], 4);
    let mut transport = direct_mock();
    transport.expect_submit().times(3).returning(|batch: &Batch, _: &CancelToken| {
        let mut outcome = UploadOutcome::new(batch.id, 0);
        for path in batch.paths() {
            if path == "module_02.txt" {
                outcome.record(path, Err(ErrorKind::Timeout));
            } else {
                outcome.record(path, Ok(()));
            }
        }
        outcome
    });

    let report = engine(3, false).run(&plan, &transport, &CancelToken::new()).await;

    let batch = &report.batches[0];
    assert_eq!(batch.state, BatchState::PartiallyFailed);
    assert_eq!(batch.attempts, 3);
    assert_eq!(batch.succeeded.len(), 3);
    assert_eq!(batch.failed.get("module_02.txt"), Some(&ErrorKind::Timeout));
    assert_eq!(report.files["module_02.txt"].attempts, 3);
    assert_eq!(report.files["module_00.txt"].attempts, 1);
}

#[tokio::test]
async fn unavailable_prefix_fails_the_batch_without_submitting() {
    let entries = vec![entry("docs/a.md", Category::Module), entry("docs/b.md", Category::Module)];
    let plan = plan(
        &entries,
        BatchLimits {
            max_files_per_batch: 10,
            max_bytes_per_batch: 1 << 20,
        },
        &Category::ALL,
    )
    .unwrap();
    assert_eq!(plan.batches[0].target_prefix, "docs");

    let mut transport = direct_mock();
    transport
        .expect_ensure_prefix()
        .times(1)
        .returning(|_: &str| Err(TransportError::Unavailable("no such folder".into())));
    transport.expect_submit().times(0);

    let report = engine(3, false).run(&plan, &transport, &CancelToken::new()).await;

    let batch = &report.batches[0];
    assert_eq!(batch.state, BatchState::Failed);
    assert_eq!(batch.attempts, 0);
    assert!(batch
        .failed
        .values()
        .all(|k| matches!(k, ErrorKind::PrefixUnavailable(_))));
}

#[tokio::test]
async fn confirmed_prefix_is_not_rechecked() {
    let entries: Vec<FileEntry> = (0..4)
        .map(|i| entry(&format!("src/f{i}.rs"), Category::Module))
        .collect();
    let plan = plan(
        &entries,
        BatchLimits {
            max_files_per_batch: 2,
            max_bytes_per_batch: 1 << 20,
        },
        &Category::ALL,
    )
    .unwrap();
    assert_eq!(plan.batches.len(), 2);

    let mut transport = direct_mock();
    transport.expect_ensure_prefix().times(1).returning(|_: &str| Ok(()));
    transport
        .expect_submit()
        .times(2)
        .returning(|batch: &Batch, _: &CancelToken| succeed_all(batch));

    let report = engine(3, false).run(&plan, &transport, &CancelToken::new()).await;
    assert!(report.is_success());
}

/// Never answers within the engine's call timeout.
struct StalledTransport;

#[async_trait]
impl Transport for StalledTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Interactive
    }

    async fn submit(&self, batch: &Batch, _cancel: &CancelToken) -> UploadOutcome {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        succeed_all(batch)
    }

    async fn ensure_prefix(&self, _prefix: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_submit_times_out_every_file() {
    let plan = root_plan(&[Category::Config], 3);
    let engine = Engine::new(EngineConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            base: Duration::from_millis(10),
            cap: Duration::from_millis(10),
        },
        abort_on_fatal: false,
        call_timeout: Duration::from_secs(1),
    });

    let report = engine.run(&plan, &StalledTransport, &CancelToken::new()).await;

    let batch = &report.batches[0];
    assert_eq!(batch.state, BatchState::Failed);
    assert_eq!(batch.attempts, 2);
    assert!(batch.failed.values().all(|k| *k == ErrorKind::Timeout));
    assert_eq!(report.transport, TransportMode::Interactive);
}

#[tokio::test]
async fn cancellation_skips_batches_that_have_not_started() {
    let plan = root_plan(&[Category::RootCritical, Category::Module, Category::Asset], 1);
    let cancel = CancelToken::new();

    let mut transport = direct_mock();
    let trigger = cancel.clone();
    transport.expect_submit().times(1).returning(move |batch: &Batch, _: &CancelToken| {
        trigger.cancel();
        succeed_all(batch)
    });

    let report = engine(3, false).run(&plan, &transport, &cancel).await;

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.batches[0].state, BatchState::Committed);
    assert_eq!(report.batches[1].state, BatchState::Skipped);
    assert_eq!(report.batches[2].state, BatchState::Skipped);
    assert_eq!(report.succeeded_count(), 1);
    assert_eq!(report.skipped_count(), 2);
}

#[tokio::test]
async fn outcome_gaps_are_recorded_as_failures() {
    let plan = root_plan(&[Category::Module], 2);
    let mut transport = direct_mock();
    transport.expect_submit().times(1).returning(|batch: &Batch, _: &CancelToken| {
        let mut outcome = UploadOutcome::new(batch.id, 0);
        outcome.record("module_00.txt", Ok(()));
        outcome.record("not/in/batch.txt", Ok(()));
        outcome
    });

    let report = engine(1, false).run(&plan, &transport, &CancelToken::new()).await;

    let batch = &report.batches[0];
    assert_eq!(batch.state, BatchState::PartiallyFailed);
    assert!(batch.failed.contains_key("module_01.txt"));
    assert!(!report.files.contains_key("not/in/batch.txt"));
    assert!(!batch.succeeded.contains("not/in/batch.txt"));
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_of_the_last_batch_cancels_the_run() {
    let plan = root_plan(&[Category::Module], 2);
    let cancel = CancelToken::new();
    let mut transport = direct_mock();
    transport.expect_submit().times(1).returning(|batch: &Batch, _: &CancelToken| {
        let mut outcome = UploadOutcome::new(batch.id, 0);
        outcome.record("module_00.txt", Ok(()));
        outcome.record("module_01.txt", Err(ErrorKind::Network("reset".into())));
        outcome
    });
    let engine = Engine::new(EngineConfig {
        retry: RetryPolicy {
            max_attempts: 5,
            base: Duration::from_secs(10),
            cap: Duration::from_secs(10),
        },
        abort_on_fatal: false,
        call_timeout: Duration::from_secs(5),
    });
    let trigger = cancel.clone();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let report = engine.run(&plan, &transport, &cancel).await;
    canceller.await.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.batches[0].state, BatchState::PartiallyFailed);
    assert_eq!(report.batches[0].attempts, 1);
    assert!(!report.is_success());
}

#[tokio::test]
async fn cancellation_with_files_outstanding_stops_retries() {
    let plan = root_plan(&[Category::Module], 2);
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let mut transport = direct_mock();
    transport.expect_submit().times(1).returning(move |batch: &Batch, _: &CancelToken| {
        trigger.cancel();
        let mut outcome = UploadOutcome::new(batch.id, 0);
        outcome.record("module_00.txt", Ok(()));
        outcome.record("module_01.txt", Err(ErrorKind::Network("reset".into())));
        outcome
    });

    let report = engine(5, false).run(&plan, &transport, &cancel).await;

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.batches[0].attempts, 1);
    assert_eq!(report.files["module_01.txt"].status, FileStatus::Failed);
}

#[tokio::test]
async fn cancellation_after_the_last_batch_committed_keeps_the_run_completed() {
    let plan = root_plan(&[Category::Module], 2);
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let mut transport = direct_mock();
    transport.expect_submit().times(1).returning(move |batch: &Batch, _: &CancelToken| {
        trigger.cancel();
        succeed_all(batch)
    });

    let report = engine(3, false).run(&plan, &transport, &cancel).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.is_success());
}
