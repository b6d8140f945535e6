//! Coordinating module for the analyze → plan → run → verify pipeline.

use serde::Serialize;
use tracing::{error, info};

use crate::analyze::{analyze, Classifier, TreeAnalysis};
use crate::cancel::CancelToken;
use crate::config::RunConfig;
use crate::contract::{RemoteLister, Transport, TreeSource};
use crate::engine::{Engine, EngineConfig, RunReport};
use crate::error::PublishError;
use crate::model::PublishPlan;
use crate::plan::plan;
use crate::verify::{verify, DriftReport};

/// Everything one publish produced.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub plan: PublishPlan,
    pub run: RunReport,
    pub drift: DriftReport,
}

impl PublishOutcome {
    /// Every batch committed and the remote matches the plan.
    pub fn is_success(&self) -> bool {
        self.run.is_success() && self.drift.is_converged()
    }
}

/// Scan and plan without touching the destination.
pub fn prepare(
    source: &dyn TreeSource,
    classifier: &Classifier,
    run_config: &RunConfig,
) -> Result<(TreeAnalysis, PublishPlan), PublishError> {
    run_config.validate().map_err(|e| {
        error!(error = %e, "[PUBLISH] Invalid run configuration");
        e
    })?;

    let analysis = analyze(source, classifier)?;
    info!(files = analysis.total_files, bytes = analysis.total_bytes, "[PUBLISH] Tree analyzed");

    let plan = match plan(&analysis.entries, run_config.limits(), &run_config.priority_policy) {
        Ok(plan) => plan,
        Err(e) => {
            error!(error = %e, "[PUBLISH] Planning failed");
            return Err(e.into());
        }
    };
    info!(batches = plan.batches.len(), warnings = plan.warnings.len(), "[PUBLISH] Plan computed");
    Ok((analysis, plan))
}

/// Full cycle: analyze, plan, execute every batch through `transport`, then
/// verify the remote state under `remote_root`.
///
/// Only planning and verification errors are returned; upload failures are in
/// the run report.
pub async fn publish(
    source: &dyn TreeSource,
    classifier: &Classifier,
    run_config: &RunConfig,
    transport: &dyn Transport,
    lister: &dyn RemoteLister,
    remote_root: &str,
    cancel: &CancelToken,
) -> Result<PublishOutcome, PublishError> {
    info!(mode = ?transport.mode(), remote_root, "[PUBLISH] Starting publish");
    let (_, plan) = prepare(source, classifier, run_config)?;

    let engine = Engine::new(EngineConfig::from(run_config));
    let run = engine.run(&plan, transport, cancel).await;

    let drift = verify(&plan, &run, lister, remote_root, run_config.call_timeout())
        .await
        .map_err(|e| {
            error!(error = %e, run_id = %run.run_id, "[PUBLISH] Verification failed");
            e
        })?;

    let outcome = PublishOutcome { plan, run, drift };
    info!(
        run_id = %outcome.run.run_id,
        success = outcome.is_success(),
        missing = outcome.drift.missing.len(),
        unexpected = outcome.drift.unexpected.len(),
        "[PUBLISH] Publish finished"
    );
    Ok(outcome)
}
