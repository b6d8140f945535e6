//! Convergence check between what a run committed and what the remote holds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::contract::RemoteLister;
use crate::engine::RunReport;
use crate::error::VerifyError;
use crate::model::PublishPlan;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Files of committed batches.
    pub expected_count: usize,
    /// Files found under the remote root.
    pub remote_count: usize,
    /// Committed but not present remotely.
    pub missing: BTreeSet<String>,
    /// Present remotely but not part of the plan at all.
    pub unexpected: BTreeSet<String>,
}

impl DriftReport {
    pub fn is_converged(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Compare committed batches against a fresh listing of `remote_root`.
///
/// Files of batches that did not commit are neither expected nor unexpected:
/// they are already accounted for as failures in the run report.
pub async fn verify(
    plan: &PublishPlan,
    run: &RunReport,
    lister: &dyn RemoteLister,
    remote_root: &str,
    timeout: Duration,
) -> Result<DriftReport, VerifyError> {
    let root = remote_root.trim_matches('/');
    info!(remote_root = root, committed_batches = run.committed_batches().count(), "[VERIFY] Listing remote state");

    let listed = match tokio::time::timeout(timeout, lister.list(root)).await {
        Ok(Ok(paths)) => paths,
        Ok(Err(source)) => {
            error!(remote_root = root, error = %source, "[VERIFY] Remote listing failed");
            return Err(VerifyError::Listing {
                prefix: root.to_string(),
                source,
            });
        }
        Err(_) => {
            error!(remote_root = root, ?timeout, "[VERIFY] Remote listing timed out");
            return Err(VerifyError::Timeout {
                prefix: root.to_string(),
                after: timeout,
            });
        }
    };

    let actual: BTreeSet<String> = listed
        .into_iter()
        .filter_map(|path| strip_root(root, &path))
        .collect();

    let expected: BTreeSet<&str> = run
        .committed_batches()
        .filter_map(|b| plan.batch(b.batch_id))
        .flat_map(|b| b.paths())
        .collect();

    let missing: BTreeSet<String> = expected
        .iter()
        .filter(|p| !actual.contains(**p))
        .map(|p| p.to_string())
        .collect();
    let unexpected: BTreeSet<String> = actual
        .iter()
        .filter(|p| !plan.manifest.contains_key(p.as_str()))
        .cloned()
        .collect();

    let report = DriftReport {
        expected_count: expected.len(),
        remote_count: actual.len(),
        missing,
        unexpected,
    };
    if report.is_converged() {
        info!(expected = report.expected_count, remote = report.remote_count, "[VERIFY] Remote state converged");
    } else {
        warn!(
            missing = report.missing.len(),
            unexpected = report.unexpected.len(),
            "[VERIFY] Remote state drifted from plan"
        );
    }
    Ok(report)
}

fn strip_root(root: &str, path: &str) -> Option<String> {
    if root.is_empty() {
        return Some(path.to_string());
    }
    path.strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_root_requires_a_directory_boundary() {
        assert_eq!(strip_root("site", "site/index.html").as_deref(), Some("index.html"));
        assert_eq!(strip_root("site", "sitemap.xml"), None);
        assert_eq!(strip_root("", "a/b").as_deref(), Some("a/b"));
    }
}
