use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::analyze::ClassificationRule;
use crate::error::ConfigError;
use crate::model::{BatchLimits, Category};
use crate::plan::effective_policy;

/// Run configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub max_files_per_batch: usize,
    pub max_bytes_per_batch: u64,
    pub priority_policy: Vec<Category>,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Halt the whole run on the first non-retryable batch failure.
    pub abort_on_fatal: bool,
    /// Maximum in-flight file writes inside one batch (direct transport).
    pub transport_concurrency: usize,
    /// Per-call timeout for `submit`, `ensure_prefix` and `list`.
    pub call_timeout_secs: u64,
    /// Treat missing UI elements as retryable (interactive transport).
    pub interactive_fallback: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_files_per_batch: 100,
            max_bytes_per_batch: 25 * 1024 * 1024,
            priority_policy: Category::ALL.to_vec(),
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            abort_on_fatal: false,
            transport_concurrency: 4,
            call_timeout_secs: 60,
            interactive_fallback: true,
        }
    }
}

impl RunConfig {
    /// Reject invalid values and combinations before any network call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.max_files_per_batch == 0 {
            return invalid("max_files_per_batch must be greater than 0".into());
        }
        if self.max_bytes_per_batch == 0 {
            return invalid("max_bytes_per_batch must be greater than 0".into());
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts must be at least 1".into());
        }
        if self.transport_concurrency == 0 {
            return invalid("transport_concurrency must be at least 1".into());
        }
        if self.call_timeout_secs == 0 {
            return invalid("call_timeout_secs must be greater than 0".into());
        }
        if self.backoff_base_ms > self.backoff_cap_ms {
            return invalid(format!(
                "backoff_base_ms ({}) exceeds backoff_cap_ms ({})",
                self.backoff_base_ms, self.backoff_cap_ms
            ));
        }
        effective_policy(&self.priority_policy)?;
        Ok(())
    }

    pub fn limits(&self) -> BatchLimits {
        BatchLimits {
            max_files_per_batch: self.max_files_per_batch,
            max_bytes_per_batch: self.max_bytes_per_batch,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn trace_loaded(&self) {
        info!(
            max_files_per_batch = self.max_files_per_batch,
            max_bytes_per_batch = self.max_bytes_per_batch,
            max_attempts = self.max_attempts,
            abort_on_fatal = self.abort_on_fatal,
            transport_concurrency = self.transport_concurrency,
            "Loaded RunConfig"
        );
        debug!(?self, "RunConfig loaded (full debug)");
    }
}

/// Where the local tree lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub root: PathBuf,
    /// Extra directory or file names to skip, on top of `.git`, `target` and `node_modules`.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// The remote repository to publish into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Directory inside the repository that receives the tree.
    #[serde(default)]
    pub remote_root: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Replace remote files whose content differs instead of reporting them as
    /// conflicts. Identical content is always left alone.
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_overwrite() -> bool {
    false
}

impl DestinationConfig {
    pub fn trace_loaded(&self) {
        info!(
            owner = %self.owner,
            repo = %self.repo,
            branch = %self.branch,
            remote_root = %self.remote_root,
            "Loaded destination"
        );
    }
}

/// Everything the CLI needs for one publish.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub run: RunConfig,
    pub classification: Vec<ClassificationRule>,
    /// Token for the destination API; `None` when not present in the environment.
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let cfg = RunConfig {
            max_bytes_per_batch: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backoff_base_above_cap_is_rejected() {
        let cfg = RunConfig {
            backoff_base_ms: 10_000,
            backoff_cap_ms: 1_000,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("backoff_base_ms"));
    }

    #[test]
    fn duplicate_policy_entries_are_rejected() {
        let cfg = RunConfig {
            priority_policy: vec![Category::Asset, Category::Asset],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
