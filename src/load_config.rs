//! `load_config` module: loads a static YAML config file and injects secrets from the environment.
//!
//! This is the only place where untrusted YAML is parsed and mapped to the
//! strongly-typed [`PublishConfig`]. The file never contains secrets: the API
//! token is read from `PUBLISH_TOKEN` (a `.env` file is honoured).
//!
//! Accepted schema:
//!
//! ```yaml
//! source:
//!   root: ./site
//!   exclude: [dist]
//! destination:
//!   owner: octo
//!   repo: site
//!   branch: main          # default
//!   remote_root: ""       # default
//! run:                    # optional, every key defaults
//!   max_files_per_batch: 100
//!   priority_policy: [root-critical, module, config, asset]
//! classification:         # optional, replaces the built-in rules
//!   - pattern: '\.md$'
//!     category: module
//! ```
//!
//! # Errors
//! All errors use `anyhow::Error` with context and surface at the CLI boundary.
//! An invalid run section or classification pattern fails here, before any I/O
//! against the destination.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

use crate::analyze::{default_rules, ClassificationRule, Classifier};
use crate::config::{DestinationConfig, PublishConfig, RunConfig, SourceConfig};

pub const TOKEN_ENV: &str = "PUBLISH_TOKEN";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    source: SourceConfig,
    destination: DestinationConfig,
    #[serde(default)]
    run: RunConfig,
    #[serde(default)]
    classification: Option<Vec<ClassificationRule>>,
}

/// Loads a static YAML config file and injects the token from the environment.
/// Relative `source.root` paths are resolved against the config file's directory.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PublishConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    raw.run.validate().context("Invalid run configuration")?;
    raw.run.trace_loaded();

    let classification = raw.classification.unwrap_or_else(default_rules);
    Classifier::from_rules(&classification).context("Invalid classification rules")?;

    let mut source = raw.source;
    if source.root.is_relative() {
        if let Some(dir) = path_ref.parent() {
            source.root = dir.join(&source.root);
        }
    }
    raw.destination.trace_loaded();

    let token = match std::env::var(TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => {
            info!("{TOKEN_ENV} found in env");
            Some(token)
        }
        _ => {
            warn!("{TOKEN_ENV} not set; publishing will be unavailable");
            None
        }
    };

    info!(
        root = %source.root.display(),
        rules = classification.len(),
        "Config loaded and merged successfully"
    );
    Ok(PublishConfig {
        source,
        destination: raw.destination,
        run: raw.run,
        classification,
        token,
    })
}
