use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::analyze::Classifier;
use crate::cancel::CancelToken;
use crate::config::PublishConfig;
use crate::load_config::{load_config, TOKEN_ENV};
use crate::publish::{prepare, publish};
use crate::source::FsTreeSource;
use crate::transport::{DirectTransport, GithubClient};

/// CLI for tree-publish: publish a local file tree into a remote repository in prioritized batches.
#[derive(Parser)]
#[clap(
    name = "tree-publish",
    version,
    about = "Publish a local file tree to a remote repository in bounded, prioritized batches"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan the tree and print per-category counts and sizes
    Analyze {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Print the batch plan without contacting the destination
    Plan {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Upload every batch, then verify the remote state
    Publish {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

fn tree_source(config: &PublishConfig) -> FsTreeSource {
    FsTreeSource::new(&config.source.root).with_excludes(config.source.exclude.iter().cloned())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

#[derive(Serialize)]
struct AnalyzeOutput<'a> {
    root: &'a std::path::Path,
    total_files: usize,
    total_bytes: u64,
    categories: &'a std::collections::BTreeMap<crate::model::Category, crate::analyze::CategoryStats>,
}

#[derive(Serialize)]
struct PublishOutput<'a> {
    run: &'a crate::engine::RunReport,
    drift: &'a crate::verify::DriftReport,
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Analyze { config } => {
            let config = load_config(config)?;
            let classifier = Classifier::from_rules(&config.classification)?;
            let source = tree_source(&config);
            let analysis = crate::analyze::analyze(&source, &classifier)
                .context("Failed to analyze tree")?;
            print_json(&AnalyzeOutput {
                root: &config.source.root,
                total_files: analysis.total_files,
                total_bytes: analysis.total_bytes,
                categories: &analysis.summary,
            })
        }
        Commands::Plan { config } => {
            let config = load_config(config)?;
            let classifier = Classifier::from_rules(&config.classification)?;
            let source = tree_source(&config);
            let (_, plan) =
                prepare(&source, &classifier, &config.run).context("Failed to plan publish")?;
            print_json(&plan)
        }
        Commands::Publish { config } => {
            let config = load_config(config)?;
            let token = config
                .token
                .as_deref()
                .with_context(|| format!("{TOKEN_ENV} must be set to publish"))?;
            let classifier = Classifier::from_rules(&config.classification)?;
            let source = Arc::new(tree_source(&config));
            let client = Arc::new(
                GithubClient::new(&config.destination, token, config.run.call_timeout())
                    .context("Failed to construct destination client")?,
            );
            let transport =
                DirectTransport::new(client.clone(), source.clone(), config.run.transport_concurrency);

            let cancel = CancelToken::new();
            let on_signal = cancel.clone();
            let signal_task = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("[CLI] Interrupt received, cancelling after the current batch");
                    on_signal.cancel();
                }
            });

            let result = publish(
                source.as_ref(),
                &classifier,
                &config.run,
                &transport,
                client.as_ref(),
                &config.destination.remote_root,
                &cancel,
            )
            .await;
            signal_task.abort();

            let outcome = result.context("Publish failed")?;
            print_json(&PublishOutput {
                run: &outcome.run,
                drift: &outcome.drift,
            })?;
            if outcome.is_success() {
                Ok(())
            } else {
                Err(anyhow::anyhow!(
                    "publish incomplete: run {:?}, {} failed, {} skipped, {} missing, {} unexpected",
                    outcome.run.status,
                    outcome.run.failed_count(),
                    outcome.run.skipped_count(),
                    outcome.drift.missing.len(),
                    outcome.drift.unexpected.len()
                ))
            }
        }
    }
}
