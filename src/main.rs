use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tree_publish::cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    run(cli).await
}
