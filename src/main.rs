mod config;
mod forge;
mod metrics;
mod output;
mod resolve;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::forge::github::GitHubDirectory;
use crate::metrics::MetricsRegistry;
use crate::output::OutputMode;
use crate::resolve::accounts::{self, RunSummary};
use crate::resolve::cache::ResolutionCache;
use crate::resolve::keys::KeyResolver;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "ghkeys",
    version,
    about = "Resolve SSH keys of GitHub users and team members into authorized_keys"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    /// Write each account's ~/.ssh/authorized_keys instead of printing.
    #[arg(short, long)]
    write: bool,

    /// Verbose logging and a GitHub rate limit report before resolving.
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Write run metrics in OpenMetrics text format to this path.
    #[arg(long, value_name = "PATH")]
    metrics_file: Option<PathBuf>,

    /// Only resolve the configured account with this name.
    username: Option<String>,
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

fn init_tracing(cli: &Cli) {
    let default_level = if cli.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries keys in print mode.
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let fmt = if cli.log_json {
        fmt.json().boxed()
    } else {
        fmt.boxed()
    };

    tracing_subscriber::registry().with(filter).with(fmt).init();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Tracing ----
    init_tracing(&cli);

    // ---- Config ----
    let config = config::load_config(&cli.config)?;
    tracing::debug!(
        config_path = %cli.config.display(),
        accounts = config.users.len(),
        "configuration loaded"
    );

    // ---- Metrics ----
    let metrics = MetricsRegistry::new();

    // ---- Directory ----
    let github = Arc::new(GitHubDirectory::new(&config, metrics.clone())?);
    if cli.debug {
        match github.rate_limit().await {
            Ok(status) => tracing::debug!(
                limit = status.limit,
                remaining = status.remaining,
                reset = status.reset,
                "GitHub rate limit"
            ),
            Err(e) => tracing::warn!(error = %e, "could not read GitHub rate limit"),
        }
    }

    // ---- Resolution ----
    let cache = Arc::new(ResolutionCache::new(metrics.clone()));
    let resolver = KeyResolver::new(
        github,
        cache,
        config.max_concurrent_requests,
        metrics.clone(),
    );
    let results = accounts::resolve_all(&resolver, &config.users, cli.username.as_deref()).await;

    let summary = RunSummary::from_results(&results);
    summary.log();
    metrics.metrics.keys_emitted.inc_by(summary.keys as u64);

    // ---- Output ----
    let mode = if cli.write {
        OutputMode::Write
    } else {
        OutputMode::Print
    };
    output::emit(&results, mode).await?;

    if let Some(path) = &cli.metrics_file {
        metrics.write_textfile(path).await?;
        tracing::debug!(path = %path.display(), "metrics written");
    }

    Ok(())
}
