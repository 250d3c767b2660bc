use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tally_kernel::executor::builtin::BuiltinExecutor;
use tally_kernel::executor::{Executor, ProcessExecutor};
use tally_kernel::publish::{ArtifactDir, FallbackPublisher};
use tally_kernel::record::MetricKey;
use tally_kernel::run::{execute_run, RunConfig};
use tally_kernel::sync::git::GitLedger;
use tally_kernel::sync::{CommitIdentity, Synchronizer, TriggerEvent};

/// Tally benchmark ledger CLI
#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(about = "Record benchmark results into a shared git-backed ledger", long_about = None)]
struct Cli {
    /// Metric key selecting the history series
    #[arg(long)]
    metric_key: String,

    /// Path to the benchmark definitions JSON
    #[arg(long)]
    defs: PathBuf,

    /// Path to a working copy of the ledger repository with push access
    #[arg(long)]
    ledger: PathBuf,

    /// Branch to push results to (defaults to the clone's upstream)
    #[arg(long)]
    branch: Option<String>,

    /// External executor command; the built-in measurement runs when omitted
    #[arg(long)]
    executor: Option<String>,

    /// Directory where the fallback artifact is staged for upload
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Commit id being measured (defaults to $GITHUB_SHA)
    #[arg(long)]
    commit: Option<String>,

    /// CI event that triggered the run (defaults to $GITHUB_EVENT_NAME, then "push")
    #[arg(long)]
    event: Option<String>,

    /// Ledger commit identity as "Name <email>"
    #[arg(long)]
    author: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // ----------------------------
    // Resolve run inputs
    // ----------------------------
    let commit = match cli.commit {
        Some(commit) => commit,
        None => std::env::var("GITHUB_SHA")
            .map_err(|_| anyhow!("no --commit given and GITHUB_SHA is not set"))?,
    };

    let event = cli
        .event
        .or_else(|| std::env::var("GITHUB_EVENT_NAME").ok())
        .unwrap_or_else(|| "push".to_owned());

    let config = RunConfig {
        commit,
        metric_key: MetricKey::new(&cli.metric_key)?,
        defs_path: cli.defs,
        trigger: TriggerEvent::from_event_name(&event),
    };

    // ----------------------------
    // Ledger store
    // ----------------------------
    let mut ledger = GitLedger::open(&cli.ledger)
        .with_context(|| format!("opening ledger working copy {}", cli.ledger.display()))?;

    if let Some(branch) = cli.branch {
        ledger = ledger.with_branch(branch);
    }

    if let Some(author) = &cli.author {
        let identity = CommitIdentity::parse(author)
            .ok_or_else(|| anyhow!("cannot parse author {author:?}, expected \"Name <email>\""))?;
        ledger = ledger.with_identity(identity);
    }

    let mut sync = Synchronizer::new(ledger);

    // ----------------------------
    // Executor and fallback publisher
    // ----------------------------
    let executor: Box<dyn Executor> = match &cli.executor {
        Some(command) => Box::new(ProcessExecutor::new(
            command.split_whitespace().map(|arg| arg.to_owned()).collect(),
        )?),
        None => Box::new(BuiltinExecutor::default()),
    };

    let publisher = cli.artifact_dir.map(ArtifactDir::new);

    // ----------------------------
    // Run
    // ----------------------------
    tracing::info!(
        key = %config.metric_key,
        trigger = %config.trigger,
        "starting benchmark run"
    );

    let report = execute_run(
        &config,
        executor.as_ref(),
        &mut sync,
        publisher.as_ref().map(|p| p as &dyn FallbackPublisher),
    )?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
