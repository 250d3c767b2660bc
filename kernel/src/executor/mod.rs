// Benchmark Executor Seam
//
// The executor is an opaque collaborator: given the commit under test, the
// benchmark definitions and the (possibly stale) baseline history, it
// produces exactly one result record or fails without partial output. The
// synchronizer only ever sees this contract, so the ledger protocol can be
// exercised with a stub executor.

use std::path::Path;
use std::process::{Command, ExitStatus};

use crate::defs::BenchDefs;
use crate::history::History;
use crate::record::{MetricKey, RecordError, ResultRecord};

pub mod builtin;

/// Inputs for one record production.
///
/// `baseline` is read-only comparison input for the executor's own use; the
/// executor must never mutate the history file itself.
#[derive(Debug)]
pub struct ExecutorContext<'a> {
    pub commit: &'a str,
    pub metric_key: &'a MetricKey,
    pub defs: &'a BenchDefs,
    pub defs_path: &'a Path,
    pub baseline: &'a History,
    pub baseline_path: Option<&'a Path>,
}

/// Produces exactly one result record per invocation.
pub trait Executor {
    fn produce(&self, ctx: &ExecutorContext<'_>) -> Result<ResultRecord, ExecutorError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("executor command is empty")]
    EmptyCommand,

    #[error("failed to spawn executor {command:?}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("executor {command:?} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("benchmark command {command:?} exited with {status}")]
    CommandFailed { command: String, status: ExitStatus },

    #[error("unexpected perf stat output: {0}")]
    Perf(String),

    #[error("executor output rejected: {0}")]
    Output(#[from] RecordError),

    #[error("failed to encode measurement payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Runs an external executor process.
///
/// The child is invoked as `<argv...> <defs-path> [<history-path>]`, with the
/// commit and metric key in `TALLY_COMMIT` / `TALLY_METRIC_KEY`. Its standard
/// output must be the record payload as a single JSON line; standard error is
/// captured and surfaced in the failure diagnostic.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    argv: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(argv: Vec<String>) -> Result<Self, ExecutorError> {
        if argv.is_empty() || argv[0].trim().is_empty() {
            return Err(ExecutorError::EmptyCommand);
        }

        Ok(Self { argv })
    }

    fn display_command(&self) -> String {
        self.argv.join(" ")
    }
}

impl Executor for ProcessExecutor {
    fn produce(&self, ctx: &ExecutorContext<'_>) -> Result<ResultRecord, ExecutorError> {
        let mut command = Command::new(&self.argv[0]);
        command
            .args(&self.argv[1..])
            .arg(ctx.defs_path)
            .env("TALLY_COMMIT", ctx.commit)
            .env("TALLY_METRIC_KEY", ctx.metric_key.as_str());

        if let Some(baseline_path) = ctx.baseline_path {
            command.arg(baseline_path);
        }

        tracing::debug!(command = %self.display_command(), "invoking benchmark executor");

        let output = command.output().map_err(|source| ExecutorError::Spawn {
            command: self.display_command(),
            source,
        })?;

        if !output.status.success() {
            return Err(ExecutorError::Failed {
                command: self.display_command(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        Ok(ResultRecord::from_executor_stdout(
            &output.stdout,
            ctx.commit,
            ctx.metric_key,
        )?)
    }
}
