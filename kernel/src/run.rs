// Run Orchestration
//
// One benchmark run end to end: load definitions, acquire the baseline,
// produce the record, stage the fallback artifact, then synchronize the
// ledger when the trigger allows mutation.

use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

use crate::defs::{BenchDefs, DefsError};
use crate::executor::{Executor, ExecutorContext, ExecutorError};
use crate::publish::FallbackPublisher;
use crate::record::{MetricKey, ResultRecord};
use crate::sync::{LedgerStore, SyncError, Synchronizer, TriggerEvent};

/// Tags one run in logs and in the ledger commit message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Source revision being measured.
    pub commit: String,
    pub metric_key: MetricKey,
    pub defs_path: PathBuf,
    pub trigger: TriggerEvent,
}

/// What happened to the shared history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerOutcome {
    /// The record is durably part of shared history.
    Pushed { attempts: u32 },

    /// The trigger class does not mutate the ledger; only the measurement
    /// and the fallback artifact were produced.
    SkippedByTrigger,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub record: ResultRecord,
    pub ledger: LedgerOutcome,
    pub artifact: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("benchmark definitions rejected: {0}")]
    Defs(#[from] DefsError),

    #[error("benchmark executor failed: {0}")]
    Executor(#[from] ExecutorError),

    #[error("ledger synchronization failed: {0}")]
    Sync(#[from] SyncError),
}

/// Execute one benchmark run.
///
/// Failure ordering matters here: definitions are validated before anything
/// runs, executor failure aborts before any ledger mutation or artifact
/// staging, and the artifact is staged before the push so the measurement
/// survives a failed synchronization.
pub fn execute_run<S: LedgerStore>(
    config: &RunConfig,
    executor: &dyn Executor,
    sync: &mut Synchronizer<S>,
    publisher: Option<&dyn FallbackPublisher>,
) -> Result<RunReport, RunError> {
    let run_id = RunId::new();
    let span = tracing::info_span!("run", %run_id, key = %config.metric_key);
    let _guard = span.enter();

    let defs = BenchDefs::load(&config.defs_path)?;

    let baseline = sync.baseline(&config.metric_key)?;
    tracing::info!(
        commit = %config.commit,
        baseline_records = baseline.len(),
        "baseline acquired"
    );

    let baseline_path = sync.history_path(&config.metric_key);
    let record = executor.produce(&ExecutorContext {
        commit: &config.commit,
        metric_key: &config.metric_key,
        defs: &defs,
        defs_path: &config.defs_path,
        baseline: &baseline,
        baseline_path: baseline_path.as_deref(),
    })?;

    let artifact = publisher.and_then(|publisher| match publisher.publish(&record) {
        Ok(path) => Some(path),
        Err(err) => {
            // Backstop only: losing the artifact never fails the run.
            tracing::warn!(error = %err, "fallback publish failed");
            None
        }
    });

    let ledger = if config.trigger.mutates_ledger() {
        let message = format!(
            "add {} result for {}\n\nrun-id: {}",
            config.metric_key, config.commit, run_id
        );
        let receipt = sync.record(&config.metric_key, &record, &message)?;
        LedgerOutcome::Pushed {
            attempts: receipt.attempts,
        }
    } else {
        tracing::info!(trigger = %config.trigger, "trigger does not mutate the ledger");
        LedgerOutcome::SkippedByTrigger
    };

    Ok(RunReport {
        run_id,
        record,
        ledger,
        artifact,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{ArtifactDir, PublishError};
    use crate::sync::memory::InMemoryLedger;
    use std::cell::Cell;
    use std::path::Path;

    struct StubExecutor {
        calls: Cell<u32>,
        fail: bool,
    }

    impl StubExecutor {
        fn ok() -> Self {
            Self {
                calls: Cell::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: Cell::new(0),
                fail: true,
            }
        }
    }

    impl Executor for StubExecutor {
        fn produce(&self, ctx: &ExecutorContext<'_>) -> Result<ResultRecord, ExecutorError> {
            self.calls.set(self.calls.get() + 1);

            if self.fail {
                return Err(ExecutorError::EmptyCommand);
            }

            Ok(ResultRecord::new(
                ctx.commit,
                ctx.metric_key.clone(),
                serde_json::json!({ "baseline-records": ctx.baseline.len() }),
            ))
        }
    }

    fn write_defs(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("defs.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    const VALID_DEFS: &str = r#"{ "commands": { "noop": ["true"] } }"#;

    fn config(defs_path: PathBuf, trigger: TriggerEvent) -> RunConfig {
        RunConfig {
            commit: "27b31a5".to_owned(),
            metric_key: MetricKey::new("bench").unwrap(),
            defs_path,
            trigger,
        }
    }

    #[test]
    fn push_run_lands_record_and_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let defs_path = write_defs(dir.path(), VALID_DEFS);
        let config = config(defs_path, TriggerEvent::Push);

        let executor = StubExecutor::ok();
        let mut sync = Synchronizer::new(InMemoryLedger::new());
        let publisher = ArtifactDir::new(dir.path().join("artifacts"));

        let report = execute_run(&config, &executor, &mut sync, Some(&publisher)).unwrap();

        assert_eq!(report.ledger, LedgerOutcome::Pushed { attempts: 1 });
        let artifact = report.artifact.expect("artifact staged");
        let staged =
            ResultRecord::from_line(std::fs::read_to_string(artifact).unwrap().trim()).unwrap();
        assert_eq!(staged, report.record);

        let history = sync.store_mut().remote_history(&config.metric_key);
        assert_eq!(history.records().count(), 1);
    }

    #[test]
    fn non_push_trigger_skips_ledger_but_still_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let defs_path = write_defs(dir.path(), VALID_DEFS);
        let config = config(defs_path, TriggerEvent::ManualDispatch);

        let executor = StubExecutor::ok();
        let mut sync = Synchronizer::new(InMemoryLedger::new());
        let publisher = ArtifactDir::new(dir.path().join("artifacts"));

        let report = execute_run(&config, &executor, &mut sync, Some(&publisher)).unwrap();

        assert_eq!(report.ledger, LedgerOutcome::SkippedByTrigger);
        assert!(report.artifact.is_some());
        assert!(sync
            .store_mut()
            .remote_history(&config.metric_key)
            .is_empty());
    }

    #[test]
    fn malformed_defs_abort_before_anything_runs() {
        let dir = tempfile::tempdir().unwrap();
        let defs_path = write_defs(dir.path(), r#"{ "commands": { "noop": [] } }"#);
        let config = config(defs_path, TriggerEvent::Push);

        let executor = StubExecutor::ok();
        let mut sync = Synchronizer::new(InMemoryLedger::new());
        let publisher = ArtifactDir::new(dir.path().join("artifacts"));

        let err = execute_run(&config, &executor, &mut sync, Some(&publisher)).unwrap_err();

        assert!(matches!(err, RunError::Defs(DefsError::NoCommands(_))));
        assert_eq!(executor.calls.get(), 0);
        assert!(!dir.path().join("artifacts").exists());
        assert!(sync
            .store_mut()
            .remote_history(&config.metric_key)
            .is_empty());
    }

    #[test]
    fn executor_failure_leaves_ledger_and_artifacts_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let defs_path = write_defs(dir.path(), VALID_DEFS);
        let config = config(defs_path, TriggerEvent::Push);

        let executor = StubExecutor::failing();
        let mut sync = Synchronizer::new(InMemoryLedger::new());
        let publisher = ArtifactDir::new(dir.path().join("artifacts"));

        let err = execute_run(&config, &executor, &mut sync, Some(&publisher)).unwrap_err();

        assert!(matches!(err, RunError::Executor(_)));
        assert!(!dir.path().join("artifacts").exists());
        assert!(sync
            .store_mut()
            .remote_history(&config.metric_key)
            .is_empty());
    }

    #[test]
    fn artifact_survives_fatal_contention() {
        let dir = tempfile::tempdir().unwrap();
        let defs_path = write_defs(dir.path(), VALID_DEFS);
        let config = config(defs_path, TriggerEvent::Push);

        let racer1 = ResultRecord::new(
            "racer1",
            config.metric_key.clone(),
            serde_json::json!({}),
        );
        let racer2 = ResultRecord::new(
            "racer2",
            config.metric_key.clone(),
            serde_json::json!({}),
        );

        let mut store = InMemoryLedger::new();
        store.inject_race(&config.metric_key, &racer1).unwrap();
        store.inject_race(&config.metric_key, &racer2).unwrap();

        let executor = StubExecutor::ok();
        let mut sync = Synchronizer::new(store);
        let publisher = ArtifactDir::new(dir.path().join("artifacts"));

        let err = execute_run(&config, &executor, &mut sync, Some(&publisher)).unwrap_err();

        assert!(matches!(err, RunError::Sync(SyncError::ContentionExceeded { .. })));

        // The measurement itself survives as the staged artifact.
        let artifact = dir
            .path()
            .join("artifacts")
            .join(config.metric_key.artifact_file_name());
        assert!(artifact.exists());
    }

    struct BrokenPublisher;

    impl FallbackPublisher for BrokenPublisher {
        fn publish(&self, _record: &ResultRecord) -> Result<PathBuf, PublishError> {
            Err(PublishError::Io {
                path: PathBuf::from("/nonexistent"),
                source: std::io::Error::other("synthetic"),
            })
        }
    }

    #[test]
    fn publish_failure_does_not_change_the_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let defs_path = write_defs(dir.path(), VALID_DEFS);
        let config = config(defs_path, TriggerEvent::Push);

        let executor = StubExecutor::ok();
        let mut sync = Synchronizer::new(InMemoryLedger::new());

        let report = execute_run(&config, &executor, &mut sync, Some(&BrokenPublisher)).unwrap();

        assert_eq!(report.ledger, LedgerOutcome::Pushed { attempts: 1 });
        assert!(report.artifact.is_none());
    }
}
