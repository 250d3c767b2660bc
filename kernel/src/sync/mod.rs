// Ledger Synchronization
//
// Merges exactly one new result record into the shared history under
// concurrent-writer contention: append, commit, push, and on a rejected
// push resynchronize and retry exactly once. Version control's rebase
// machinery stands in for the locking primitive the ledger does not have;
// correctness rests on history files staying append-only and line-delimited.

use std::path::PathBuf;

use crate::history::{History, HistoryError};
use crate::record::{MetricKey, ResultRecord};

pub mod git;
pub mod memory;
mod store;

pub use store::{LedgerStore, PushOutcome};

/// Push attempts per run: the first, plus exactly one retry after a
/// conflict. Bounded so sustained contention fails the run instead of
/// live-locking it.
pub const MAX_PUSH_ATTEMPTS: u32 = 2;

/// Authorship for ledger commits, fixed per store so automation commits are
/// recognizable in history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        Self {
            name: "tally-bot".to_owned(),
            email: "tally-bot@users.noreply.github.com".to_owned(),
        }
    }
}

impl CommitIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Parse the conventional `Name <email>` form.
    pub fn parse(raw: &str) -> Option<Self> {
        let (name, rest) = raw.split_once('<')?;
        let email = rest.strip_suffix('>')?;

        let name = name.trim();
        let email = email.trim();
        if name.is_empty() || email.is_empty() {
            return None;
        }

        Some(Self::new(name, email))
    }
}

impl std::fmt::Display for CommitIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// The CI event class that started the run. Only direct pushes to the
/// benchmarked repository mutate the shared ledger; every other trigger
/// still measures and publishes the fallback artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    Push,
    ManualDispatch,
    Other(String),
}

impl TriggerEvent {
    pub fn from_event_name(name: &str) -> Self {
        match name {
            "push" => Self::Push,
            "workflow_dispatch" => Self::ManualDispatch,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn mutates_ledger(&self) -> bool {
        matches!(self, Self::Push)
    }
}

impl std::fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => f.write_str("push"),
            Self::ManualDispatch => f.write_str("workflow_dispatch"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("ledger transport failure during {op}: {detail}")]
    Transport { op: String, detail: String },

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("{path} is not a git working copy")]
    NotAWorkingCopy { path: PathBuf },

    #[error("push rejected {attempts} times, ledger under contention")]
    ContentionExceeded { attempts: u32 },
}

/// Proof of a completed synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReceipt {
    /// Push attempts it took; 2 means the one allowed retry was used.
    pub attempts: u32,
}

/// Runs the append/commit/push/retry protocol against a ledger store.
#[derive(Debug)]
pub struct Synchronizer<S> {
    store: S,
}

impl<S: LedgerStore> Synchronizer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The current head's history for `key`, used both as the executor's
    /// comparison input and as the base of the first append attempt.
    pub fn baseline(&mut self, key: &MetricKey) -> Result<History, SyncError> {
        self.store.baseline(key)
    }

    pub fn history_path(&self, key: &MetricKey) -> Option<PathBuf> {
        self.store.history_path(key)
    }

    /// Durably append `record` to the shared history.
    ///
    /// A run's record always lands strictly after every record visible in
    /// its baseline; nothing more is guaranteed about relative order
    /// between concurrent runs.
    pub fn record(
        &mut self,
        key: &MetricKey,
        record: &ResultRecord,
        message: &str,
    ) -> Result<SyncReceipt, SyncError> {
        self.store.commit_append(key, record, message)?;

        let mut attempts = 0;
        loop {
            attempts += 1;

            match self.store.push()? {
                PushOutcome::Accepted => {
                    tracing::info!(key = %key, attempts, "record pushed to ledger");
                    return Ok(SyncReceipt { attempts });
                }
                PushOutcome::RejectedRemoteAdvanced if attempts < MAX_PUSH_ATTEMPTS => {
                    tracing::warn!(
                        key = %key,
                        attempts,
                        "push rejected, resynchronizing onto the new remote head"
                    );
                    self.store.resync()?;
                }
                PushOutcome::RejectedRemoteAdvanced => {
                    return Err(SyncError::ContentionExceeded { attempts });
                }
            }
        }
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}
