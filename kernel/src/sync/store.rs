// Ledger Storage Abstraction
//
// Defines the contract for the shared ledger: a versioned remote holding
// history files, mutated only through compare-and-swap style pushes.
//
// This module defines *interfaces only*.

use std::path::PathBuf;

use crate::history::History;
use crate::record::{MetricKey, ResultRecord};
use crate::sync::SyncError;

/// Outcome of one publish attempt against the remote head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The remote accepted the local commit; the record is durably part of
    /// shared history.
    Accepted,

    /// A concurrent writer advanced the remote head first. Recoverable by
    /// resynchronizing; every other failure is a transport error.
    RejectedRemoteAdvanced,
}

/// Shared ledger accessed through optimistic concurrency.
///
/// Properties required from implementations:
/// - History files are append-only and line-delimited
/// - `push` has compare-and-swap semantics on the remote head
/// - `resync` replays committed-but-unpushed appends onto the new head,
///   concatenating concurrent appends in commit order
///
/// Implementations MUST NOT:
/// - Reorder, rewrite or drop existing records
/// - Report a rejected push as success
pub trait LedgerStore {
    /// The current head's history for `key`. A missing file is an empty
    /// history, not an error.
    fn baseline(&mut self, key: &MetricKey) -> Result<History, SyncError>;

    /// On-disk location of the history file, where the store has one.
    fn history_path(&self, key: &MetricKey) -> Option<PathBuf>;

    /// Append one record line to the history file for `key` and commit it
    /// locally under the store's automation identity.
    fn commit_append(
        &mut self,
        key: &MetricKey,
        record: &ResultRecord,
        message: &str,
    ) -> Result<(), SyncError>;

    /// Publish local commits to the remote head.
    fn push(&mut self) -> Result<PushOutcome, SyncError>;

    /// Rebase local commits onto the advanced remote head.
    fn resync(&mut self) -> Result<(), SyncError>;
}
