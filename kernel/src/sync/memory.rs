// In-Memory Ledger
//
// Ledger store with a scriptable remote, so the push-retry protocol can be
// exercised deterministically, including injected concurrent writers. Also
// usable for dry runs that should never touch a real repository.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;

use crate::history::History;
use crate::record::{MetricKey, ResultRecord};
use crate::sync::{LedgerStore, PushOutcome, SyncError};

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    remote: BTreeMap<String, String>,
    remote_rev: u64,

    // Local clone state: files as of `base_rev`, plus committed-but-unpushed
    // appends in commit order.
    local: BTreeMap<String, String>,
    base_rev: u64,
    staged: Vec<(String, String)>,

    // Appends a racing writer lands on the remote, one popped right before
    // each of our push attempts.
    races: VecDeque<(String, String)>,

    commit_messages: Vec<String>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the remote (and the local clone) with existing history.
    pub fn seed(&mut self, key: &MetricKey, records: &[ResultRecord]) -> Result<(), SyncError> {
        let file = key.history_file_name();
        for record in records {
            let line = record.to_line().map_err(crate::history::HistoryError::from)?;
            append_line(&mut self.remote, &file, &line);
        }
        self.remote_rev += 1;
        self.local = self.remote.clone();
        self.base_rev = self.remote_rev;
        Ok(())
    }

    /// Queue a concurrent writer's append. It lands on the remote right
    /// before our next push attempt, which therefore gets rejected.
    pub fn inject_race(&mut self, key: &MetricKey, record: &ResultRecord) -> Result<(), SyncError> {
        let line = record
            .to_line()
            .map_err(crate::history::HistoryError::from)?;
        self.races.push_back((key.history_file_name(), line));
        Ok(())
    }

    /// The remote's view of the history for `key`.
    pub fn remote_history(&self, key: &MetricKey) -> History {
        self.remote
            .get(&key.history_file_name())
            .map(|content| History::parse(content))
            .unwrap_or_default()
    }

    pub fn commit_messages(&self) -> &[String] {
        &self.commit_messages
    }
}

fn append_line(files: &mut BTreeMap<String, String>, file: &str, line: &str) {
    let content = files.entry(file.to_owned()).or_default();
    content.push_str(line);
    content.push('\n');
}

impl LedgerStore for InMemoryLedger {
    fn baseline(&mut self, key: &MetricKey) -> Result<History, SyncError> {
        Ok(self
            .local
            .get(&key.history_file_name())
            .map(|content| History::parse(content))
            .unwrap_or_default())
    }

    fn history_path(&self, _key: &MetricKey) -> Option<PathBuf> {
        None
    }

    fn commit_append(
        &mut self,
        key: &MetricKey,
        record: &ResultRecord,
        message: &str,
    ) -> Result<(), SyncError> {
        let line = record
            .to_line()
            .map_err(crate::history::HistoryError::from)?;
        let file = key.history_file_name();

        append_line(&mut self.local, &file, &line);
        self.staged.push((file, line));
        self.commit_messages.push(message.to_owned());

        Ok(())
    }

    fn push(&mut self) -> Result<PushOutcome, SyncError> {
        if let Some((file, line)) = self.races.pop_front() {
            append_line(&mut self.remote, &file, &line);
            self.remote_rev += 1;
        }

        if self.base_rev != self.remote_rev {
            return Ok(PushOutcome::RejectedRemoteAdvanced);
        }

        for (file, line) in self.staged.drain(..) {
            append_line(&mut self.remote, &file, &line);
        }
        self.remote_rev += 1;
        self.base_rev = self.remote_rev;

        Ok(PushOutcome::Accepted)
    }

    fn resync(&mut self) -> Result<(), SyncError> {
        self.local = self.remote.clone();
        for (file, line) in &self.staged {
            append_line(&mut self.local, file, line);
        }
        self.base_rev = self.remote_rev;

        Ok(())
    }
}
