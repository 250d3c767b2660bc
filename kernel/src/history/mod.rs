// History Files
//
// The append-only, per-metric-key sequence of result records, stored as
// line-delimited JSON inside the ledger repository. Line-delimited encoding
// is a protocol invariant: it keeps concurrent appends mergeable by plain
// concatenation, which the push-retry protocol depends on.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::record::{RecordError, ResultRecord};

/// One line of a history file.
///
/// Lines written by older tool versions may no longer parse as the current
/// record shape. They are preserved verbatim and never rewritten; history is
/// append-only even across format drift.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    Record(ResultRecord),
    Legacy(String),
}

/// In-memory view of one history file, oldest record first.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    /// Parse history file content. Never fails: unparseable lines are kept
    /// as [`HistoryEntry::Legacy`].
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| match ResultRecord::from_line(line) {
                Ok(record) => HistoryEntry::Record(record),
                Err(_) => HistoryEntry::Legacy(line.to_owned()),
            })
            .collect();

        Self { entries }
    }

    /// Load the history file at `path`.
    ///
    /// A missing file is the empty-history bootstrap case, not an error.
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(HistoryError::Io {
                path: path.to_owned(),
                source,
            }),
        }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn records(&self) -> impl Iterator<Item = &ResultRecord> {
        self.entries.iter().filter_map(|entry| match entry {
            HistoryEntry::Record(record) => Some(record),
            HistoryEntry::Legacy(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn legacy_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, HistoryEntry::Legacy(_)))
            .count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("failed to access history file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Append one record as a new line at the end of the file, creating the file
/// on first append. This is the only mutation history files ever receive.
pub fn append_record(path: &Path, record: &ResultRecord) -> Result<(), HistoryError> {
    let line = record.to_line()?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| HistoryError::Io {
            path: path.to_owned(),
            source,
        })?;

    writeln!(file, "{line}").map_err(|source| HistoryError::Io {
        path: path.to_owned(),
        source,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MetricKey;

    fn record(commit: &str) -> ResultRecord {
        ResultRecord::new(
            commit,
            MetricKey::new("bench").unwrap(),
            serde_json::json!({ "cycles": 42 }),
        )
    }

    #[test]
    fn parse_preserves_order_and_legacy_lines() {
        let r1 = record("aaa").to_line().unwrap();
        let r2 = record("bbb").to_line().unwrap();
        let content = format!("{r1}\nnot json at all\n{r2}\n");

        let history = History::parse(&content);

        assert_eq!(history.len(), 3);
        assert_eq!(history.legacy_count(), 1);

        let commits: Vec<_> = history.records().map(|r| r.commit.as_str()).collect();
        assert_eq!(commits, ["aaa", "bbb"]);
    }

    #[test]
    fn missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::load(&dir.path().join("metrics-bench.jsonl")).unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn append_creates_then_extends_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics-bench.jsonl");

        append_record(&path, &record("aaa")).unwrap();
        append_record(&path, &record("bbb")).unwrap();

        let history = History::load(&path).unwrap();
        let commits: Vec<_> = history.records().map(|r| r.commit.as_str()).collect();
        assert_eq!(commits, ["aaa", "bbb"]);

        // Every record sits on its own newline-terminated line.
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.ends_with('\n'));
    }
}
