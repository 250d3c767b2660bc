// Result Records
//
// The atomic unit of ledger data: one immutable measurement produced by
// one benchmark run for one metric key.

use serde::{Deserialize, Serialize};

/// Identifies the benchmark series a record belongs to.
///
/// The key doubles as a file-name component, so it is restricted to
/// `[A-Za-z0-9._-]` and must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetricKey(String);

impl MetricKey {
    pub fn new(key: impl Into<String>) -> Result<Self, RecordError> {
        let key = key.into();
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

        if !valid {
            return Err(RecordError::InvalidMetricKey(key));
        }

        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the history file for this series inside the ledger repository.
    pub fn history_file_name(&self) -> String {
        format!("metrics-{}.jsonl", self.0)
    }

    /// Name of the fallback artifact for this series.
    pub fn artifact_file_name(&self) -> String {
        format!("metrics-{}.json", self.0)
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MetricKey {
    type Error = RecordError;

    fn try_from(key: String) -> Result<Self, Self::Error> {
        Self::new(key)
    }
}

impl From<MetricKey> for String {
    fn from(key: MetricKey) -> Self {
        key.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("metric key {0:?} is empty or contains characters outside [A-Za-z0-9._-]")]
    InvalidMetricKey(String),

    #[error("malformed record line: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("executor emitted {lines} output lines, expected exactly one")]
    UnexpectedOutputShape { lines: usize },

    #[error("record serialization spans more than one line")]
    NotSingleLine,
}

/// One measurement produced by one benchmark run.
///
/// Immutable once produced: records are appended to history, never edited.
/// The payload is opaque to the synchronizer and carried verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub commit: String,
    pub metric_key: MetricKey,
    pub payload: serde_json::Value,
}

impl ResultRecord {
    pub fn new(commit: impl Into<String>, metric_key: MetricKey, payload: serde_json::Value) -> Self {
        Self {
            commit: commit.into(),
            metric_key,
            payload,
        }
    }

    /// Serialize to the wire form: one line of compact JSON, no newline.
    ///
    /// The single-line guarantee is what keeps concurrent appends mergeable
    /// by plain concatenation.
    pub fn to_line(&self) -> Result<String, RecordError> {
        let line = serde_json::to_string(self)?;

        if line.contains('\n') {
            return Err(RecordError::NotSingleLine);
        }

        Ok(line)
    }

    /// Parse one history line back into a record.
    pub fn from_line(line: &str) -> Result<Self, RecordError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Build a record from an executor's captured standard output.
    ///
    /// The output must contain exactly one non-empty line, holding the
    /// structured payload. Anything else is rejected so a crashed or chatty
    /// executor can never smuggle a partial record into history.
    pub fn from_executor_stdout(
        stdout: &[u8],
        commit: &str,
        metric_key: &MetricKey,
    ) -> Result<Self, RecordError> {
        let text = String::from_utf8_lossy(stdout);
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();

        if lines.len() != 1 {
            return Err(RecordError::UnexpectedOutputShape { lines: lines.len() });
        }

        let payload: serde_json::Value = serde_json::from_str(lines[0])?;

        Ok(Self::new(commit, metric_key.clone(), payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_key_accepts_filename_safe_characters() {
        let key = MetricKey::new("bench.zlib-rs_v2").unwrap();
        assert_eq!(key.history_file_name(), "metrics-bench.zlib-rs_v2.jsonl");
        assert_eq!(key.artifact_file_name(), "metrics-bench.zlib-rs_v2.json");
    }

    #[test]
    fn metric_key_rejects_separators_and_empty() {
        assert!(MetricKey::new("").is_err());
        assert!(MetricKey::new("a/b").is_err());
        assert!(MetricKey::new("a b").is_err());
        assert!(MetricKey::new("..\\up").is_err());
    }

    #[test]
    fn record_round_trips_through_line_form() {
        let key = MetricKey::new("decompress").unwrap();
        let record = ResultRecord::new(
            "27b31a5",
            key,
            serde_json::json!({ "cycles": { "value": 123.0, "unit": "GHz" } }),
        );

        let line = record.to_line().unwrap();
        assert!(!line.contains('\n'));

        let parsed = ResultRecord::from_line(&line).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn executor_stdout_must_hold_exactly_one_line() {
        let key = MetricKey::new("bench").unwrap();

        let record =
            ResultRecord::from_executor_stdout(b"{\"wall-time\": 1.5}\n", "abc", &key).unwrap();
        assert_eq!(record.payload["wall-time"], 1.5);

        let err = ResultRecord::from_executor_stdout(b"", "abc", &key).unwrap_err();
        assert!(matches!(err, RecordError::UnexpectedOutputShape { lines: 0 }));

        let err = ResultRecord::from_executor_stdout(b"{}\n{}\n", "abc", &key).unwrap_err();
        assert!(matches!(err, RecordError::UnexpectedOutputShape { lines: 2 }));
    }

    #[test]
    fn executor_stdout_must_be_structured() {
        let key = MetricKey::new("bench").unwrap();
        let err = ResultRecord::from_executor_stdout(b"panicked at ...\n", "abc", &key).unwrap_err();
        assert!(matches!(err, RecordError::Malformed(_)));
    }
}
