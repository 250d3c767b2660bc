// Fallback Publishing
//
// Durability backstop: the raw record is staged as a CI artifact regardless
// of ledger outcome, so a failed synchronization loses the shared-history
// update but never the measurement itself.

use std::path::{Path, PathBuf};

use crate::record::{RecordError, ResultRecord};

/// Receives the produced record independent of ledger outcome.
pub trait FallbackPublisher {
    fn publish(&self, record: &ResultRecord) -> Result<PathBuf, PublishError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to stage artifact at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Stages the record as a file in the CI artifact directory; the upload
/// itself is the CI system's side of the seam.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    dir: PathBuf,
}

impl ArtifactDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FallbackPublisher for ArtifactDir {
    fn publish(&self, record: &ResultRecord) -> Result<PathBuf, PublishError> {
        let line = record.to_line()?;

        std::fs::create_dir_all(&self.dir).map_err(|source| PublishError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.dir.join(record.metric_key.artifact_file_name());
        std::fs::write(&path, format!("{line}\n")).map_err(|source| PublishError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), "fallback artifact staged");

        Ok(path)
    }
}
