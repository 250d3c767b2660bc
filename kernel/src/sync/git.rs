// Git Ledger
//
// Drives the `git` command line against an existing working copy with push
// access. The push is the compare-and-swap: a non-fast-forward rejection
// means a concurrent writer advanced the remote head first.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::history::{self, History};
use crate::record::{MetricKey, ResultRecord};
use crate::sync::{CommitIdentity, LedgerStore, PushOutcome, SyncError};

/// Merge attribute for history files. Union merge keeps concurrent appends
/// to the same file conflict-free under rebase: both writers' lines survive,
/// concatenated in commit order.
const UNION_MERGE_ATTR: &str = "metrics-*.jsonl merge=union";

/// Stderr fragments that identify a push rejected because the remote head
/// advanced, as opposed to a transport failure.
const REJECTION_MARKERS: &[&str] = &["[rejected]", "non-fast-forward", "fetch first"];

#[derive(Debug)]
pub struct GitLedger {
    workdir: PathBuf,
    remote: String,
    branch: Option<String>,
    identity: CommitIdentity,
}

impl GitLedger {
    /// Open an existing working copy of the ledger repository.
    pub fn open(workdir: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let ledger = Self {
            workdir: workdir.into(),
            remote: "origin".to_owned(),
            branch: None,
            identity: CommitIdentity::default(),
        };

        let probe = ledger.git(&["rev-parse", "--is-inside-work-tree"])?;
        if !probe.status.success() {
            return Err(SyncError::NotAWorkingCopy {
                path: ledger.workdir,
            });
        }

        Ok(ledger)
    }

    /// Push and pull against `branch` instead of the clone's upstream.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Commit as `identity` instead of the default automation identity.
    pub fn with_identity(mut self, identity: CommitIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Run git in the working copy with the automation identity configured,
    /// so both commits and rebases are attributable without relying on host
    /// configuration.
    fn git(&self, args: &[&str]) -> Result<Output, SyncError> {
        let name = format!("user.name={}", self.identity.name);
        let email = format!("user.email={}", self.identity.email);

        tracing::debug!(?args, "git");

        Command::new("git")
            .arg("-C")
            .arg(&self.workdir)
            .args(["-c", name.as_str(), "-c", email.as_str()])
            .args(args)
            .output()
            .map_err(|source| SyncError::Transport {
                op: args.first().copied().unwrap_or("git").to_owned(),
                detail: source.to_string(),
            })
    }

    fn git_ok(&self, args: &[&str]) -> Result<Output, SyncError> {
        let output = self.git(args)?;

        if !output.status.success() {
            return Err(SyncError::Transport {
                op: args.first().copied().unwrap_or("git").to_owned(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        Ok(output)
    }

    /// Make sure `.gitattributes` declares union merge for history files;
    /// returns whether the file was modified.
    fn ensure_union_merge_attribute(&self) -> Result<bool, SyncError> {
        let path = self.workdir.join(".gitattributes");

        let current = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(SyncError::Transport {
                    op: "gitattributes".to_owned(),
                    detail: source.to_string(),
                })
            }
        };

        if current.lines().any(|line| line.trim() == UNION_MERGE_ATTR) {
            return Ok(false);
        }

        let mut updated = current;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(UNION_MERGE_ATTR);
        updated.push('\n');

        std::fs::write(&path, updated).map_err(|source| SyncError::Transport {
            op: "gitattributes".to_owned(),
            detail: source.to_string(),
        })?;

        Ok(true)
    }
}

impl LedgerStore for GitLedger {
    fn baseline(&mut self, key: &MetricKey) -> Result<History, SyncError> {
        Ok(History::load(&self.workdir.join(key.history_file_name()))?)
    }

    fn history_path(&self, key: &MetricKey) -> Option<PathBuf> {
        Some(self.workdir.join(key.history_file_name()))
    }

    fn commit_append(
        &mut self,
        key: &MetricKey,
        record: &ResultRecord,
        message: &str,
    ) -> Result<(), SyncError> {
        let file_name = key.history_file_name();
        let attributes_changed = self.ensure_union_merge_attribute()?;

        history::append_record(&self.workdir.join(&file_name), record)?;

        self.git_ok(&["add", "--", &file_name])?;
        if attributes_changed {
            self.git_ok(&["add", "--", ".gitattributes"])?;
        }

        self.git_ok(&["commit", "-m", message])?;

        Ok(())
    }

    fn push(&mut self) -> Result<PushOutcome, SyncError> {
        let mut args = vec!["push", self.remote.as_str()];
        if let Some(branch) = &self.branch {
            args.push(branch);
        }

        let output = self.git(&args)?;
        if output.status.success() {
            return Ok(PushOutcome::Accepted);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if REJECTION_MARKERS.iter().any(|marker| stderr.contains(marker)) {
            return Ok(PushOutcome::RejectedRemoteAdvanced);
        }

        Err(SyncError::Transport {
            op: "push".to_owned(),
            detail: stderr.trim().to_owned(),
        })
    }

    fn resync(&mut self) -> Result<(), SyncError> {
        let mut args = vec!["pull", "--rebase", self.remote.as_str()];
        if let Some(branch) = &self.branch {
            args.push(branch);
        }

        self.git_ok(&args)?;

        Ok(())
    }
}
