//! Pre-attempt snapshots and rollback of the working tree.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::error::MissionError;
use crate::io::baseline::to_key;
use crate::io::git::Git;

/// Revision plus the untracked files that existed when it was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub revision: String,
    pub untracked: BTreeSet<String>,
}

/// What a rollback touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub revision: String,
    pub removed: Vec<String>,
}

/// Captures and restores working-tree state through git.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    git: Git,
    preserved: BTreeSet<String>,
}

impl SnapshotManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            git: Git::new(root),
            preserved: BTreeSet::new(),
        }
    }

    /// Carry a file the tool itself appends to (e.g. the history log) across
    /// rollbacks, tracked or not.
    pub fn preserve_file(mut self, path: &Path) -> Self {
        let relative = path.strip_prefix(self.git.workdir()).unwrap_or(path);
        self.preserved.insert(to_key(relative));
        self
    }

    pub fn root(&self) -> &Path {
        self.git.workdir()
    }

    /// Record HEAD and the current untracked set.
    #[instrument(skip_all)]
    pub fn capture(&self) -> Result<Snapshot> {
        let revision = self
            .git
            .head_sha()
            .context("capture snapshot revision (is this a git repository with a commit?)")?;
        let untracked = self.git.untracked_paths()?.into_iter().collect();
        debug!(revision = %revision, "captured snapshot");
        Ok(Snapshot {
            revision,
            untracked,
        })
    }

    /// Discard tracked changes and remove files created since `snapshot`.
    ///
    /// Untracked files that already existed at capture time are left alone, as
    /// are ignored files. Preserved files keep their current bytes.
    #[instrument(skip_all, fields(revision = %snapshot.revision))]
    pub fn rollback(&self, snapshot: &Snapshot) -> Result<RollbackReport, MissionError> {
        let saved = self.read_preserved()?;
        self.git
            .reset_hard(&snapshot.revision)
            .map_err(|err| MissionError::Rollback(format!("{err:#}")))?;

        let current = self
            .git
            .untracked_paths()
            .map_err(|err| MissionError::Rollback(format!("{err:#}")))?;
        let mut removed = Vec::new();
        for path in current {
            if snapshot.untracked.contains(&path) || self.preserved.contains(&path) {
                continue;
            }
            let full = self.root().join(&path);
            match fs::remove_file(&full) {
                Ok(()) => {
                    prune_empty_parents(self.root(), &full);
                    removed.push(path);
                }
                Err(err) => {
                    return Err(MissionError::Rollback(format!(
                        "remove {}: {err}",
                        full.display()
                    )));
                }
            }
        }
        self.restore_preserved(&saved)?;

        info!(
            revision = %snapshot.revision,
            removed = removed.len(),
            "rolled back working tree"
        );
        Ok(RollbackReport {
            revision: snapshot.revision.clone(),
            removed,
        })
    }
}

impl SnapshotManager {
    fn read_preserved(&self) -> Result<Vec<(String, Vec<u8>)>, MissionError> {
        let mut saved = Vec::new();
        for key in &self.preserved {
            let full = self.root().join(key);
            match fs::read(&full) {
                Ok(bytes) => saved.push((key.clone(), bytes)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(MissionError::Rollback(format!(
                        "read {}: {err}",
                        full.display()
                    )));
                }
            }
        }
        Ok(saved)
    }

    fn restore_preserved(&self, saved: &[(String, Vec<u8>)]) -> Result<(), MissionError> {
        for (key, bytes) in saved {
            let full = self.root().join(key);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).map_err(|err| {
                    MissionError::Rollback(format!("create {}: {err}", parent.display()))
                })?;
            }
            fs::write(&full, bytes)
                .map_err(|err| MissionError::Rollback(format!("restore {}: {err}", full.display())))?;
            debug!(path = %key, "restored preserved file");
        }
        Ok(())
    }
}

fn prune_empty_parents(root: &Path, file: &Path) {
    let mut dir = file.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        if fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
}
