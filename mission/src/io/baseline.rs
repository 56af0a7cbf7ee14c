//! Content-hash baselines of the repository tree.

use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::core::baseline::FileBaseline;

/// Directory names never descended into.
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    "node_modules",
    ".pytest_cache",
    ".mypy_cache",
    ".ruff_cache",
    ".venv",
    "venv",
    ".tox",
    "target",
];

/// Walks a repository and hashes every regular file.
#[derive(Debug, Clone)]
pub struct BaselineScanner {
    root: PathBuf,
    ignored_files: BTreeSet<String>,
}

impl BaselineScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ignored_files: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Exclude a file the tool itself writes (e.g. the history log).
    pub fn ignore_file(mut self, path: &Path) -> Self {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        self.ignored_files.insert(to_key(relative));
        self
    }

    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn capture(&self) -> Result<FileBaseline> {
        let mut baseline = FileBaseline::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_ignored_dir(entry));
        for entry in walker {
            let entry = entry.with_context(|| format!("walk {}", self.root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .with_context(|| format!("relativize {}", entry.path().display()))?;
            let key = to_key(relative);
            if self.ignored_files.contains(&key) {
                continue;
            }
            baseline.insert(key, hash_file(entry.path())?);
        }
        debug!(files = baseline.len(), "captured baseline");
        Ok(baseline)
    }
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| IGNORED_DIRS.contains(&name))
}

/// Repo-relative path with `/` separators.
pub fn to_key(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Hex-encoded SHA-256 of a file's bytes.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).with_context(|| format!("hash {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn captures_nested_files_with_stable_hashes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("src/pkg")).expect("mkdir");
        fs::write(root.join("README.md"), "hello\n").expect("write");
        fs::write(root.join("src/pkg/mod.py"), "x = 1\n").expect("write");

        let scanner = BaselineScanner::new(root);
        let first = scanner.capture().expect("capture");
        let paths = first.paths().collect::<Vec<_>>();
        assert_eq!(paths, vec!["README.md", "src/pkg/mod.py"]);
        assert_eq!(
            first.hash_of("README.md"),
            Some("5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03")
        );
        assert_eq!(scanner.capture().expect("capture"), first);
    }

    #[test]
    fn skips_ignored_dirs_and_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        for dir in [".git", "node_modules/pkg", "__pycache__"] {
            fs::create_dir_all(root.join(dir)).expect("mkdir");
            fs::write(root.join(dir).join("junk"), "x").expect("write");
        }
        fs::write(root.join("kept.txt"), "x").expect("write");
        fs::write(root.join(".chillvibe_logs.jsonl"), "{}\n").expect("write");

        let baseline = BaselineScanner::new(root)
            .ignore_file(&root.join(".chillvibe_logs.jsonl"))
            .capture()
            .expect("capture");
        assert_eq!(baseline.paths().collect::<Vec<_>>(), vec!["kept.txt"]);
    }

    #[test]
    fn content_change_changes_hash() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("a.txt"), "one").expect("write");
        let scanner = BaselineScanner::new(root);
        let before = scanner.capture().expect("capture");
        fs::write(root.join("a.txt"), "two").expect("write");
        let after = scanner.capture().expect("capture");
        assert_ne!(before.hash_of("a.txt"), after.hash_of("a.txt"));
    }
}
