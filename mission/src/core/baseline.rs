//! File baselines: repo-relative path to content hash.

use std::collections::BTreeMap;

use glob::Pattern;
use serde::{Deserialize, Serialize};

/// Snapshot of file contents keyed by `/`-separated relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBaseline {
    files: BTreeMap<String, String>,
}

/// Protected files that changed since the baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clobbered {
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl Clobbered {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty()
    }
}

impl FileBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, hash: impl Into<String>) {
        self.files.insert(path.into(), hash.into());
    }

    pub fn hash_of(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Paths present in `current` but absent from this baseline, sorted.
    pub fn new_files(&self, current: &FileBaseline) -> Vec<String> {
        current
            .paths()
            .filter(|path| !self.contains(path))
            .map(str::to_string)
            .collect()
    }

    /// Protected paths whose content changed or that disappeared.
    ///
    /// A current path counts as modified when it matches a pattern and its hash
    /// differs from the baseline. Files created after the baseline are not
    /// clobbered.
    pub fn clobbered(&self, current: &FileBaseline, patterns: &[Pattern]) -> Clobbered {
        let protected = |path: &str| patterns.iter().any(|pattern| pattern.matches(path));

        let modified = current
            .files
            .iter()
            .filter(|(path, _)| protected(path))
            .filter(|(path, hash)| {
                self.hash_of(path)
                    .is_some_and(|original| original != hash.as_str())
            })
            .map(|(path, _)| path.clone())
            .collect();
        let deleted = self
            .paths()
            .filter(|path| protected(path) && !current.contains(path))
            .map(str::to_string)
            .collect();
        Clobbered { modified, deleted }
    }
}

/// Compile protected-file globs, reporting the first invalid one.
pub fn compile_patterns(raw: &[String]) -> Result<Vec<Pattern>, String> {
    raw.iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|err| format!("invalid glob '{pattern}': {err}"))
        })
        .collect()
}
