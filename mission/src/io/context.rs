//! Repository context extraction for the strategist.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::Pattern;
use tracing::{debug, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::core::baseline::compile_patterns;
use crate::io::baseline::{IGNORED_DIRS, to_key};

/// Optional rules file appended to the strategist constraints.
pub const RULES_FILE: &str = ".chillvibe_rules.md";

#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub exclude_patterns: Vec<String>,
    /// Maximum directory depth below the root; `None` is unlimited.
    pub depth: Option<usize>,
    /// File extensions to include (without the dot); empty includes all.
    pub include_ext: Vec<String>,
    pub budget_bytes: usize,
    /// Files never included (the history log).
    pub skip_files: Vec<PathBuf>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            exclude_patterns: Vec::new(),
            depth: None,
            include_ext: Vec::new(),
            budget_bytes: 2_000_000,
            skip_files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoContext {
    pub text: String,
    pub files: Vec<String>,
    /// True when the byte budget cut the walk short.
    pub truncated: bool,
}

/// Concatenate readable text files under `root` with `=== path ===` headers.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn extract_context(root: &Path, options: &ContextOptions) -> Result<RepoContext> {
    let excludes = compile_patterns(&options.exclude_patterns)
        .map_err(|err| anyhow::anyhow!("exclude_patterns: {err}"))?;
    let skip = options
        .skip_files
        .iter()
        .map(|path| to_key(path.strip_prefix(root).unwrap_or(path)))
        .collect::<Vec<_>>();
    let include_ext = options
        .include_ext
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
        .collect::<Vec<_>>();

    let mut walker = WalkDir::new(root).sort_by_file_name();
    if let Some(depth) = options.depth {
        walker = walker.max_depth(depth + 1);
    }

    let mut context = RepoContext::default();
    for entry in walker
        .into_iter()
        .filter_entry(|entry| !is_skipped_dir(entry, root, &excludes))
    {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let key = to_key(relative);
        if skip.contains(&key) || matches_any(&excludes, &key) {
            continue;
        }
        if !include_ext.is_empty() && !has_extension(relative, &include_ext) {
            continue;
        }
        let Ok(bytes) = fs::read(entry.path()) else {
            debug!(path = %key, "unreadable file skipped");
            continue;
        };
        let Ok(body) = String::from_utf8(bytes) else {
            debug!(path = %key, "non-utf8 file skipped");
            continue;
        };
        let section = format!("=== {key} ===\n{body}\n\n");
        if context.text.len() + section.len() > options.budget_bytes {
            context.truncated = true;
            debug!(path = %key, "context budget reached");
            break;
        }
        context.text.push_str(&section);
        context.files.push(key);
    }
    debug!(
        files = context.files.len(),
        bytes = context.text.len(),
        truncated = context.truncated,
        "context extracted"
    );
    Ok(context)
}

fn is_skipped_dir(entry: &DirEntry, root: &Path, excludes: &[Pattern]) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    if entry
        .file_name()
        .to_str()
        .is_some_and(|name| IGNORED_DIRS.contains(&name))
    {
        return true;
    }
    entry
        .path()
        .strip_prefix(root)
        .is_ok_and(|relative| matches_any(excludes, &to_key(relative)))
}

fn matches_any(patterns: &[Pattern], key: &str) -> bool {
    patterns.iter().any(|pattern| pattern.matches(key))
}

fn has_extension(path: &Path, allowed: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| allowed.contains(&ext.to_ascii_lowercase()))
}

/// Contents of the repository rules file, if present and non-blank.
pub fn read_rules(root: &Path) -> Result<Option<String>> {
    let path = root.join(RULES_FILE);
    match fs::read_to_string(&path) {
        Ok(text) if text.trim().is_empty() => Ok(None),
        Ok(text) => Ok(Some(text.trim().to_string())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, body: &[u8]) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, body).expect("write");
    }

    #[test]
    fn concatenates_text_files_with_headers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "README.md", b"hello\n");
        write(root, "src/app.py", b"print('hi')\n");
        write(root, "node_modules/x/index.js", b"junk");
        write(root, "logo.png", &[0xff, 0xfe, 0x00, 0x81]);

        let context = extract_context(root, &ContextOptions::default()).expect("extract");
        assert_eq!(context.files, vec!["README.md", "src/app.py"]);
        assert!(context.text.starts_with("=== README.md ===\nhello\n"));
        assert!(context.text.contains("=== src/app.py ===\nprint('hi')"));
        assert!(!context.truncated);
    }

    #[test]
    fn honors_excludes_extensions_and_depth() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "a.py", b"a");
        write(root, "notes.txt", b"n");
        write(root, "build/gen.py", b"g");
        write(root, "pkg/deep/inner.py", b"i");
        write(root, "pkg/top.py", b"t");

        let options = ContextOptions {
            exclude_patterns: vec!["build".to_string()],
            depth: Some(1),
            include_ext: vec![".py".to_string()],
            ..ContextOptions::default()
        };
        let context = extract_context(root, &options).expect("extract");
        assert_eq!(context.files, vec!["a.py", "pkg/top.py"]);
    }

    #[test]
    fn stops_at_budget_and_skips_history() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, ".chillvibe_logs.jsonl", b"{}\n");
        write(root, "a.txt", &[b'a'; 40]);
        write(root, "b.txt", &[b'b'; 40]);

        let options = ContextOptions {
            budget_bytes: 70,
            skip_files: vec![root.join(".chillvibe_logs.jsonl")],
            ..ContextOptions::default()
        };
        let context = extract_context(root, &options).expect("extract");
        assert_eq!(context.files, vec!["a.txt"]);
        assert!(context.truncated);
    }

    #[test]
    fn rules_file_is_optional() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(read_rules(temp.path()).expect("read"), None);
        fs::write(temp.path().join(RULES_FILE), "  \n").expect("write");
        assert_eq!(read_rules(temp.path()).expect("read"), None);
        fs::write(temp.path().join(RULES_FILE), "Use tabs\n").expect("write");
        assert_eq!(
            read_rules(temp.path()).expect("read"),
            Some("Use tabs".to_string())
        );
    }
}
