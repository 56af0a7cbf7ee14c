//! Static checks on success criteria before an agent is launched.

use std::fmt;
use std::path::Path;

use regex::RegexBuilder;
use tracing::{debug, instrument};

use crate::core::criteria::{Criterion, parse_criterion};
use crate::core::expr;
use crate::io::process::find_on_path;
use crate::io::verify::resolve_in_repo;

/// Tools whose absence makes a shell criterion unsatisfiable.
pub const KNOWN_TOOLS: &[&str] = &["pytest", "ruff", "mypy", "npm", "node", "python", "cargo"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightIssue {
    pub criterion: String,
    pub problem: String,
}

impl fmt::Display for PreflightIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Criterion '{}' {}", self.criterion, self.problem)
    }
}

/// Check criteria against the repository and the tools on `PATH`.
pub fn preflight(criteria: &[String], repo: &Path) -> Vec<PreflightIssue> {
    preflight_with(criteria, repo, |tool| find_on_path(tool).is_some())
}

#[instrument(skip_all, fields(criteria = criteria.len()))]
pub fn preflight_with(
    criteria: &[String],
    repo: &Path,
    tool_available: impl Fn(&str) -> bool,
) -> Vec<PreflightIssue> {
    let mut issues = Vec::new();
    for raw in criteria {
        if let Some(problem) = check_one(raw, repo, &tool_available) {
            issues.push(PreflightIssue {
                criterion: raw.trim().to_string(),
                problem,
            });
        }
    }
    debug!(issues = issues.len(), "preflight finished");
    issues
}

fn check_one(raw: &str, repo: &Path, tool_available: &impl Fn(&str) -> bool) -> Option<String> {
    let criterion = match parse_criterion(raw) {
        Ok(criterion) => criterion,
        Err(err) => return Some(format!("is malformed: {err}")),
    };
    match criterion {
        Criterion::Exists { path } => {
            let full = match resolve_in_repo(repo, &path) {
                Ok(full) => full,
                Err(err) => return Some(format!("is impossible: {err}")),
            };
            let parent = full.parent()?;
            (!parent.is_dir()).then(|| {
                format!(
                    "is impossible: parent directory '{}' does not exist",
                    parent.display()
                )
            })
        }
        Criterion::Contains { path, pattern } | Criterion::NotContains { path, pattern } => {
            if let Err(err) = resolve_in_repo(repo, &path) {
                return Some(format!("has an invalid path: {err}"));
            }
            RegexBuilder::new(&pattern)
                .multi_line(true)
                .dot_matches_new_line(true)
                .build()
                .err()
                .map(|err| format!("has an invalid regex: {err}"))
        }
        Criterion::Coverage { threshold } => (!(0.0..=100.0).contains(&threshold))
            .then(|| format!("has coverage threshold {threshold} outside 0..=100")),
        Criterion::Eval { expression } => expr::parse(&expression)
            .err()
            .map(|err| format!("has an invalid expression: {err}")),
        Criterion::Shell { command } => {
            let tool = command.split_whitespace().next()?;
            (KNOWN_TOOLS.contains(&tool) && !tool_available(tool)).then(|| {
                format!("requires tool '{tool}' which is not installed in the environment")
            })
        }
        Criterion::NoNewFiles => None,
    }
}
