//! Success-criterion syntax.
//!
//! Criteria are plain strings dispatched by literal prefix. Anything without a
//! recognized prefix is a shell command that must exit 0.

use std::fmt;

use thiserror::Error;

/// Parsed success criterion.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    Exists { path: String },
    Contains { path: String, pattern: String },
    NotContains { path: String, pattern: String },
    NoNewFiles,
    Eval { expression: String },
    Coverage { threshold: f64 },
    Shell { command: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CriterionError {
    #[error("empty criterion")]
    Empty,
    #[error("malformed '{prefix}' criterion: expected '{prefix}<path> <regex>'")]
    MissingPattern { prefix: &'static str },
    #[error("malformed '{prefix}' criterion: missing {what}")]
    MissingArgument {
        prefix: &'static str,
        what: &'static str,
    },
    #[error("coverage threshold '{0}' is not a number")]
    BadThreshold(String),
}

pub const NOT_CONTAINS_PREFIX: &str = "not_contains:";
pub const CONTAINS_PREFIX: &str = "contains:";
pub const EXISTS_PREFIX: &str = "exists:";
pub const EVAL_PREFIX: &str = "eval:";
pub const COVERAGE_PREFIX: &str = "coverage:";
pub const NO_NEW_FILES: &str = "no_new_files";

/// Parse a criterion string. Longer prefixes are matched first.
pub fn parse_criterion(raw: &str) -> Result<Criterion, CriterionError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CriterionError::Empty);
    }

    if let Some(rest) = raw.strip_prefix(NOT_CONTAINS_PREFIX) {
        let (path, pattern) = split_path_pattern(rest, NOT_CONTAINS_PREFIX)?;
        return Ok(Criterion::NotContains { path, pattern });
    }
    if let Some(rest) = raw.strip_prefix(CONTAINS_PREFIX) {
        let (path, pattern) = split_path_pattern(rest, CONTAINS_PREFIX)?;
        return Ok(Criterion::Contains { path, pattern });
    }
    if let Some(rest) = raw.strip_prefix(EXISTS_PREFIX) {
        let path = rest.trim();
        if path.is_empty() {
            return Err(CriterionError::MissingArgument {
                prefix: EXISTS_PREFIX,
                what: "path",
            });
        }
        return Ok(Criterion::Exists {
            path: path.to_string(),
        });
    }
    if let Some(rest) = raw.strip_prefix(EVAL_PREFIX) {
        let expression = rest.trim();
        if expression.is_empty() {
            return Err(CriterionError::MissingArgument {
                prefix: EVAL_PREFIX,
                what: "expression",
            });
        }
        return Ok(Criterion::Eval {
            expression: expression.to_string(),
        });
    }
    if let Some(rest) = raw.strip_prefix(COVERAGE_PREFIX) {
        let value = rest.trim().trim_end_matches('%').trim();
        let threshold = value
            .parse::<f64>()
            .map_err(|_| CriterionError::BadThreshold(rest.trim().to_string()))?;
        return Ok(Criterion::Coverage { threshold });
    }
    if is_no_new_files(raw) {
        return Ok(Criterion::NoNewFiles);
    }
    Ok(Criterion::Shell {
        command: raw.to_string(),
    })
}

fn is_no_new_files(raw: &str) -> bool {
    match raw.strip_prefix(NO_NEW_FILES) {
        Some(rest) => rest.is_empty() || rest.starts_with(':'),
        None => false,
    }
}

fn split_path_pattern(
    rest: &str,
    prefix: &'static str,
) -> Result<(String, String), CriterionError> {
    let rest = rest.trim_start();
    let Some((path, pattern)) = rest.split_once(char::is_whitespace) else {
        return Err(CriterionError::MissingPattern { prefix });
    };
    let pattern = pattern.trim();
    if path.is_empty() || pattern.is_empty() {
        return Err(CriterionError::MissingPattern { prefix });
    }
    Ok((path.to_string(), pattern.to_string()))
}

impl Criterion {
    pub fn kind(&self) -> &'static str {
        match self {
            Criterion::Exists { .. } => "exists",
            Criterion::Contains { .. } => "contains",
            Criterion::NotContains { .. } => "not_contains",
            Criterion::NoNewFiles => "no_new_files",
            Criterion::Eval { .. } => "eval",
            Criterion::Coverage { .. } => "coverage",
            Criterion::Shell { .. } => "shell",
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Exists { path } => write!(f, "{EXISTS_PREFIX}{path}"),
            Criterion::Contains { path, pattern } => write!(f, "{CONTAINS_PREFIX}{path} {pattern}"),
            Criterion::NotContains { path, pattern } => {
                write!(f, "{NOT_CONTAINS_PREFIX}{path} {pattern}")
            }
            Criterion::NoNewFiles => f.write_str(NO_NEW_FILES),
            Criterion::Eval { expression } => write!(f, "{EVAL_PREFIX}{expression}"),
            Criterion::Coverage { threshold } => write!(f, "{COVERAGE_PREFIX}{threshold}"),
            Criterion::Shell { command } => f.write_str(command),
        }
    }
}
