//! Deterministic classification of failure output into signal tags.
//!
//! Every matching rule contributes a tag; rules are not mutually exclusive.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// One recognizable failure symptom.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Signal {
    CommandNotFound,
    SigintInterrupted,
    SigkillOom,
    PermissionDenied,
    DependencyMissing,
    Timeout,
    SyntaxError,
    TestFailure,
    DiskFull,
    /// A tag written by another version of the tool, kept verbatim.
    Other(String),
}

impl Signal {
    pub fn as_str(&self) -> &str {
        match self {
            Signal::CommandNotFound => "COMMAND_NOT_FOUND",
            Signal::SigintInterrupted => "SIGINT_INTERRUPTED",
            Signal::SigkillOom => "SIGKILL_OOM",
            Signal::PermissionDenied => "PERMISSION_DENIED",
            Signal::DependencyMissing => "DEPENDENCY_MISSING",
            Signal::Timeout => "TIMEOUT",
            Signal::SyntaxError => "SYNTAX_ERROR",
            Signal::TestFailure => "TEST_FAILURE",
            Signal::DiskFull => "DISK_FULL",
            Signal::Other(raw) => raw,
        }
    }

    /// Relevance weight used when two failures share this signal.
    pub fn weight(&self) -> u32 {
        match self {
            Signal::TestFailure | Signal::SyntaxError => 10,
            Signal::DependencyMissing => 8,
            Signal::CommandNotFound | Signal::PermissionDenied => 5,
            Signal::Timeout => 3,
            _ => 2,
        }
    }
}

impl From<String> for Signal {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "COMMAND_NOT_FOUND" => Signal::CommandNotFound,
            "SIGINT_INTERRUPTED" => Signal::SigintInterrupted,
            "SIGKILL_OOM" => Signal::SigkillOom,
            "PERMISSION_DENIED" => Signal::PermissionDenied,
            "DEPENDENCY_MISSING" => Signal::DependencyMissing,
            "TIMEOUT" => Signal::Timeout,
            "SYNTAX_ERROR" => Signal::SyntaxError,
            "TEST_FAILURE" => Signal::TestFailure,
            "DISK_FULL" => Signal::DiskFull,
            _ => Signal::Other(raw),
        }
    }
}

impl From<&str> for Signal {
    fn from(raw: &str) -> Self {
        Signal::from(raw.to_string())
    }
}

impl From<Signal> for String {
    fn from(signal: Signal) -> Self {
        signal.as_str().to_string()
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit codes with special meaning to the supervisor.
///
/// The defaults follow the POSIX shell convention: 127 for an unknown command and
/// `128 + signal` for signal deaths (SIGINT = 2, SIGKILL = 9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitSentinels {
    pub command_not_found: i32,
    pub interrupted: i32,
    pub killed: i32,
}

impl Default for ExitSentinels {
    fn default() -> Self {
        Self {
            command_not_found: 127,
            interrupted: 130,
            killed: 137,
        }
    }
}

struct OutputRule {
    signal: Signal,
    pattern: Regex,
}

fn rule(signal: Signal, pattern: &str) -> OutputRule {
    OutputRule {
        signal,
        pattern: RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("signal pattern should be valid"),
    }
}

static OUTPUT_RULES: LazyLock<Vec<OutputRule>> = LazyLock::new(|| {
    vec![
        rule(Signal::CommandNotFound, r"command not found"),
        rule(
            Signal::PermissionDenied,
            r"permission denied|operation not permitted|\beacces\b",
        ),
        rule(
            Signal::DependencyMissing,
            r"modulenotfounderror|importerror|no module named|cannot find module|module not found|unresolved import|can't find crate",
        ),
        rule(Signal::Timeout, r"timed out|timeout|deadline exceeded"),
        rule(
            Signal::SyntaxError,
            r"syntaxerror|syntax error|indentationerror|unexpected token|parse error",
        ),
        rule(
            Signal::TestFailure,
            r"fail:|assertionerror|assertion failed|test result: failed|\b\d+ failed\b",
        ),
        rule(
            Signal::DiskFull,
            r"no space left on device|disk full|disk quota exceeded|\benospc\b",
        ),
    ]
});

/// Map an exit code and captured output lines to the set of failure signals.
pub fn classify_failure_signals<S: AsRef<str>>(
    exit_code: i32,
    output: &[S],
    sentinels: &ExitSentinels,
) -> BTreeSet<Signal> {
    let mut signals = BTreeSet::new();
    if exit_code == sentinels.command_not_found {
        signals.insert(Signal::CommandNotFound);
    }
    if exit_code == sentinels.interrupted {
        signals.insert(Signal::SigintInterrupted);
    }
    if exit_code == sentinels.killed {
        signals.insert(Signal::SigkillOom);
    }

    for line in output {
        let line = line.as_ref();
        for rule in OUTPUT_RULES.iter() {
            if !signals.contains(&rule.signal) && rule.pattern.is_match(line) {
                signals.insert(rule.signal.clone());
            }
        }
    }
    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(exit_code: i32, lines: &[&str]) -> BTreeSet<Signal> {
        classify_failure_signals(exit_code, lines, &ExitSentinels::default())
    }

    #[test]
    fn exit_127_is_command_not_found_regardless_of_output() {
        assert!(classify(127, &[]).contains(&Signal::CommandNotFound));
        assert!(classify(127, &["all good", "PASSED"]).contains(&Signal::CommandNotFound));
    }

    #[test]
    fn signal_exit_codes_map_to_tags() {
        assert!(classify(130, &[]).contains(&Signal::SigintInterrupted));
        assert!(classify(137, &[]).contains(&Signal::SigkillOom));
        assert!(classify(1, &[]).is_empty());
    }

    #[test]
    fn missing_module_is_dependency_missing() {
        let signals = classify(
            1,
            &[
                "Traceback (most recent call last):",
                "ModuleNotFoundError: No module named 'non_existent_module'",
            ],
        );
        assert!(signals.contains(&Signal::DependencyMissing));
    }

    #[test]
    fn rules_fire_independently() {
        let signals = classify(
            1,
            &[
                "AssertionError: 1 != 2",
                "SyntaxError: invalid syntax",
                "Permission denied (publickey)",
                "request timed out",
                "No space left on device",
            ],
        );
        let expected: BTreeSet<Signal> = [
            Signal::TestFailure,
            Signal::SyntaxError,
            Signal::PermissionDenied,
            Signal::Timeout,
            Signal::DiskFull,
        ]
        .into_iter()
        .collect();
        assert_eq!(signals, expected);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(classify(1, &["FAIL: test_something"]).contains(&Signal::TestFailure));
        assert!(classify(1, &["fail: lowercase"]).contains(&Signal::TestFailure));
    }

    #[test]
    fn sentinels_are_configurable() {
        let sentinels = ExitSentinels {
            command_not_found: 9009,
            ..ExitSentinels::default()
        };
        let signals = classify_failure_signals::<&str>(9009, &[], &sentinels);
        assert!(signals.contains(&Signal::CommandNotFound));
        let signals = classify_failure_signals::<&str>(127, &[], &sentinels);
        assert!(!signals.contains(&Signal::CommandNotFound));
    }

    #[test]
    fn unknown_tags_survive_serde() {
        let parsed: Vec<Signal> =
            serde_json::from_str(r#"["TEST_FAILURE", "FLAKY_NETWORK"]"#).expect("parse");
        assert_eq!(parsed[0], Signal::TestFailure);
        assert_eq!(parsed[1], Signal::Other("FLAKY_NETWORK".to_string()));
        let rendered = serde_json::to_string(&parsed).expect("render");
        assert_eq!(rendered, r#"["TEST_FAILURE","FLAKY_NETWORK"]"#);
    }

    #[test]
    fn weights_follow_priority_table() {
        assert_eq!(Signal::TestFailure.weight(), 10);
        assert_eq!(Signal::SyntaxError.weight(), 10);
        assert_eq!(Signal::DependencyMissing.weight(), 8);
        assert_eq!(Signal::CommandNotFound.weight(), 5);
        assert_eq!(Signal::PermissionDenied.weight(), 5);
        assert_eq!(Signal::Timeout.weight(), 3);
        assert_eq!(Signal::DiskFull.weight(), 2);
    }
}
