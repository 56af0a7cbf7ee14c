//! Shared deterministic types for mission core logic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::signals::Signal;

/// Terminal status recorded for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionStatus {
    Completed,
    Failed,
    Interrupted,
    DryRun,
    /// Written by cost-capped runs; read back from history, never produced here.
    OverBudget,
    #[default]
    #[serde(other)]
    Unknown,
}

impl MissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MissionStatus::Completed => "COMPLETED",
            MissionStatus::Failed => "FAILED",
            MissionStatus::Interrupted => "INTERRUPTED",
            MissionStatus::DryRun => "DRY_RUN",
            MissionStatus::OverBudget => "OVER_BUDGET",
            MissionStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root-cause category assigned by the strategist during recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Tooling,
    Logic,
    Environment,
    Ambiguity,
    #[serde(other)]
    Unknown,
}

impl Classification {
    /// Normalize free-form strategist output onto the closed category set.
    pub fn normalize(raw: &str) -> Self {
        let cleaned = raw
            .trim()
            .trim_matches(|ch: char| !ch.is_ascii_alphanumeric())
            .to_ascii_uppercase();
        match cleaned.as_str() {
            "TOOLING" => Classification::Tooling,
            "LOGIC" => Classification::Logic,
            "ENVIRONMENT" => Classification::Environment,
            "AMBIGUITY" => Classification::Ambiguity,
            _ => Classification::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Tooling => "TOOLING",
            Classification::Logic => "LOGIC",
            Classification::Environment => "ENVIRONMENT",
            Classification::Ambiguity => "AMBIGUITY",
            Classification::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating a single success criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub criterion: String,
    pub passed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

impl VerificationResult {
    pub fn pass(criterion: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(criterion, true, message)
    }

    pub fn fail(criterion: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(criterion, false, message)
    }

    pub fn new(criterion: impl Into<String>, passed: bool, message: impl Into<String>) -> Self {
        Self {
            criterion: criterion.into(),
            passed,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }

    pub fn detail_bool(&self, key: &str) -> bool {
        self.details
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn detail_list(&self, key: &str) -> Vec<String> {
        self.details
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Aggregate outcome of one verification pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub all_passed: bool,
    pub results: Vec<VerificationResult>,
}

impl VerificationReport {
    pub fn from_results(results: Vec<VerificationResult>) -> Self {
        let all_passed = results.iter().all(|result| result.passed);
        Self {
            all_passed,
            results,
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|result| !result.passed)
    }

    /// Output lines from failed criteria, used as classifier input.
    pub fn failure_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for result in self.failed() {
            lines.push(result.message.clone());
            for key in ["stdout", "stderr", "error"] {
                if let Some(text) = result.detail_str(key) {
                    lines.extend(text.lines().map(str::to_string));
                }
            }
            if result.detail_bool("timed_out") {
                lines.push(format!("criterion '{}' timed out", result.criterion));
            }
        }
        lines
    }
}

/// One persisted attempt in the mission history log.
///
/// Every field defaults so records written by older versions still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionLogRecord {
    pub timestamp: String,
    pub model_id: Option<String>,
    pub agent_name: Option<String>,
    pub duration_seconds: f64,
    pub status: MissionStatus,
    pub exit_code: Option<i32>,
    pub classification: Option<Classification>,
    pub signals: Option<BTreeSet<Signal>>,
    pub lessons_learned: Option<String>,
    pub success_criteria: Vec<String>,
    pub objectives: Vec<String>,
    pub verification_results: Vec<VerificationResult>,
    pub agent_prompt: String,
}

impl MissionLogRecord {
    pub fn lessons(&self) -> Option<&str> {
        self.lessons_learned
            .as_deref()
            .map(str::trim)
            .filter(|lesson| !lesson.is_empty())
    }
}
