//! Strategist: the language-model side of the mission.
//!
//! The [`Strategist`] trait is a single text-completion primitive. Prompt
//! rendering and response parsing live here so scripted strategists in tests
//! exercise the same paths as the real command-backed one.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::contract::MissionContract;
use crate::core::sections::{extract_list_section, extract_section};
use crate::core::signals::Signal;
use crate::core::types::{Classification, VerificationReport};
use crate::error::MissionError;
use crate::io::config::MissionConfig;
use crate::io::process::{run_command_with_timeout, tail_lines};

const MISSION_TEMPLATE: &str = include_str!("../prompts/mission.md");
const AUDIT_TEMPLATE: &str = include_str!("../prompts/audit.md");
const RECOVERY_TEMPLATE: &str = include_str!("../prompts/recovery.md");

/// Text-in, text-out access to the strategist model.
pub trait Strategist {
    fn ask(&self, prompt: &str) -> Result<String>;
}

/// Strategist backed by an external command reading the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandStrategist {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    max_attempts: u32,
    retry_delay: Duration,
}

impl CommandStrategist {
    pub fn from_config(cfg: &MissionConfig, workdir: impl Into<PathBuf>) -> Self {
        let budget = cfg.thinking_level.budget().to_string();
        let command = cfg
            .strategist
            .command
            .iter()
            .map(|part| {
                part.replace("{model}", &cfg.model)
                    .replace("{thinking_budget}", &budget)
                    .replace("{thinking_level}", cfg.thinking_level.as_str())
            })
            .collect();
        Self {
            command,
            workdir: workdir.into(),
            timeout: Duration::from_secs(cfg.strategist.timeout_secs),
            output_limit_bytes: cfg.strategist.output_limit_bytes,
            max_attempts: cfg.strategist.max_attempts.max(1),
            retry_delay: Duration::from_secs(cfg.strategist.retry_delay_secs),
        }
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    fn ask_once(&self, prompt: &str) -> Result<Result<String, String>> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| MissionError::Strategist("strategist command is empty".to_string()))?;
        let mut cmd = std::process::Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run strategist command '{program}'"))?;

        if output.timed_out {
            return Ok(Err(format!(
                "strategist timed out after {}s",
                self.timeout.as_secs()
            )));
        }
        if !output.status.success() {
            return Ok(Err(format!(
                "strategist exited with code {}: {}",
                output.exit_code(),
                tail_lines(output.stderr_text().trim(), 10)
            )));
        }
        Ok(Ok(output.stdout_text()))
    }
}

impl Strategist for CommandStrategist {
    #[instrument(skip_all, fields(prompt_bytes = prompt.len()))]
    fn ask(&self, prompt: &str) -> Result<String> {
        let mut delay = self.retry_delay;
        let mut attempt = 1;
        loop {
            match self.ask_once(prompt)? {
                Ok(text) => {
                    debug!(attempt, response_bytes = text.len(), "strategist answered");
                    return Ok(text);
                }
                Err(reason) if attempt < self.max_attempts && is_transient(&reason) => {
                    warn!(
                        attempt,
                        delay_secs = delay.as_secs(),
                        reason = %reason,
                        "transient strategist failure, retrying"
                    );
                    thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(reason) => return Err(MissionError::Strategist(reason).into()),
            }
        }
    }
}

/// Rate limits and server-side errors worth retrying.
pub fn is_transient(reason: &str) -> bool {
    let lowered = reason.to_ascii_lowercase();
    ["429", "500", "503", "quota", "internal error", "resource exhausted", "rate limit"]
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("mission", MISSION_TEMPLATE)
            .expect("mission template should be valid");
        env.add_template("audit", AUDIT_TEMPLATE)
            .expect("audit template should be valid");
        env.add_template("recovery", RECOVERY_TEMPLATE)
            .expect("recovery template should be valid");
        Self { env }
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        Ok(template.render(ctx)?)
    }
}

/// Inputs for drafting a new mission.
#[derive(Debug, Clone, Default)]
pub struct ProposalRequest<'a> {
    pub context: &'a str,
    pub rules: Option<&'a str>,
    pub constraints: Option<&'a str>,
    pub lessons: &'a [String],
    /// Used as the agent prompt when the strategist omits one.
    pub fallback_prompt: Option<&'a str>,
}

pub fn render_mission_prompt(request: &ProposalRequest<'_>) -> Result<String> {
    PromptEngine::new().render(
        "mission",
        context! {
            context => request.context.trim(),
            rules => request.rules.map(str::trim).filter(|s| !s.is_empty()),
            constraints => request.constraints.map(str::trim).filter(|s| !s.is_empty()),
            lessons => request.lessons,
        },
    )
}

/// Ask the strategist for a mission contract and parse it.
#[instrument(skip_all)]
pub fn propose_mission<S: Strategist + ?Sized>(
    strategist: &S,
    request: &ProposalRequest<'_>,
) -> Result<MissionContract> {
    let prompt = render_mission_prompt(request)?;
    let response = strategist.ask(&prompt).context("request mission contract")?;
    let contract = MissionContract::from_response(&response, request.fallback_prompt)
        .map_err(MissionError::from)?;
    info!(
        objectives = contract.objectives.len(),
        criteria = contract.success_criteria.len(),
        "mission contract accepted"
    );
    Ok(contract)
}

/// Outcome of the pre-execution contract audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditVerdict {
    pub passed: bool,
    pub issues: Vec<String>,
}

pub fn parse_audit_response(response: &str) -> AuditVerdict {
    let issues = extract_list_section(response, "issues");
    match extract_section(response, "verdict") {
        Some(verdict) => AuditVerdict {
            passed: verdict.to_ascii_uppercase().contains("PASS"),
            issues,
        },
        None => AuditVerdict {
            passed: false,
            issues: if issues.is_empty() {
                vec!["auditor returned no verdict".to_string()]
            } else {
                issues
            },
        },
    }
}

/// Ask the strategist to critique a contract before execution.
#[instrument(skip_all)]
pub fn audit_mission<S: Strategist + ?Sized>(
    strategist: &S,
    contract: &MissionContract,
) -> Result<AuditVerdict> {
    let rendered = serde_json::to_string_pretty(contract).context("serialize contract")?;
    let prompt = PromptEngine::new().render("audit", context! { contract => rendered })?;
    let response = strategist.ask(&prompt).context("request contract audit")?;
    let verdict = parse_audit_response(&response);
    info!(passed = verdict.passed, issues = verdict.issues.len(), "contract audited");
    Ok(verdict)
}

/// Everything the strategist sees about a failed attempt.
#[derive(Debug, Clone)]
pub struct RecoveryRequest<'a> {
    pub original_prompt: &'a str,
    pub exit_code: i32,
    pub output_tail: &'a [String],
    pub signals: &'a std::collections::BTreeSet<Signal>,
    pub report: Option<&'a VerificationReport>,
    pub lessons: &'a [String],
}

/// Corrected prompt plus the strategist's diagnosis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryStrategy {
    pub prompt: String,
    pub classification: Classification,
    pub lessons_learned: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResultView<'a> {
    criterion: &'a str,
    passed: bool,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct FailureView<'a> {
    criterion: &'a str,
    stdout: Option<&'a str>,
    stderr: Option<&'a str>,
    error: Option<&'a str>,
}

pub fn render_recovery_prompt(request: &RecoveryRequest<'_>) -> Result<String> {
    let results = request
        .report
        .map(|report| {
            report
                .results
                .iter()
                .map(|result| ResultView {
                    criterion: &result.criterion,
                    passed: result.passed,
                    message: &result.message,
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let failures = request
        .report
        .map(|report| {
            report
                .failed()
                .map(|result| FailureView {
                    criterion: &result.criterion,
                    stdout: result.detail_str("stdout").filter(|s| !s.trim().is_empty()),
                    stderr: result.detail_str("stderr").filter(|s| !s.trim().is_empty()),
                    error: result.detail_str("error"),
                })
                .filter(|view| view.stdout.is_some() || view.stderr.is_some() || view.error.is_some())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let signals = request
        .signals
        .iter()
        .map(|signal| signal.as_str().to_string())
        .collect::<Vec<_>>();

    PromptEngine::new().render(
        "recovery",
        context! {
            original_prompt => request.original_prompt.trim(),
            exit_code => request.exit_code,
            signals => signals,
            output_tail => request.output_tail.join("\n"),
            results => results,
            failures => failures,
            lessons => request.lessons,
        },
    )
}

/// Parse a recovery response; a missing `<agent_prompt>` is an error.
pub fn parse_recovery_response(response: &str) -> Result<RecoveryStrategy, MissionError> {
    let prompt = extract_section(response, "agent_prompt").ok_or_else(|| {
        MissionError::ClassificationUnavailable(
            "strategist response has no <agent_prompt> section".to_string(),
        )
    })?;
    let classification = extract_section(response, "classification")
        .map(|raw| Classification::normalize(&raw))
        .unwrap_or(Classification::Unknown);
    Ok(RecoveryStrategy {
        prompt,
        classification,
        lessons_learned: extract_section(response, "lessons_learned"),
    })
}

/// Ask the strategist to diagnose a failure and rewrite the prompt.
#[instrument(skip_all, fields(exit_code = request.exit_code))]
pub fn propose_recovery<S: Strategist + ?Sized>(
    strategist: &S,
    request: &RecoveryRequest<'_>,
) -> Result<RecoveryStrategy, MissionError> {
    let prompt = render_recovery_prompt(request)
        .map_err(|err| MissionError::ClassificationUnavailable(format!("{err:#}")))?;
    let response = strategist
        .ask(&prompt)
        .map_err(|err| MissionError::ClassificationUnavailable(format!("{err:#}")))?;
    let strategy = parse_recovery_response(&response)?;
    info!(classification = %strategy.classification, "recovery strategy received");
    Ok(strategy)
}
