//! Layered configuration: defaults, global file, repo file, then CLI flags.
//!
//! Files are TOML. The global file lives at `$HOME/.chillvibe/config.toml`,
//! the repo file at `<repo>/.chillvibe.toml`. Later layers override earlier
//! ones key by key; nested tables merge.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::signals::ExitSentinels;

pub const REPO_CONFIG_FILE: &str = ".chillvibe.toml";
pub const GLOBAL_CONFIG_DIR: &str = ".chillvibe";
pub const GLOBAL_CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_HISTORY_FILE: &str = ".chillvibe_logs.jsonl";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThinkingLevel {
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    /// Reasoning token budget passed to the strategist command.
    pub fn budget(self) -> u32 {
        match self {
            ThinkingLevel::Low => 2048,
            ThinkingLevel::Medium => 8192,
            ThinkingLevel::High => 16384,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThinkingLevel::Low => "LOW",
            ThinkingLevel::Medium => "MEDIUM",
            ThinkingLevel::High => "HIGH",
        }
    }
}

/// How the pre-execution contract audit treats a FAIL verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    Off,
    Warn,
    Abort,
}

/// Top-level mission configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MissionConfig {
    /// Strategist model identifier, substituted into the strategist command.
    pub model: String,
    pub thinking_level: ThinkingLevel,
    /// Registered agent used for execution.
    pub agent: String,
    /// Recovery attempts allowed after the initial run.
    pub max_retries: u32,
    /// Reset the working tree to the pre-attempt revision after each failed attempt.
    pub rollback: bool,
    pub audit: AuditMode,
    /// Wall-clock limit for each shell or coverage criterion.
    pub verify_timeout_secs: u64,
    pub verify_output_limit_bytes: usize,
    /// Lines of agent output kept for failure analysis.
    pub output_tail_lines: usize,
    /// Lines of criterion stdout/stderr kept in verification details.
    pub detail_tail_lines: usize,
    pub coverage_command: String,
    /// History log, relative to the repo unless absolute.
    pub history_path: PathBuf,
    /// Lessons injected into each recovery request.
    pub memory_limit: usize,
    /// Glob patterns no attempt may modify.
    pub protected_files: Vec<String>,
    /// Glob patterns skipped during context extraction.
    pub exclude_patterns: Vec<String>,
    pub depth: Option<usize>,
    pub include_ext: Vec<String>,
    pub context_budget_bytes: usize,
    /// Extra arguments appended to the agent command.
    pub extra_args: Vec<String>,
    pub exit_codes: ExitSentinels,
    pub strategist: StrategistConfig,
    pub agents: BTreeMap<String, AgentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StrategistConfig {
    /// Command that reads a prompt on stdin and answers on stdout.
    ///
    /// `{model}` and `{thinking_budget}` placeholders are substituted.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Attempts for transient failures (rate limits, server errors).
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for StrategistConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "gemini".to_string(),
                "-m".to_string(),
                "{model}".to_string(),
            ],
            timeout_secs: 5 * 60,
            output_limit_bytes: 1_000_000,
            max_attempts: 3,
            retry_delay_secs: 5,
        }
    }
}

/// User-registered or overridden agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub command: Vec<String>,
    pub dependencies: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            thinking_level: ThinkingLevel::High,
            agent: "gemini-cli".to_string(),
            max_retries: 1,
            rollback: false,
            audit: AuditMode::Warn,
            verify_timeout_secs: 10 * 60,
            verify_output_limit_bytes: 100_000,
            output_tail_lines: 50,
            detail_tail_lines: 20,
            coverage_command: "pytest --cov --cov-report=term".to_string(),
            history_path: PathBuf::from(DEFAULT_HISTORY_FILE),
            memory_limit: 3,
            protected_files: Vec::new(),
            exclude_patterns: Vec::new(),
            depth: None,
            include_ext: Vec::new(),
            context_budget_bytes: 2_000_000,
            extra_args: Vec::new(),
            exit_codes: ExitSentinels::default(),
            strategist: StrategistConfig::default(),
            agents: BTreeMap::new(),
        }
    }
}

impl MissionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.verify_timeout_secs == 0 {
            return Err(anyhow!("verify_timeout_secs must be > 0"));
        }
        if self.verify_output_limit_bytes == 0 {
            return Err(anyhow!("verify_output_limit_bytes must be > 0"));
        }
        if self.output_tail_lines == 0 {
            return Err(anyhow!("output_tail_lines must be > 0"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if self.strategist.command.is_empty() || self.strategist.command[0].trim().is_empty() {
            return Err(anyhow!("strategist.command must be a non-empty array"));
        }
        if self.strategist.max_attempts == 0 {
            return Err(anyhow!("strategist.max_attempts must be > 0"));
        }
        for (name, agent) in &self.agents {
            if agent.command.is_empty() || agent.command[0].trim().is_empty() {
                return Err(anyhow!("agents.{name}.command must be a non-empty array"));
            }
        }
        for pattern in &self.protected_files {
            glob::Pattern::new(pattern)
                .map_err(|err| anyhow!("protected_files: invalid glob '{pattern}': {err}"))?;
        }
        for pattern in &self.exclude_patterns {
            glob::Pattern::new(pattern)
                .map_err(|err| anyhow!("exclude_patterns: invalid glob '{pattern}': {err}"))?;
        }
        Ok(())
    }

    /// History log location resolved against the repo root.
    pub fn history_file(&self, repo: &Path) -> PathBuf {
        if self.history_path.is_absolute() {
            self.history_path.clone()
        } else {
            repo.join(&self.history_path)
        }
    }
}

/// Values supplied on the command line; `None` leaves the file value alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub model: Option<String>,
    pub thinking_level: Option<ThinkingLevel>,
    pub agent: Option<String>,
    pub max_retries: Option<u32>,
    pub rollback: Option<bool>,
    pub audit: Option<AuditMode>,
    pub exclude_patterns: Vec<String>,
    pub depth: Option<usize>,
    pub include_ext: Vec<String>,
    pub protected_files: Vec<String>,
    pub extra_args: Vec<String>,
}

pub fn apply_overrides(cfg: &mut MissionConfig, overrides: &CliOverrides) {
    if let Some(model) = &overrides.model {
        cfg.model = model.clone();
    }
    if let Some(level) = overrides.thinking_level {
        cfg.thinking_level = level;
    }
    if let Some(agent) = &overrides.agent {
        cfg.agent = agent.clone();
    }
    if let Some(retries) = overrides.max_retries {
        cfg.max_retries = retries;
    }
    if let Some(rollback) = overrides.rollback {
        cfg.rollback = rollback;
    }
    if let Some(audit) = overrides.audit {
        cfg.audit = audit;
    }
    if let Some(depth) = overrides.depth {
        cfg.depth = Some(depth);
    }
    if !overrides.exclude_patterns.is_empty() {
        cfg.exclude_patterns
            .extend(overrides.exclude_patterns.iter().cloned());
    }
    if !overrides.include_ext.is_empty() {
        cfg.include_ext = overrides.include_ext.clone();
    }
    if !overrides.protected_files.is_empty() {
        cfg.protected_files
            .extend(overrides.protected_files.iter().cloned());
    }
    if !overrides.extra_args.is_empty() {
        cfg.extra_args = overrides.extra_args.clone();
    }
}

/// `$HOME/.chillvibe/config.toml`, when `HOME` is set.
pub fn global_config_path() -> Option<PathBuf> {
    let home = env::var_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(GLOBAL_CONFIG_DIR)
            .join(GLOBAL_CONFIG_FILE),
    )
}

/// Merge the global and repo config files over the defaults.
///
/// Missing files are skipped. The merged result is validated.
pub fn load_layered(global: Option<&Path>, repo: &Path) -> Result<MissionConfig> {
    let mut merged = toml::Table::new();
    let local = repo.join(REPO_CONFIG_FILE);
    for path in global.into_iter().chain(std::iter::once(local.as_path())) {
        if let Some(layer) = read_layer(path)? {
            debug!(path = %path.display(), "merging config layer");
            merge_tables(&mut merged, layer);
        }
    }
    let rendered = toml::to_string(&merged).context("serialize merged config")?;
    let cfg: MissionConfig = toml::from_str(&rendered).context("deserialize merged config")?;
    cfg.validate()?;
    Ok(cfg)
}

fn read_layer(path: &Path) -> Result<Option<toml::Table>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let table: toml::Table =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(table))
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_yield_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_layered(Some(&temp.path().join("nope.toml")), temp.path()).expect("load");
        assert_eq!(cfg, MissionConfig::default());
    }

    #[test]
    fn repo_layer_overrides_global_layer() {
        let temp = tempfile::tempdir().expect("tempdir");
        let global = temp.path().join("global.toml");
        fs::write(
            &global,
            r#"
model = "global-model"
max_retries = 4
protected_files = ["secrets/*"]

[agents.custom]
command = ["custom-agent", "--fast"]
dependencies = ["custom-agent"]

[exit_codes]
command_not_found = 9009
"#,
        )
        .expect("write global");
        fs::write(
            temp.path().join(REPO_CONFIG_FILE),
            r#"
max_retries = 2
rollback = true

[agents.custom]
dependencies = []

[exit_codes]
interrupted = 131
"#,
        )
        .expect("write local");

        let cfg = load_layered(Some(&global), temp.path()).expect("load");
        assert_eq!(cfg.model, "global-model");
        assert_eq!(cfg.max_retries, 2);
        assert!(cfg.rollback);
        assert_eq!(cfg.protected_files, vec!["secrets/*".to_string()]);
        let custom = cfg.agents.get("custom").expect("custom agent");
        assert_eq!(custom.command, vec!["custom-agent".to_string(), "--fast".to_string()]);
        assert!(custom.dependencies.is_empty());
        assert_eq!(cfg.exit_codes.command_not_found, 9009);
        assert_eq!(cfg.exit_codes.interrupted, 131);
        assert_eq!(cfg.exit_codes.killed, 137);
    }

    #[test]
    fn cli_overrides_win() {
        let mut cfg = MissionConfig {
            exclude_patterns: vec!["*.lock".to_string()],
            ..MissionConfig::default()
        };
        let overrides = CliOverrides {
            model: Some("cli-model".to_string()),
            max_retries: Some(0),
            rollback: Some(true),
            audit: Some(AuditMode::Abort),
            exclude_patterns: vec!["dist/*".to_string()],
            include_ext: vec!["py".to_string()],
            ..CliOverrides::default()
        };
        apply_overrides(&mut cfg, &overrides);
        assert_eq!(cfg.model, "cli-model");
        assert_eq!(cfg.max_retries, 0);
        assert!(cfg.rollback);
        assert_eq!(cfg.audit, AuditMode::Abort);
        assert_eq!(
            cfg.exclude_patterns,
            vec!["*.lock".to_string(), "dist/*".to_string()]
        );
        assert_eq!(cfg.include_ext, vec!["py".to_string()]);
        assert_eq!(cfg.agent, "gemini-cli");
    }

    #[test]
    fn invalid_glob_fails_validation() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join(REPO_CONFIG_FILE),
            "protected_files = [\"[\"]\n",
        )
        .expect("write");
        let err = load_layered(None, temp.path()).expect_err("invalid glob");
        assert!(err.to_string().contains("protected_files"));
    }

    #[test]
    fn empty_agent_command_fails_validation() {
        let mut cfg = MissionConfig::default();
        cfg.agents.insert("broken".to_string(), AgentConfig::default());
        let err = cfg.validate().expect_err("empty command");
        assert!(err.to_string().contains("agents.broken.command"));
    }

    #[test]
    fn history_file_resolves_relative_to_repo() {
        let cfg = MissionConfig::default();
        assert_eq!(
            cfg.history_file(Path::new("/repo")),
            PathBuf::from("/repo/.chillvibe_logs.jsonl")
        );
        let cfg = MissionConfig {
            history_path: PathBuf::from("/var/log/missions.jsonl"),
            ..MissionConfig::default()
        };
        assert_eq!(
            cfg.history_file(Path::new("/repo")),
            PathBuf::from("/var/log/missions.jsonl")
        );
    }

    #[test]
    fn thinking_budgets() {
        assert_eq!(ThinkingLevel::Low.budget(), 2048);
        assert_eq!(ThinkingLevel::Medium.budget(), 8192);
        assert_eq!(ThinkingLevel::High.budget(), 16384);
    }
}
