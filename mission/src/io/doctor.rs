//! Environment diagnostics for `chill-vibe doctor`.

use std::fmt::Write as _;
use std::path::Path;

use tracing::instrument;

use crate::io::agent::AgentRegistry;
use crate::io::config::MissionConfig;
use crate::io::git::Git;
use crate::io::process::find_on_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
    /// Failing required checks make the report unhealthy.
    pub required: bool,
}

impl DoctorCheck {
    fn new(name: impl Into<String>, ok: bool, detail: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            ok,
            detail: detail.into(),
            required,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoctorReport {
    pub checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    pub fn healthy(&self) -> bool {
        self.checks.iter().all(|check| check.ok || !check.required)
    }

    pub fn render(&self) -> String {
        let mut out = String::from("--- chill-vibe doctor ---\n");
        for check in &self.checks {
            let mark = match (check.ok, check.required) {
                (true, _) => "ok",
                (false, true) => "FAIL",
                (false, false) => "warn",
            };
            let _ = writeln!(out, "[{mark:>4}] {}: {}", check.name, check.detail);
        }
        let verdict = if self.healthy() {
            "all required checks passed"
        } else {
            "required checks failed"
        };
        let _ = writeln!(out, "{verdict}");
        out
    }
}

/// Inspect git, the strategist command and every registered agent.
#[instrument(skip_all, fields(repo = %repo.display()))]
pub fn run_doctor(repo: &Path, cfg: &MissionConfig, registry: &AgentRegistry) -> DoctorReport {
    let mut checks = Vec::new();
    let git = Git::new(repo);

    match git.version() {
        Ok(version) => checks.push(DoctorCheck::new("git", true, version, true)),
        Err(err) => checks.push(DoctorCheck::new("git", false, format!("{err:#}"), true)),
    }
    let in_repo = git.is_repository();
    checks.push(DoctorCheck::new(
        "repository",
        in_repo,
        if in_repo {
            format!("{} is a git work tree", repo.display())
        } else {
            format!("{} is not a git work tree (rollback unavailable)", repo.display())
        },
        cfg.rollback,
    ));

    match cfg.strategist.command.first() {
        Some(program) => {
            let found = find_on_path(program);
            checks.push(DoctorCheck::new(
                "strategist",
                found.is_some(),
                match found {
                    Some(path) => format!("{program} at {}", path.display()),
                    None => format!("{program} not found on PATH"),
                },
                true,
            ));
        }
        None => checks.push(DoctorCheck::new("strategist", false, "no command configured", true)),
    }

    for spec in registry.specs() {
        let missing = spec.missing_dependencies();
        let selected = spec.name == cfg.agent;
        let detail = if missing.is_empty() {
            format!("ready ({})", spec.command.join(" "))
        } else {
            format!("missing {}", missing.join(", "))
        };
        checks.push(DoctorCheck::new(
            format!("agent {}", spec.name),
            missing.is_empty(),
            detail,
            selected,
        ));
    }
    if registry.get(&cfg.agent).is_err() {
        checks.push(DoctorCheck::new(
            format!("agent {}", cfg.agent),
            false,
            format!("not registered (available: {})", registry.names().join(", ")),
            true,
        ));
    }

    DoctorReport { checks }
}
