//! Mission planning: repository context, proposal, audit and pre-flight.
//!
//! Everything here happens before the agent is launched, and any failure is
//! fatal to the mission (nothing has been changed yet).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::contract::MissionContract;
use crate::core::memory::{MemoryQuery, top_lessons};
use crate::core::types::{MissionLogRecord, MissionStatus};
use crate::error::MissionError;
use crate::io::config::{AuditMode, MissionConfig};
use crate::io::context::{ContextOptions, extract_context, read_rules};
use crate::io::history::{MissionLog, timestamp_now};
use crate::io::preflight::preflight;
use crate::io::strategist::{AuditVerdict, ProposalRequest, Strategist, audit_mission, propose_mission};

/// Operator-supplied steering for the proposal.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    /// Free-text goal or constraints passed to the strategist.
    pub constraints: Option<String>,
    /// Agent prompt to use when the strategist omits one.
    pub fallback_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanEvent {
    ContextExtracted {
        files: usize,
        bytes: usize,
        truncated: bool,
    },
    ContractProposed(MissionContract),
    Audited(AuditVerdict),
    AuditUnavailable(String),
    PreflightPassed,
}

pub fn context_options(cfg: &MissionConfig, root: &Path) -> ContextOptions {
    ContextOptions {
        exclude_patterns: cfg.exclude_patterns.clone(),
        depth: cfg.depth,
        include_ext: cfg.include_ext.clone(),
        budget_bytes: cfg.context_budget_bytes,
        skip_files: vec![cfg.history_file(root)],
    }
}

/// Produce a validated, audited contract that passed pre-flight.
#[instrument(skip_all, fields(root = %root.display(), audit = ?cfg.audit))]
pub fn prepare_contract<S, F>(
    strategist: &S,
    root: &Path,
    cfg: &MissionConfig,
    log: &MissionLog,
    request: &PlanRequest,
    mut on_event: F,
) -> Result<MissionContract>
where
    S: Strategist + ?Sized,
    F: FnMut(&PlanEvent),
{
    let context = extract_context(root, &context_options(cfg, root)).context("extract repository context")?;
    on_event(&PlanEvent::ContextExtracted {
        files: context.files.len(),
        bytes: context.text.len(),
        truncated: context.truncated,
    });

    let rules = read_rules(root)?;
    let history = log.records().unwrap_or_else(|err| {
        warn!(err = %format!("{err:#}"), "history unavailable for planning");
        Default::default()
    });
    let lessons = top_lessons(
        &history,
        &MemoryQuery {
            prompt: request.constraints.clone().unwrap_or_default(),
            ..MemoryQuery::default()
        },
        cfg.memory_limit,
    );

    let contract = propose_mission(
        strategist,
        &ProposalRequest {
            context: &context.text,
            rules: rules.as_deref(),
            constraints: request.constraints.as_deref(),
            lessons: &lessons,
            fallback_prompt: request.fallback_prompt.as_deref(),
        },
    )?;
    on_event(&PlanEvent::ContractProposed(contract.clone()));

    audit(strategist, &contract, cfg.audit, &mut on_event)?;

    let issues = preflight(&contract.success_criteria, root);
    if !issues.is_empty() {
        return Err(
            MissionError::ContractInvalid(issues.iter().map(ToString::to_string).collect()).into(),
        );
    }
    on_event(&PlanEvent::PreflightPassed);
    info!(criteria = contract.success_criteria.len(), "contract ready");
    Ok(contract)
}

fn audit<S, F>(strategist: &S, contract: &MissionContract, mode: AuditMode, on_event: &mut F) -> Result<()>
where
    S: Strategist + ?Sized,
    F: FnMut(&PlanEvent),
{
    if mode == AuditMode::Off {
        return Ok(());
    }
    let verdict = match audit_mission(strategist, contract) {
        Ok(verdict) => verdict,
        Err(err) if mode == AuditMode::Warn => {
            let message = format!("{err:#}");
            warn!(err = %message, "contract audit unavailable");
            on_event(&PlanEvent::AuditUnavailable(message));
            return Ok(());
        }
        Err(err) => return Err(err.context("audit mission contract")),
    };
    on_event(&PlanEvent::Audited(verdict.clone()));
    if !verdict.passed && mode == AuditMode::Abort {
        let issues = if verdict.issues.is_empty() {
            vec!["audit verdict FAIL".to_string()]
        } else {
            verdict.issues
        };
        return Err(MissionError::ContractInvalid(issues).into());
    }
    Ok(())
}

/// Persist a `DRY_RUN` record for a contract that was planned but not executed.
pub fn record_dry_run(
    log: &MissionLog,
    cfg: &MissionConfig,
    contract: &MissionContract,
    duration: Duration,
) -> Result<()> {
    log.append(&MissionLogRecord {
        timestamp: timestamp_now(),
        model_id: Some(cfg.model.clone()),
        agent_name: Some(cfg.agent.clone()),
        duration_seconds: duration.as_secs_f64(),
        status: MissionStatus::DryRun,
        success_criteria: contract.success_criteria.clone(),
        objectives: contract.objectives.clone(),
        agent_prompt: contract.agent_prompt.clone(),
        ..MissionLogRecord::default()
    })
}
