//! Recovery orchestrator: run the agent, verify, diagnose, retry.
//!
//! One call to [`run_mission`] drives a contract to a terminal state. Every
//! attempt appends exactly one record to the history log, whatever its outcome.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::baseline::FileBaseline;
use crate::core::contract::MissionContract;
use crate::core::memory::{MemoryQuery, top_lessons};
use crate::core::recovery::{
    AbortReason, MissionState, RetryPolicy, after_agent_exit, after_verification,
    check_repeated_classification,
};
use crate::core::signals::{ExitSentinels, Signal, classify_failure_signals};
use crate::core::types::{Classification, MissionLogRecord, MissionStatus, VerificationReport};
use crate::io::agent::{AgentRun, AgentRunner};
use crate::io::config::MissionConfig;
use crate::io::history::{MissionLog, timestamp_now};
use crate::io::interrupt::InterruptFlag;
use crate::io::snapshot::{RollbackReport, Snapshot, SnapshotManager};
use crate::io::strategist::{RecoveryRequest, Strategist, propose_recovery};
use crate::io::verify::Verifier;

/// Exit code used for classification when the agent exited 0 but verification failed.
const VERIFICATION_FAILURE_EXIT: i32 = 1;

/// Knobs for one mission run.
#[derive(Debug, Clone)]
pub struct MissionSettings {
    pub model_id: String,
    pub max_retries: u32,
    pub protected_files: Vec<String>,
    pub memory_limit: usize,
    pub sentinels: ExitSentinels,
}

impl MissionSettings {
    pub fn from_config(cfg: &MissionConfig) -> Self {
        Self {
            model_id: cfg.model.clone(),
            max_retries: cfg.max_retries,
            protected_files: cfg.protected_files.clone(),
            memory_limit: cfg.memory_limit,
            sentinels: cfg.exit_codes,
        }
    }
}

impl Default for MissionSettings {
    fn default() -> Self {
        Self::from_config(&MissionConfig::default())
    }
}

/// Side-effecting collaborators the orchestrator needs besides agent and strategist.
pub struct MissionEnv<'a> {
    pub verifier: &'a Verifier,
    pub log: &'a MissionLog,
    /// Present when rollback between attempts is enabled.
    pub snapshots: Option<&'a SnapshotManager>,
    pub interrupt: &'a InterruptFlag,
}

/// Progress notifications for the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum MissionEvent {
    AttemptStarted {
        attempt: u32,
        prompt: String,
    },
    AgentExited {
        attempt: u32,
        exit_code: i32,
        duration: Duration,
    },
    Verified {
        attempt: u32,
        report: VerificationReport,
    },
    SignalsDetected(BTreeSet<Signal>),
    RolledBack(RollbackReport),
    RollbackFailed(String),
    RecoveryProposed {
        classification: Classification,
        lessons_learned: Option<String>,
    },
    Aborted(AbortReason),
    Interrupted,
    Succeeded {
        attempt: u32,
    },
}

/// Why the mission stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum MissionStop {
    Success,
    Aborted(AbortReason),
    Interrupted,
}

impl MissionStop {
    pub fn state(&self) -> MissionState {
        match self {
            MissionStop::Success => MissionState::Success,
            MissionStop::Aborted(_) => MissionState::Aborted,
            MissionStop::Interrupted => MissionState::Interrupted,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissionOutcome {
    pub stop: MissionStop,
    /// Agent launches performed.
    pub attempts: u32,
    /// Contract as it stood at the end, with the last prompt used.
    pub contract: MissionContract,
    pub last_report: Option<VerificationReport>,
}

struct Attempt<'a> {
    settings: &'a MissionSettings,
    agent_name: &'a str,
    contract: &'a MissionContract,
}

impl Attempt<'_> {
    fn record(&self, run: &AgentRun, status: MissionStatus) -> MissionLogRecord {
        MissionLogRecord {
            timestamp: timestamp_now(),
            model_id: Some(self.settings.model_id.clone()),
            agent_name: Some(self.agent_name.to_string()),
            duration_seconds: run.duration.as_secs_f64(),
            status,
            exit_code: Some(run.exit_code),
            success_criteria: self.contract.success_criteria.clone(),
            objectives: self.contract.objectives.clone(),
            agent_prompt: self.contract.agent_prompt.clone(),
            ..MissionLogRecord::default()
        }
    }
}

/// Drive `contract` through run, verify and recover until a terminal state.
#[instrument(skip_all, fields(agent = agent.name(), max_retries = settings.max_retries))]
pub fn run_mission<A, S, F>(
    agent: &A,
    strategist: &S,
    env: &MissionEnv<'_>,
    settings: &MissionSettings,
    contract: MissionContract,
    mut on_event: F,
) -> MissionOutcome
where
    A: AgentRunner + ?Sized,
    S: Strategist + ?Sized,
    F: FnMut(&MissionEvent),
{
    let mut contract = contract;
    let baseline = match env.verifier.capture_baseline() {
        Ok(baseline) => Some(baseline),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "baseline capture failed");
            None
        }
    };
    let policy = RetryPolicy::new(settings.max_retries);
    let mut previous: Option<Classification> = None;
    let mut recoveries = 0u32;
    let mut attempts = 0u32;
    let mut last_report: Option<VerificationReport> = None;

    let finish = |stop: MissionStop,
                  attempts: u32,
                  contract: MissionContract,
                  last_report: Option<VerificationReport>| MissionOutcome {
        stop,
        attempts,
        contract,
        last_report,
    };

    loop {
        if env.interrupt.is_triggered() {
            on_event(&MissionEvent::Interrupted);
            return finish(MissionStop::Interrupted, attempts, contract, last_report);
        }
        attempts += 1;
        let snapshot = env.snapshots.and_then(|manager| capture_snapshot(manager, &mut on_event));

        on_event(&MissionEvent::AttemptStarted {
            attempt: attempts,
            prompt: contract.agent_prompt.clone(),
        });
        let run = launch(agent, &contract.agent_prompt);
        on_event(&MissionEvent::AgentExited {
            attempt: attempts,
            exit_code: run.exit_code,
            duration: run.duration,
        });

        let attempt = Attempt {
            settings,
            agent_name: agent.name(),
            contract: &contract,
        };
        let interrupted = run.interrupted || env.interrupt.is_triggered();
        let mut report = None;
        match after_agent_exit(run.exit_code, interrupted, &settings.sentinels) {
            MissionState::Interrupted => {
                append(env.log, &attempt.record(&run, MissionStatus::Interrupted));
                on_event(&MissionEvent::Interrupted);
                return finish(MissionStop::Interrupted, attempts, contract, last_report);
            }
            MissionState::Verifying => {
                let verified = verify(env.verifier, &contract, baseline.as_ref(), settings);
                on_event(&MissionEvent::Verified {
                    attempt: attempts,
                    report: verified.clone(),
                });
                if after_verification(verified.all_passed) == MissionState::Success {
                    let mut record = attempt.record(&run, MissionStatus::Completed);
                    record.verification_results = verified.results.clone();
                    append(env.log, &record);
                    on_event(&MissionEvent::Succeeded { attempt: attempts });
                    info!(attempts, "mission succeeded");
                    return finish(MissionStop::Success, attempts, contract, Some(verified));
                }
                report = Some(verified);
            }
            _ => {}
        }

        let mut record = attempt.record(&run, MissionStatus::Failed);
        let classify_exit = if run.exit_code == 0 {
            VERIFICATION_FAILURE_EXIT
        } else {
            run.exit_code
        };
        let mut evidence = run.output_tail.clone();
        if let Some(report) = &report {
            record.verification_results = report.results.clone();
            evidence.extend(report.failure_lines());
        }
        let signals = classify_failure_signals(classify_exit, &evidence, &settings.sentinels);
        debug!(?signals, "failure signals");
        on_event(&MissionEvent::SignalsDetected(signals.clone()));
        record.signals = Some(signals.clone());
        last_report = report;

        if let (Some(manager), Some(snapshot)) = (env.snapshots, snapshot.as_ref()) {
            match manager.rollback(snapshot) {
                Ok(rolled) => on_event(&MissionEvent::RolledBack(rolled)),
                Err(err) => {
                    warn!(err = %err, "rollback failed");
                    on_event(&MissionEvent::RollbackFailed(err.to_string()));
                }
            }
        }

        if let Err(reason) = policy.check(recoveries) {
            append(env.log, &record);
            on_event(&MissionEvent::Aborted(reason.clone()));
            return finish(MissionStop::Aborted(reason), attempts, contract, last_report);
        }

        let history = match env.log.records() {
            Ok(history) => history,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "history unavailable for lessons");
                Default::default()
            }
        };
        let query = MemoryQuery {
            classification: previous,
            signals: signals.clone(),
            prompt: contract.agent_prompt.clone(),
            success_criteria: contract.success_criteria.clone(),
        };
        let lessons = top_lessons(&history, &query, settings.memory_limit);
        let request = RecoveryRequest {
            original_prompt: &contract.agent_prompt,
            exit_code: run.exit_code,
            output_tail: &run.output_tail,
            signals: &signals,
            report: last_report.as_ref(),
            lessons: &lessons,
        };

        let strategy = match propose_recovery(strategist, &request) {
            Ok(strategy) => strategy,
            Err(err) => {
                append(env.log, &record);
                let reason = AbortReason::NoRecoveryPrompt(err.to_string());
                on_event(&MissionEvent::Aborted(reason.clone()));
                return finish(MissionStop::Aborted(reason), attempts, contract, last_report);
            }
        };

        record.classification = Some(strategy.classification);
        record.lessons_learned = strategy.lessons_learned.clone();
        append(env.log, &record);
        on_event(&MissionEvent::RecoveryProposed {
            classification: strategy.classification,
            lessons_learned: strategy.lessons_learned.clone(),
        });

        if let Err(reason) = check_repeated_classification(previous, strategy.classification) {
            on_event(&MissionEvent::Aborted(reason.clone()));
            return finish(MissionStop::Aborted(reason), attempts, contract, last_report);
        }
        previous = Some(strategy.classification);
        recoveries += 1;
        contract.replace_prompt(strategy.prompt);
        info!(recoveries, classification = %strategy.classification, "retrying with recovery prompt");
    }
}

fn capture_snapshot<F: FnMut(&MissionEvent)>(
    manager: &SnapshotManager,
    on_event: &mut F,
) -> Option<Snapshot> {
    match manager.capture() {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            let message = format!("{err:#}");
            warn!(err = %message, "snapshot unavailable; attempt will not be rolled back");
            on_event(&MissionEvent::RollbackFailed(message));
            None
        }
    }
}

fn launch<A: AgentRunner + ?Sized>(agent: &A, prompt: &str) -> AgentRun {
    match agent.launch(prompt) {
        Ok(run) => run,
        Err(err) => {
            let message = format!("{err:#}");
            warn!(err = %message, "agent launch failed");
            AgentRun {
                exit_code: 1,
                output_tail: vec![message],
                interrupted: false,
                duration: Duration::ZERO,
            }
        }
    }
}

fn verify(
    verifier: &Verifier,
    contract: &MissionContract,
    baseline: Option<&FileBaseline>,
    settings: &MissionSettings,
) -> VerificationReport {
    verifier.verify(&contract.success_criteria, baseline, &settings.protected_files)
}

fn append(log: &MissionLog, record: &MissionLogRecord) {
    if let Err(err) = log.append(record) {
        warn!(err = %format!("{err:#}"), path = %log.path().display(), "failed to persist history record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::baseline::BaselineScanner;
    use crate::io::verify::VerifyLimits;
    use crate::test_support::{
        ScriptedAgent, ScriptedRun, ScriptedStrategist, TestRepo, recovery_response,
    };

    fn contract(criteria: &[&str]) -> MissionContract {
        MissionContract::new(
            vec!["ship it".to_string()],
            criteria.iter().map(|c| c.to_string()).collect(),
            "do the work",
        )
    }

    #[test]
    fn clean_exit_with_failing_criteria_is_a_failure() {
        let repo = TestRepo::new().expect("repo");
        let root = repo.path();
        let log = MissionLog::new(root.join(".chillvibe_logs.jsonl"));
        let verifier = Verifier::new(
            BaselineScanner::new(root).ignore_file(log.path()),
            VerifyLimits::default(),
        );
        let interrupt = InterruptFlag::new();
        let env = MissionEnv {
            verifier: &verifier,
            log: &log,
            snapshots: None,
            interrupt: &interrupt,
        };
        let agent = ScriptedAgent::new(root, vec![ScriptedRun::exit(0)]);
        let strategist = ScriptedStrategist::default();
        let settings = MissionSettings {
            max_retries: 0,
            ..MissionSettings::default()
        };

        let mut events = Vec::new();
        let outcome = run_mission(
            &agent,
            &strategist,
            &env,
            &settings,
            contract(&["exists:done.txt"]),
            |event| events.push(event.clone()),
        );

        assert_eq!(
            outcome.stop,
            MissionStop::Aborted(AbortReason::RetriesExhausted { retries: 0 })
        );
        assert_eq!(outcome.attempts, 1);
        let records = log.records().expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, MissionStatus::Failed);
        assert_eq!(records[0].exit_code, Some(0));
        assert_eq!(records[0].verification_results.len(), 1);
        assert!(strategist.prompts().is_empty());
        assert!(events.iter().any(|event| matches!(event, MissionEvent::Verified { .. })));
    }

    #[test]
    fn pre_triggered_interrupt_launches_nothing() {
        let repo = TestRepo::new().expect("repo");
        let root = repo.path();
        let log = MissionLog::new(root.join(".chillvibe_logs.jsonl"));
        let verifier = Verifier::new(BaselineScanner::new(root), VerifyLimits::default());
        let interrupt = InterruptFlag::new();
        interrupt.trigger();
        let env = MissionEnv {
            verifier: &verifier,
            log: &log,
            snapshots: None,
            interrupt: &interrupt,
        };
        let agent = ScriptedAgent::new(root, vec![ScriptedRun::exit(0)]);
        let strategist = ScriptedStrategist::default();

        let outcome = run_mission(
            &agent,
            &strategist,
            &env,
            &MissionSettings::default(),
            contract(&["exists:README.md"]),
            |_| {},
        );
        assert_eq!(outcome.stop, MissionStop::Interrupted);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(agent.remaining(), 1);
        assert!(log.records().expect("records").is_empty());
    }

    #[test]
    fn launch_errors_become_failed_attempts() {
        let repo = TestRepo::new().expect("repo");
        let root = repo.path();
        let log = MissionLog::new(root.join(".chillvibe_logs.jsonl"));
        let verifier = Verifier::new(BaselineScanner::new(root), VerifyLimits::default());
        let interrupt = InterruptFlag::new();
        let env = MissionEnv {
            verifier: &verifier,
            log: &log,
            snapshots: None,
            interrupt: &interrupt,
        };
        let agent = ScriptedAgent::new(root, Vec::new());
        let strategist = ScriptedStrategist::new(vec![recovery_response(
            "TOOLING",
            "agent binary missing",
            "retry",
        )]);
        let settings = MissionSettings {
            max_retries: 1,
            ..MissionSettings::default()
        };

        let outcome = run_mission(
            &agent,
            &strategist,
            &env,
            &settings,
            contract(&["exists:README.md"]),
            |_| {},
        );
        assert_eq!(outcome.attempts, 2);
        assert_eq!(
            outcome.stop,
            MissionStop::Aborted(AbortReason::RetriesExhausted { retries: 1 })
        );
        let records = log.records().expect("records");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].classification, Some(Classification::Tooling));
        assert_eq!(records[0].exit_code, Some(1));
        assert_eq!(outcome.contract.agent_prompt, "retry");
    }
}
