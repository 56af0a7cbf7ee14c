//! `chill-vibe`: supervise a coding agent until its mission verifies.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use mission::core::memory::{MemoryQuery, rank_records};
use mission::core::signals::Signal;
use mission::core::types::{Classification, VerificationReport};
use mission::error::MissionError;
use mission::exit_codes;
use mission::io::agent::{AgentRegistry, OperatorInput, ProcessAgent};
use mission::io::baseline::BaselineScanner;
use mission::io::config::{
    AuditMode, CliOverrides, MissionConfig, ThinkingLevel, apply_overrides, global_config_path,
    load_layered,
};
use mission::io::doctor::run_doctor;
use mission::io::history::{MissionLog, render_table};
use mission::io::interrupt::InterruptFlag;
use mission::io::snapshot::SnapshotManager;
use mission::io::strategist::CommandStrategist;
use mission::io::verify::{Verifier, VerifyLimits};
use mission::logging;
use mission::mission::{MissionEnv, MissionEvent, MissionSettings, MissionStop, run_mission};
use mission::plan::{PlanEvent, PlanRequest, prepare_contract, record_dry_run};

#[derive(Parser)]
#[command(
    name = "chill-vibe",
    version,
    about = "Run a coding agent against a verified mission contract, recovering from failures"
)]
struct Cli {
    /// Debug-level tracing on stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Global config file (default: ~/.chillvibe/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan a mission for the repository and run the agent until it verifies.
    Run(RunArgs),
    /// Print the mission history table.
    History {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Check git, the strategist command and agent dependencies.
    Doctor {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Evaluate success criteria against the repository as it is now.
    Verify {
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Criterion to check (repeatable).
        #[arg(short, long = "criterion", required = true)]
        criteria: Vec<String>,
        /// Protected-file glob checked as `no_clobber` (repeatable).
        #[arg(long = "protected")]
        protected: Vec<String>,
    },
    /// Show the lessons memory would surface for a failure.
    Lessons {
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Failure signal, e.g. TEST_FAILURE (repeatable).
        #[arg(short, long = "signal")]
        signals: Vec<String>,
        #[arg(long)]
        classification: Option<String>,
        /// Current agent prompt, for keyword overlap.
        #[arg(long, default_value = "")]
        prompt: String,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Args)]
struct RunArgs {
    #[arg(default_value = ".")]
    path: PathBuf,
    /// Goal or constraints handed to the strategist.
    #[arg(short, long)]
    goal: Option<String>,
    /// Agent prompt used when the strategist's contract omits one.
    #[arg(long)]
    prompt: Option<String>,
    /// Plan and print the contract without launching the agent.
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, value_enum)]
    thinking_level: Option<ThinkingLevel>,
    #[arg(long)]
    agent: Option<String>,
    #[arg(long)]
    max_retries: Option<u32>,
    /// Reset the work tree after each failed attempt.
    #[arg(long)]
    rollback: bool,
    #[arg(long, value_enum)]
    audit: Option<AuditMode>,
    /// Glob skipped during context extraction (repeatable).
    #[arg(long = "exclude")]
    exclude: Vec<String>,
    #[arg(long)]
    depth: Option<usize>,
    /// File extension included in context (repeatable).
    #[arg(long = "include-ext")]
    include_ext: Vec<String>,
    /// Glob no attempt may modify (repeatable).
    #[arg(long = "protected")]
    protected: Vec<String>,
    /// Extra arguments passed to the agent command.
    #[arg(last = true)]
    extra_args: Vec<String>,
}

impl RunArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            model: self.model.clone(),
            thinking_level: self.thinking_level,
            agent: self.agent.clone(),
            max_retries: self.max_retries,
            rollback: self.rollback.then_some(true),
            audit: self.audit,
            exclude_patterns: self.exclude.clone(),
            depth: self.depth,
            include_ext: self.include_ext.clone(),
            protected_files: self.protected.clone(),
            extra_args: self.extra_args.clone(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            process::exit(error_exit_code(&err));
        }
    }
}

fn error_exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<MissionError>() {
        Some(
            MissionError::ContractParse(_)
            | MissionError::ContractInvalid(_)
            | MissionError::UnknownAgent { .. },
        ) => exit_codes::INVALID,
        _ => exit_codes::FAILED,
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run(args) => cmd_run(cli.config.as_deref(), &args),
        Command::History { path } => cmd_history(cli.config.as_deref(), &path),
        Command::Doctor { path } => cmd_doctor(cli.config.as_deref(), &path),
        Command::Verify {
            path,
            criteria,
            protected,
        } => cmd_verify(cli.config.as_deref(), &path, &criteria, &protected),
        Command::Lessons {
            path,
            signals,
            classification,
            prompt,
            limit,
        } => cmd_lessons(
            cli.config.as_deref(),
            &path,
            &signals,
            classification.as_deref(),
            prompt,
            limit,
        ),
    }
}

fn load_config(global: Option<&Path>, repo: &Path) -> Result<MissionConfig> {
    let global = global.map(Path::to_path_buf).or_else(global_config_path);
    load_layered(global.as_deref(), repo).context("load configuration")
}

fn resolve_repo(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("resolve repository path {}", path.display()))
}

fn cmd_run(global: Option<&Path>, args: &RunArgs) -> Result<i32> {
    let root = resolve_repo(&args.path)?;
    let mut cfg = load_config(global, &root)?;
    apply_overrides(&mut cfg, &args.overrides());
    cfg.validate()?;

    let registry = AgentRegistry::from_config(&cfg.agents);
    let spec = registry.get(&cfg.agent)?.clone();
    let missing = spec.missing_dependencies();
    if !missing.is_empty() {
        eprintln!(
            "[!] agent '{}' is missing dependencies: {} (run `chill-vibe doctor`)",
            spec.name,
            missing.join(", ")
        );
    }

    let interrupt = InterruptFlag::new();
    interrupt.install_ctrl_c()?;
    let log = MissionLog::new(cfg.history_file(&root));
    let strategist = CommandStrategist::from_config(&cfg, &root);

    let started = Instant::now();
    println!("[*] Planning mission for {}", root.display());
    let contract = prepare_contract(
        &strategist,
        &root,
        &cfg,
        &log,
        &PlanRequest {
            constraints: args.goal.clone(),
            fallback_prompt: args.prompt.clone(),
        },
        print_plan_event,
    )?;

    if args.dry_run {
        println!("{}", serde_json::to_string_pretty(&contract)?);
        record_dry_run(&log, &cfg, &contract, started.elapsed())?;
        println!("[*] Dry run recorded; agent not launched.");
        return Ok(exit_codes::OK);
    }

    let agent = ProcessAgent::new(spec, &root, interrupt.clone())
        .with_extra_args(cfg.extra_args.clone())
        .with_tail_lines(cfg.output_tail_lines)
        .with_sentinels(cfg.exit_codes)
        .with_operator_input(OperatorInput::from_stdin()?);
    let verifier = Verifier::new(
        BaselineScanner::new(&root).ignore_file(log.path()),
        VerifyLimits::from_config(&cfg),
    );
    let snapshots = SnapshotManager::new(&root).preserve_file(log.path());
    let env = MissionEnv {
        verifier: &verifier,
        log: &log,
        snapshots: cfg.rollback.then_some(&snapshots),
        interrupt: &interrupt,
    };

    let outcome = run_mission(
        &agent,
        &strategist,
        &env,
        &MissionSettings::from_config(&cfg),
        contract,
        print_mission_event,
    );
    Ok(match outcome.stop {
        MissionStop::Success => {
            println!("[✓] Mission verified after {} attempt(s).", outcome.attempts);
            exit_codes::OK
        }
        MissionStop::Aborted(reason) => {
            println!("[✗] Mission aborted: {reason}");
            exit_codes::FAILED
        }
        MissionStop::Interrupted => {
            println!("[!] Mission interrupted by operator.");
            exit_codes::INTERRUPTED
        }
    })
}

fn print_plan_event(event: &PlanEvent) {
    match event {
        PlanEvent::ContextExtracted {
            files,
            bytes,
            truncated,
        } => {
            let note = if *truncated { " (truncated)" } else { "" };
            println!("[*] Context: {files} files, {bytes} bytes{note}");
        }
        PlanEvent::ContractProposed(contract) => {
            println!("[*] Mission: {}", contract.summary);
            for objective in &contract.objectives {
                println!("    objective: {objective}");
            }
            for criterion in &contract.success_criteria {
                println!("    criterion: {criterion}");
            }
        }
        PlanEvent::Audited(verdict) => {
            let label = if verdict.passed { "PASS" } else { "FAIL" };
            println!("[*] Audit: {label}");
            for issue in &verdict.issues {
                println!("    - {issue}");
            }
        }
        PlanEvent::AuditUnavailable(reason) => eprintln!("[!] Audit skipped: {reason}"),
        PlanEvent::PreflightPassed => println!("[✓] Pre-flight verification passed."),
    }
}

fn print_mission_event(event: &MissionEvent) {
    match event {
        MissionEvent::AttemptStarted { attempt, .. } => println!("[*] Attempt {attempt}: launching agent"),
        MissionEvent::AgentExited {
            attempt,
            exit_code,
            duration,
        } => println!(
            "[*] Attempt {attempt}: agent exited with code {exit_code} after {:.1}s",
            duration.as_secs_f64()
        ),
        MissionEvent::Verified { report, .. } => print_report(report),
        MissionEvent::SignalsDetected(signals) if !signals.is_empty() => {
            let names = signals.iter().map(Signal::as_str).collect::<Vec<_>>();
            println!("[*] Signals: {}", names.join(", "));
        }
        MissionEvent::SignalsDetected(_) => {}
        MissionEvent::RolledBack(report) => println!(
            "[*] Rolled back to {} ({} file(s) removed)",
            short_revision(&report.revision),
            report.removed.len()
        ),
        MissionEvent::RollbackFailed(reason) => eprintln!("[!] Rollback failed: {reason}"),
        MissionEvent::RecoveryProposed {
            classification,
            lessons_learned,
        } => {
            println!("[*] Classification: {classification}");
            if let Some(lessons) = lessons_learned {
                println!("[*] Lessons: {lessons}");
            }
        }
        MissionEvent::Aborted(_) | MissionEvent::Interrupted | MissionEvent::Succeeded { .. } => {}
    }
}

fn short_revision(revision: &str) -> &str {
    revision.get(..12).unwrap_or(revision)
}

fn print_report(report: &VerificationReport) {
    for result in &report.results {
        let mark = if result.passed { "✓" } else { "✗" };
        println!("  [{mark}] {}: {}", result.criterion, result.message);
    }
}

fn cmd_history(global: Option<&Path>, path: &Path) -> Result<i32> {
    let root = resolve_repo(path)?;
    let cfg = load_config(global, &root)?;
    let log = MissionLog::new(cfg.history_file(&root));
    let records = log.records()?;
    if records.is_empty() {
        println!("No mission history at {}", log.path().display());
    } else {
        print!("{}", render_table(&records));
    }
    Ok(exit_codes::OK)
}

fn cmd_doctor(global: Option<&Path>, path: &Path) -> Result<i32> {
    let root = resolve_repo(path)?;
    let cfg = load_config(global, &root)?;
    let registry = AgentRegistry::from_config(&cfg.agents);
    let report = run_doctor(&root, &cfg, &registry);
    print!("{}", report.render());
    Ok(if report.healthy() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_verify(
    global: Option<&Path>,
    path: &Path,
    criteria: &[String],
    protected: &[String],
) -> Result<i32> {
    let root = resolve_repo(path)?;
    let cfg = load_config(global, &root)?;
    let log_path = cfg.history_file(&root);
    let verifier = Verifier::new(
        BaselineScanner::new(&root).ignore_file(&log_path),
        VerifyLimits::from_config(&cfg),
    );
    let baseline = verifier.capture_baseline()?;
    let mut protected_files = cfg.protected_files.clone();
    protected_files.extend(protected.iter().cloned());
    let report = verifier.verify(criteria, Some(&baseline), &protected_files);
    print_report(&report);
    Ok(if report.all_passed {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_lessons(
    global: Option<&Path>,
    path: &Path,
    signals: &[String],
    classification: Option<&str>,
    prompt: String,
    limit: Option<usize>,
) -> Result<i32> {
    let root = resolve_repo(path)?;
    let cfg = load_config(global, &root)?;
    let log = MissionLog::new(cfg.history_file(&root));
    let records = log.records()?;
    let query = MemoryQuery {
        classification: classification.map(Classification::normalize),
        signals: signals
            .iter()
            .map(|raw| Signal::from(raw.trim().to_ascii_uppercase()))
            .collect::<BTreeSet<_>>(),
        prompt,
        success_criteria: Vec::new(),
    };
    let limit = limit.unwrap_or(cfg.memory_limit);
    let ranked = rank_records(&records, &query)
        .into_iter()
        .filter(|scored| scored.record.lessons().is_some())
        .take(limit)
        .collect::<Vec<_>>();
    if ranked.is_empty() {
        println!("No relevant lessons found.");
    }
    for scored in ranked {
        let classification = scored
            .record
            .classification
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "[{:.1}] {} {} {}: {}",
            scored.score,
            scored.record.timestamp,
            scored.record.status,
            classification,
            scored.record.lessons().unwrap_or_default()
        );
    }
    Ok(exit_codes::OK)
}
