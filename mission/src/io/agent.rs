//! Agent registry and the process-backed agent runner.
//!
//! The [`AgentRunner`] trait decouples the recovery loop from the actual agent
//! process. Tests use scripted runners that return predetermined runs without
//! spawning anything.

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::signals::ExitSentinels;
use crate::error::MissionError;
use crate::io::config::AgentConfig;
use crate::io::interrupt::InterruptFlag;
use crate::io::process::{exit_code_of, find_on_path};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(2);
const DEFAULT_TAIL_LINES: usize = 50;

/// Named agent: how to launch it and which executables it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSpec {
    pub name: String,
    pub command: Vec<String>,
    pub dependencies: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl AgentSpec {
    pub fn new(name: &str, command: &[&str], dependencies: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            command: command.iter().map(|part| part.to_string()).collect(),
            dependencies: dependencies.iter().map(|dep| dep.to_string()).collect(),
            env: BTreeMap::new(),
        }
    }

    /// Dependencies not found on `PATH`.
    pub fn missing_dependencies(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .filter(|dep| find_on_path(dep).is_none())
            .cloned()
            .collect()
    }
}

/// Agents available by name: built-ins plus configured entries.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentSpec>,
}

impl AgentRegistry {
    pub fn builtin() -> Self {
        let agents = [
            AgentSpec::new("gemini-cli", &["npx", "@google/gemini-cli", "--yolo"], &["npx"]),
            AgentSpec::new("qwen", &["qwen", "--yolo"], &["qwen"]),
            AgentSpec::new("aider", &["aider", "--architect"], &["aider"]),
        ];
        Self {
            agents: agents
                .into_iter()
                .map(|spec| (spec.name.clone(), spec))
                .collect(),
        }
    }

    /// Built-ins with configured agents added or replacing same-named ones.
    pub fn from_config(configured: &BTreeMap<String, AgentConfig>) -> Self {
        let mut registry = Self::builtin();
        for (name, agent) in configured {
            registry.agents.insert(
                name.clone(),
                AgentSpec {
                    name: name.clone(),
                    command: agent.command.clone(),
                    dependencies: agent.dependencies.clone(),
                    env: agent.env.clone(),
                },
            );
        }
        registry
    }

    pub fn get(&self, name: &str) -> Result<&AgentSpec, MissionError> {
        self.agents
            .get(name)
            .ok_or_else(|| MissionError::UnknownAgent {
                name: name.to_string(),
                available: self.names(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn specs(&self) -> impl Iterator<Item = &AgentSpec> {
        self.agents.values()
    }
}

/// Result of one agent process run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRun {
    pub exit_code: i32,
    /// Last lines of combined stdout/stderr.
    pub output_tail: Vec<String>,
    pub interrupted: bool,
    pub duration: Duration,
}

/// Abstraction over agent backends.
pub trait AgentRunner {
    fn name(&self) -> &str;

    /// Run the agent on `prompt` to completion.
    fn launch(&self, prompt: &str) -> Result<AgentRun>;
}

/// Operator keyboard input, read once per process and shared by runs.
#[derive(Debug, Clone)]
pub struct OperatorInput {
    rx: Arc<Mutex<Receiver<String>>>,
}

impl OperatorInput {
    /// Spawn a reader on this process's stdin.
    pub fn from_stdin() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("operator-input".to_string())
            .spawn(move || {
                let stdin = io::stdin();
                let mut lock = stdin.lock();
                loop {
                    let mut line = String::new();
                    match lock.read_line(&mut line) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                    }
                }
            })
            .context("spawn operator input reader")?;
        Ok(Self::from_receiver(rx))
    }

    pub fn from_receiver(rx: Receiver<String>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        let rx = self.rx.lock().map_err(|_| RecvTimeoutError::Disconnected)?;
        rx.recv_timeout(timeout)
    }
}

/// Runs an agent as a child process in the repository.
///
/// The prompt is written to the child's stdin followed by a newline. Output is
/// echoed live and the last lines are kept for failure analysis.
pub struct ProcessAgent {
    spec: AgentSpec,
    workdir: PathBuf,
    extra_args: Vec<String>,
    tail_lines: usize,
    sentinels: ExitSentinels,
    interrupt: InterruptFlag,
    input: Option<OperatorInput>,
    echo: bool,
    terminate_grace: Duration,
}

impl ProcessAgent {
    pub fn new(
        spec: AgentSpec,
        workdir: impl Into<PathBuf>,
        interrupt: InterruptFlag,
    ) -> Self {
        Self {
            spec,
            workdir: workdir.into(),
            extra_args: Vec::new(),
            tail_lines: DEFAULT_TAIL_LINES,
            sentinels: ExitSentinels::default(),
            interrupt,
            input: None,
            echo: true,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_tail_lines(mut self, lines: usize) -> Self {
        self.tail_lines = lines.max(1);
        self
    }

    pub fn with_sentinels(mut self, sentinels: ExitSentinels) -> Self {
        self.sentinels = sentinels;
        self
    }

    pub fn with_operator_input(mut self, input: OperatorInput) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    fn not_launched(&self, program: &str, started: Instant) -> AgentRun {
        AgentRun {
            exit_code: self.sentinels.command_not_found,
            output_tail: vec![format!("{program}: command not found")],
            interrupted: false,
            duration: started.elapsed(),
        }
    }
}

impl AgentRunner for ProcessAgent {
    fn name(&self) -> &str {
        &self.spec.name
    }

    #[instrument(skip_all, fields(agent = %self.spec.name))]
    fn launch(&self, prompt: &str) -> Result<AgentRun> {
        let started = Instant::now();
        let (program, args) = self
            .spec
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent '{}' has an empty command", self.spec.name))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .args(&self.extra_args)
            .envs(&self.spec.env)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(program = %program, "launching agent");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(program = %program, "agent executable not found");
                return Ok(self.not_launched(program, started));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("spawn agent '{}'", self.spec.name));
            }
        };

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(self.tail_lines)));
        let drains = [
            spawn_drain(stdout, Arc::clone(&tail), self.tail_lines, self.echo.then_some(Echo::Stdout)),
            spawn_drain(stderr, Arc::clone(&tail), self.tail_lines, self.echo.then_some(Echo::Stderr)),
        ];

        let done = Arc::new(AtomicBool::new(false));
        let feeder = spawn_feeder(
            prompt.to_string(),
            self.input.clone(),
            stdin,
            Arc::clone(&done),
        );

        let mut interrupted = false;
        let status = loop {
            if let Some(status) = child.wait_timeout(POLL_INTERVAL).context("wait for agent")? {
                break status;
            }
            if self.interrupt.is_triggered() {
                interrupted = true;
                info!("interrupt received, stopping agent");
                match child
                    .wait_timeout(self.terminate_grace)
                    .context("wait for agent after interrupt")?
                {
                    Some(status) => break status,
                    None => {
                        warn!("agent ignored interrupt, killing");
                        child.kill().context("kill agent")?;
                        break child.wait().context("wait agent after kill")?;
                    }
                }
            }
        };

        done.store(true, Ordering::SeqCst);
        if feeder.join().is_err() {
            warn!("stdin feeder panicked");
        }
        for handle in drains {
            if handle.join().is_err() {
                warn!("output drain panicked");
            }
        }

        let exit_code = if interrupted {
            self.sentinels.interrupted
        } else {
            exit_code_of(&status)
        };
        let output_tail = match tail.lock() {
            Ok(lines) => lines.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        };
        debug!(exit_code, interrupted, "agent finished");
        Ok(AgentRun {
            exit_code,
            output_tail,
            interrupted,
            duration: started.elapsed(),
        })
    }
}

fn write_prompt(stdin: &mut ChildStdin, prompt: &str) -> io::Result<()> {
    stdin.write_all(prompt.as_bytes())?;
    stdin.write_all(b"\n")?;
    stdin.flush()
}

#[derive(Debug, Clone, Copy)]
enum Echo {
    Stdout,
    Stderr,
}

fn spawn_drain<R: Read + Send + 'static>(
    reader: R,
    tail: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
    echo: Option<Echo>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            match echo {
                Some(Echo::Stdout) => {
                    let mut out = io::stdout().lock();
                    let _ = out.write_all(&line).and_then(|()| out.flush());
                }
                Some(Echo::Stderr) => {
                    let mut out = io::stderr().lock();
                    let _ = out.write_all(&line).and_then(|()| out.flush());
                }
                None => {}
            }
            let text = String::from_utf8_lossy(&line).trim_end().to_string();
            if let Ok(mut lines) = tail.lock() {
                if lines.len() == capacity {
                    lines.pop_front();
                }
                lines.push_back(text);
            }
        }
    })
}

/// Write the prompt, then forward operator lines until the child exits.
fn spawn_feeder(
    prompt: String,
    input: Option<OperatorInput>,
    mut stdin: ChildStdin,
    done: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        if let Err(err) = write_prompt(&mut stdin, &prompt) {
            warn!(err = %err, "failed to deliver prompt to agent");
            return;
        }
        let Some(input) = input else {
            return;
        };
        while !done.load(Ordering::SeqCst) {
            match input.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    if stdin
                        .write_all(line.as_bytes())
                        .and_then(|()| stdin.flush())
                        .is_err()
                    {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_agent(script: &str) -> AgentSpec {
        AgentSpec {
            name: "sh".to_string(),
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            dependencies: vec!["sh".to_string()],
            env: BTreeMap::new(),
        }
    }

    fn runner(script: &str, workdir: &std::path::Path) -> ProcessAgent {
        ProcessAgent::new(sh_agent(script), workdir, InterruptFlag::new()).with_echo(false)
    }

    #[test]
    fn prompt_is_delivered_on_stdin() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = runner("read line; echo got:$line", temp.path())
            .launch("hello agent")
            .expect("launch");
        assert_eq!(run.exit_code, 0);
        assert_eq!(run.output_tail, vec!["got:hello agent".to_string()]);
        assert!(!run.interrupted);
    }

    #[test]
    fn exit_code_and_stderr_are_captured() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = runner("echo oops 1>&2; exit 3", temp.path())
            .launch("p")
            .expect("launch");
        assert_eq!(run.exit_code, 3);
        assert_eq!(run.output_tail, vec!["oops".to_string()]);
    }

    #[test]
    fn tail_keeps_last_lines_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = runner("i=1; while [ $i -le 100 ]; do echo line$i; i=$((i+1)); done", temp.path())
            .with_tail_lines(5)
            .launch("p")
            .expect("launch");
        assert_eq!(run.output_tail.len(), 5);
        assert_eq!(run.output_tail.first().map(String::as_str), Some("line96"));
        assert_eq!(run.output_tail.last().map(String::as_str), Some("line100"));
    }

    #[test]
    fn runs_in_workdir_with_extra_args_and_env() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut spec = sh_agent("echo $MISSION_FLAG $0 $(basename $(pwd))");
        spec.env.insert("MISSION_FLAG".to_string(), "on".to_string());
        let workdir_name = temp
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .expect("name")
            .to_string();
        let run = ProcessAgent::new(spec, temp.path(), InterruptFlag::new())
            .with_echo(false)
            .with_extra_args(vec!["extra".to_string()])
            .launch("p")
            .expect("launch");
        assert_eq!(run.output_tail, vec![format!("on extra {workdir_name}")]);
    }

    #[test]
    fn missing_executable_maps_to_command_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec = AgentSpec::new("ghost", &["definitely-not-an-agent-xyz"], &[]);
        let run = ProcessAgent::new(spec, temp.path(), InterruptFlag::new())
            .launch("p")
            .expect("launch");
        assert_eq!(run.exit_code, 127);
        assert!(run.output_tail[0].contains("command not found"));
    }

    #[test]
    fn interrupt_stops_agent_with_sentinel_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let interrupt = InterruptFlag::new();
        interrupt.trigger();
        let started = Instant::now();
        let run = ProcessAgent::new(sh_agent("exec sleep 30"), temp.path(), interrupt)
            .with_echo(false)
            .with_terminate_grace(Duration::from_millis(100))
            .launch("p")
            .expect("launch");
        assert_eq!(run.exit_code, 130);
        assert!(run.interrupted);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn oversized_prompt_does_not_block_agent_that_ignores_stdin() {
        let temp = tempfile::tempdir().expect("tempdir");
        let prompt = "x".repeat(1 << 20);
        let run = runner("echo ignoring; exit 3", temp.path())
            .launch(&prompt)
            .expect("launch");
        assert_eq!(run.exit_code, 3);
        assert_eq!(run.output_tail, vec!["ignoring".to_string()]);
    }

    #[test]
    fn interrupt_reaches_agent_with_undelivered_prompt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let interrupt = InterruptFlag::new();
        interrupt.trigger();
        let started = Instant::now();
        let run = ProcessAgent::new(sh_agent("exec sleep 30"), temp.path(), interrupt)
            .with_echo(false)
            .with_terminate_grace(Duration::from_millis(100))
            .launch(&"x".repeat(1 << 20))
            .expect("launch");
        assert_eq!(run.exit_code, 130);
        assert!(run.interrupted);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn operator_input_is_forwarded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (tx, rx) = mpsc::channel();
        tx.send("from operator\n".to_string()).expect("send");
        let run = runner("read prompt; read extra; echo $extra", temp.path())
            .with_operator_input(OperatorInput::from_receiver(rx))
            .launch("p")
            .expect("launch");
        assert_eq!(run.output_tail, vec!["from operator".to_string()]);
    }

    #[test]
    fn registry_has_builtins_and_config_overrides() {
        let mut configured = BTreeMap::new();
        configured.insert(
            "aider".to_string(),
            AgentConfig {
                command: vec!["aider".to_string(), "--yes".to_string()],
                ..AgentConfig::default()
            },
        );
        configured.insert(
            "custom".to_string(),
            AgentConfig {
                command: vec!["my-agent".to_string()],
                dependencies: vec!["my-agent".to_string()],
                ..AgentConfig::default()
            },
        );
        let registry = AgentRegistry::from_config(&configured);
        assert_eq!(
            registry.names(),
            vec!["aider", "custom", "gemini-cli", "qwen"]
        );
        assert_eq!(
            registry.get("gemini-cli").expect("gemini").command,
            vec!["npx", "@google/gemini-cli", "--yolo"]
        );
        assert_eq!(
            registry.get("aider").expect("aider").command,
            vec!["aider", "--yes"]
        );
        let err = registry.get("nope").expect_err("unknown");
        assert!(err.to_string().contains("unknown agent 'nope'"));
    }

    #[test]
    fn missing_dependencies_are_listed() {
        let spec = AgentSpec::new("x", &["sh"], &["sh", "definitely-missing-xyz"]);
        assert_eq!(spec.missing_dependencies(), vec!["definitely-missing-xyz".to_string()]);
    }
}
