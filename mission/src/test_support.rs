//! Test helpers: scratch git repositories and scripted agent/strategist fakes.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::io::agent::{AgentRun, AgentRunner};
use crate::io::strategist::Strategist;

/// Initialize a git repo at `root` with one commit containing `README.md`.
pub fn init_git_repo(root: &Path) {
    let git = |args: &[&str]| {
        let status = Command::new("git")
            .args(args)
            .current_dir(root)
            .status()
            .unwrap_or_else(|err| panic!("git {args:?}: {err}"));
        assert!(status.success(), "git {args:?} failed");
    };
    git(&["init", "-q"]);
    git(&["config", "user.email", "test@example.com"]);
    git(&["config", "user.name", "test"]);
    git(&["config", "commit.gpgsign", "false"]);
    fs::write(root.join("README.md"), "hello\n").expect("write README");
    git(&["add", "README.md"]);
    git(&["commit", "-q", "-m", "init"]);
}

/// Temporary git repository that lives as long as the value.
pub struct TestRepo {
    dir: tempfile::TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        init_git_repo(dir.path());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, contents: &str) -> Result<()> {
        write_file(self.path(), relative, contents)
    }
}

fn write_file(root: &Path, relative: &str, contents: &str) -> Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

/// One queued agent run and the files it writes before exiting.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRun {
    pub exit_code: i32,
    pub output: Vec<String>,
    pub interrupted: bool,
    pub writes: Vec<(String, String)>,
}

impl ScriptedRun {
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    pub fn output(mut self, lines: &[&str]) -> Self {
        self.output = lines.iter().map(|line| line.to_string()).collect();
        self
    }

    pub fn writes(mut self, relative: &str, contents: &str) -> Self {
        self.writes.push((relative.to_string(), contents.to_string()));
        self
    }

    pub fn interrupted(mut self) -> Self {
        self.interrupted = true;
        self
    }
}

/// Agent runner that replays queued runs and records the prompts it saw.
pub struct ScriptedAgent {
    root: PathBuf,
    runs: Mutex<VecDeque<ScriptedRun>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(root: impl Into<PathBuf>, runs: Vec<ScriptedRun>) -> Self {
        Self {
            root: root.into(),
            runs: Mutex::new(runs.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.runs.lock().expect("runs lock").len()
    }
}

impl AgentRunner for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    fn launch(&self, prompt: &str) -> Result<AgentRun> {
        self.prompts
            .lock()
            .map_err(|_| anyhow!("prompts lock poisoned"))?
            .push(prompt.to_string());
        let run = self
            .runs
            .lock()
            .map_err(|_| anyhow!("runs lock poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted agent run left"))?;
        for (relative, contents) in &run.writes {
            write_file(&self.root, relative, contents)?;
        }
        Ok(AgentRun {
            exit_code: run.exit_code,
            output_tail: run.output,
            interrupted: run.interrupted,
            duration: Duration::from_millis(5),
        })
    }
}

/// Strategist that replays queued responses and records the prompts it saw.
#[derive(Debug, Default)]
pub struct ScriptedStrategist {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedStrategist {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

impl Strategist for ScriptedStrategist {
    fn ask(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .map_err(|_| anyhow!("prompts lock poisoned"))?
            .push(prompt.to_string());
        self.responses
            .lock()
            .map_err(|_| anyhow!("responses lock poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted strategist response left"))
    }
}

/// Recovery response in the strategist's tagged-section format.
pub fn recovery_response(classification: &str, lessons: &str, prompt: &str) -> String {
    format!(
        "<classification>{classification}</classification>\n<lessons_learned>{lessons}</lessons_learned>\n<agent_prompt>\n{prompt}\n</agent_prompt>\n"
    )
}
