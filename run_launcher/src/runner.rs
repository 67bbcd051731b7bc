//! Command runner abstraction for the external tools the launcher drives.
//!
//! `CommandRunner` is the seam every shell-out goes through. `TokioRunner`
//! is the production implementation. `MockRunner` records calls and returns
//! preset exit codes so lifecycle code can be exercised without side effects.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::process::{Child, Command};
use tracing::debug;

/// A program invocation: program, arguments, optional working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Wrap in `sudo` when requested.
    pub fn elevated(self, sudo: bool) -> Self {
        if !sudo {
            return self;
        }
        let CommandSpec { program, args, cwd } = self;
        CommandSpec {
            program: "sudo".to_string(),
            args: std::iter::once(program).chain(args).collect(),
            cwd,
        }
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A process left running in the background until explicitly stopped.
#[async_trait]
pub trait BackgroundProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Forcefully terminate and reap the process.
    async fn terminate(&mut self) -> Result<()>;

    /// Send a kill signal without waiting; usable from `Drop`.
    fn start_kill(&mut self);
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion with inherited stdio and return the exit code.
    /// A process killed by a signal reports `-1`.
    async fn run(&self, cmd: &CommandSpec) -> Result<i32>;

    /// Start a detached background process.
    fn spawn_background(&self, cmd: &CommandSpec) -> Result<Box<dyn BackgroundProcess>>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioRunner;

#[async_trait]
impl CommandRunner for TokioRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<i32> {
        debug!("Running: {}", cmd);
        let status = cmd
            .to_command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("Failed to execute `{}`", cmd))?;
        Ok(status.code().unwrap_or(-1))
    }

    fn spawn_background(&self, cmd: &CommandSpec) -> Result<Box<dyn BackgroundProcess>> {
        debug!("Spawning background process: {}", cmd);
        let child = cmd
            .to_command()
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn `{}`", cmd))?;
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl BackgroundProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self) -> Result<()> {
        // Already exited: nothing to kill.
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child
            .kill()
            .await
            .map_err(|e| anyhow!("Failed to kill background process: {}", e))
    }

    fn start_kill(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Test-double runner that records commands and returns pre-configured exit codes.
#[derive(Clone, Default)]
pub struct MockRunner {
    inner: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    responses: Mutex<VecDeque<Result<i32, String>>>,
    commands: Mutex<Vec<CommandSpec>>,
    spawned: Mutex<Vec<MockProcessHandle>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses consumed in order by `run`; once exhausted every call succeeds.
    pub fn with_responses(responses: Vec<Result<i32, String>>) -> Self {
        let runner = Self::new();
        if let Ok(mut queue) = runner.inner.responses.lock() {
            queue.extend(responses);
        }
        runner
    }

    /// Every command seen by `run` and `spawn_background`, in order.
    pub fn executed_commands(&self) -> Vec<CommandSpec> {
        self.inner
            .commands
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Handles of every background process started so far.
    pub fn spawned(&self) -> Vec<MockProcessHandle> {
        self.inner
            .spawned
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn record(&self, cmd: &CommandSpec) {
        if let Ok(mut commands) = self.inner.commands.lock() {
            commands.push(cmd.clone());
        }
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<i32> {
        self.record(cmd);
        let next = self
            .inner
            .responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        match next {
            Some(Ok(code)) => Ok(code),
            Some(Err(msg)) => Err(anyhow!(msg)),
            None => Ok(0),
        }
    }

    fn spawn_background(&self, cmd: &CommandSpec) -> Result<Box<dyn BackgroundProcess>> {
        self.record(cmd);
        let handle = MockProcessHandle {
            command: cmd.clone(),
            killed: Arc::new(AtomicBool::new(false)),
        };
        if let Ok(mut spawned) = self.inner.spawned.lock() {
            spawned.push(handle.clone());
        }
        Ok(Box::new(MockProcess { handle }))
    }
}

/// Observer side of a background process started through `MockRunner`.
#[derive(Debug, Clone)]
pub struct MockProcessHandle {
    pub command: CommandSpec,
    killed: Arc<AtomicBool>,
}

impl MockProcessHandle {
    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

struct MockProcess {
    handle: MockProcessHandle,
}

#[async_trait]
impl BackgroundProcess for MockProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn terminate(&mut self) -> Result<()> {
        self.handle.killed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn start_kill(&mut self) {
        self.handle.killed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevated_prepends_sudo() {
        let cmd = CommandSpec::new("apt-get")
            .args(["install", "ffmpeg", "--yes"])
            .elevated(true);
        assert_eq!(cmd.program, "sudo");
        assert_eq!(cmd.args, vec!["apt-get", "install", "ffmpeg", "--yes"]);
        assert_eq!(cmd.to_string(), "sudo apt-get install ffmpeg --yes");
    }

    #[test]
    fn elevated_false_is_identity() {
        let cmd = CommandSpec::new("pip3").arg("install");
        assert_eq!(cmd.clone().elevated(false), cmd);
    }

    #[tokio::test]
    async fn mock_runner_records_commands() {
        let runner = MockRunner::with_responses(vec![Ok(0), Ok(3)]);
        assert_eq!(runner.run(&CommandSpec::new("echo").arg("hello")).await.unwrap(), 0);
        assert_eq!(runner.run(&CommandSpec::new("echo").arg("world")).await.unwrap(), 3);
        let cmds = runner.executed_commands();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].to_string(), "echo hello");
        assert_eq!(cmds[1].to_string(), "echo world");
    }

    #[tokio::test]
    async fn mock_runner_defaults_to_success() {
        let runner = MockRunner::new();
        assert_eq!(runner.run(&CommandSpec::new("anything")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mock_runner_propagates_errors() {
        let runner = MockRunner::with_responses(vec![Err("no such file".into())]);
        let err = runner.run(&CommandSpec::new("missing")).await.unwrap_err();
        assert!(err.to_string().contains("no such file"));
    }

    #[tokio::test]
    async fn mock_background_process_tracks_termination() {
        let runner = MockRunner::new();
        let mut process = runner
            .spawn_background(&CommandSpec::new("tensorboard"))
            .unwrap();
        let handle = runner.spawned().pop().unwrap();
        assert!(!handle.was_killed());
        process.terminate().await.unwrap();
        assert!(handle.was_killed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tokio_runner_reports_exit_code() {
        let code = TokioRunner
            .run(&CommandSpec::new("sh").args(["-c", "exit 7"]))
            .await
            .unwrap();
        assert_eq!(code, 7);
    }

    #[tokio::test]
    async fn tokio_runner_fails_on_missing_program() {
        let result = TokioRunner
            .run(&CommandSpec::new("definitely-not-a-real-program-xyz"))
            .await;
        assert!(result.is_err());
    }
}
