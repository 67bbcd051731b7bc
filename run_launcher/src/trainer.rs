//! Boundary to the external training framework.
//!
//! A [`TrainingJob`] carries everything the framework needs for one run.
//! [`SubprocessTrainer`] hands it to a bridge process over a line-delimited
//! JSON protocol on the child's stdin/stdout:
//!
//! ```text
//! launcher -> trainer  {"type":"job","env_type":..,"logdir":..,"total_steps":..,"num_env":..}
//! trainer  -> launcher {"type":"progress","steps":N}
//! launcher -> trainer  {"type":"schedule","penalty":x,"min_performance":y|null}
//! trainer  -> launcher {"type":"next_level"}
//! launcher -> trainer  {"type":"level","set":..,"index":..}
//! trainer  -> launcher {"type":"done","steps":N}
//! ```
//!
//! Anything else the trainer prints is forwarded to the log under the
//! `training` target.

use crate::env_type::EnvType;
use crate::levels::{GlobalStepCounter, LevelSource, StepCounter};
use crate::plan::TrainingPlan;
use crate::runner::CommandSpec;
use crate::schedule::Schedule;
use crate::telemetry::TRAINING_TARGET;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// One training run as handed to the framework.
pub struct TrainingJob {
    pub env_type: EnvType,
    pub logdir: PathBuf,
    pub penalty: Box<dyn Schedule>,
    pub min_performance: Option<Box<dyn Schedule>>,
    pub levels: LevelSource,
    pub total_steps: u64,
    pub num_env: Option<usize>,
    /// Progress reported by the framework; level sequencers read it.
    pub counter: GlobalStepCounter,
}

impl TrainingJob {
    pub fn from_plan(plan: &TrainingPlan, logdir: impl Into<PathBuf>) -> Self {
        let counter = GlobalStepCounter::new();
        Self {
            env_type: plan.env_type,
            logdir: logdir.into(),
            penalty: Box::new(plan.penalty),
            min_performance: plan
                .min_performance
                .map(|ramp| Box::new(ramp) as Box<dyn Schedule>),
            levels: plan.level_source(&counter),
            total_steps: plan.total_steps,
            num_env: plan.num_env,
            counter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrainingSummary {
    pub steps_completed: u64,
}

/// The external training loop.
#[async_trait]
pub trait Trainer: Send + Sync {
    fn name(&self) -> &str;
    async fn train(&self, job: TrainingJob) -> Result<TrainingSummary>;
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LauncherMessage<'a> {
    Job {
        env_type: EnvType,
        logdir: &'a Path,
        total_steps: u64,
        num_env: Option<usize>,
    },
    Schedule {
        penalty: f64,
        min_performance: Option<f64>,
    },
    Level {
        set: String,
        index: u64,
    },
    LevelsExhausted,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TrainerMessage {
    Progress { steps: u64 },
    NextLevel,
    Done { steps: u64 },
}

/// What to do with one line of trainer output.
#[derive(Debug, PartialEq)]
pub enum BridgeEvent {
    /// Write this line back to the trainer.
    Reply(String),
    /// The trainer reported completion.
    Finished,
    /// Not a protocol message; forward to the log.
    Passthrough,
}

/// Launcher side of the trainer protocol, independent of any process.
pub struct Bridge {
    job: TrainingJob,
    finished: bool,
}

impl Bridge {
    pub fn new(job: TrainingJob) -> Self {
        Self {
            job,
            finished: false,
        }
    }

    /// First line sent to the trainer.
    pub fn job_header(&self) -> Result<String> {
        let msg = LauncherMessage::Job {
            env_type: self.job.env_type,
            logdir: &self.job.logdir,
            total_steps: self.job.total_steps,
            num_env: self.job.num_env,
        };
        Ok(serde_json::to_string(&msg)?)
    }

    pub fn handle_line(&mut self, line: &str) -> Result<BridgeEvent> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return Ok(BridgeEvent::Passthrough);
        }
        let msg: TrainerMessage = match serde_json::from_str(trimmed) {
            Ok(msg) => msg,
            Err(_) => return Ok(BridgeEvent::Passthrough),
        };

        match msg {
            TrainerMessage::Progress { steps } => {
                self.job.counter.set(steps);
                let steps = self.job.counter.num_steps();
                let reply = LauncherMessage::Schedule {
                    penalty: self.job.penalty.value_at(steps),
                    min_performance: self
                        .job
                        .min_performance
                        .as_ref()
                        .map(|s| s.value_at(steps)),
                };
                Ok(BridgeEvent::Reply(serde_json::to_string(&reply)?))
            }
            TrainerMessage::NextLevel => {
                let reply = match self.job.levels.next() {
                    Some(level) => LauncherMessage::Level {
                        set: level.set,
                        index: level.index,
                    },
                    None => LauncherMessage::LevelsExhausted,
                };
                Ok(BridgeEvent::Reply(serde_json::to_string(&reply)?))
            }
            TrainerMessage::Done { steps } => {
                self.job.counter.set(steps);
                self.finished = true;
                Ok(BridgeEvent::Finished)
            }
        }
    }

    pub fn summary(&self) -> TrainingSummary {
        TrainingSummary {
            steps_completed: self.job.counter.num_steps(),
        }
    }

    pub fn finished(&self) -> bool {
        self.finished
    }
}

/// Runs the training framework as a child process speaking the bridge protocol.
pub struct SubprocessTrainer {
    command: CommandSpec,
}

impl SubprocessTrainer {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Trainer for SubprocessTrainer {
    fn name(&self) -> &str {
        &self.command.program
    }

    #[instrument(skip(self, job), fields(env_type = %job.env_type, logdir = ?job.logdir))]
    async fn train(&self, job: TrainingJob) -> Result<TrainingSummary> {
        std::fs::create_dir_all(&job.logdir)
            .with_context(|| format!("Failed to create log directory {:?}", job.logdir))?;

        let mut bridge = Bridge::new(job);

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args);
        if let Some(dir) = &self.command.cwd {
            cmd.current_dir(dir);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn trainer `{}`", self.command))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Trainer stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Trainer stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("Trainer stderr was not captured"))?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: TRAINING_TARGET, "{}", line);
            }
        });

        let header = bridge.job_header()?;
        debug!("Sending job header: {}", header);
        write_line(&mut stdin, &header).await?;

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .context("Failed to read trainer output")?
        {
            match bridge.handle_line(&line)? {
                BridgeEvent::Reply(reply) => write_line(&mut stdin, &reply).await?,
                BridgeEvent::Finished => debug!("Trainer reported completion"),
                BridgeEvent::Passthrough => info!(target: TRAINING_TARGET, "{}", line),
            }
        }
        drop(stdin);

        let status = child.wait().await.context("Failed to wait for trainer")?;
        let _ = stderr_task.await;

        if !status.success() {
            bail!("Trainer exited with {}", status);
        }
        if !bridge.finished() {
            warn!("Trainer exited without reporting completion");
        }
        Ok(bridge.summary())
    }
}

async fn write_line(stdin: &mut tokio::process::ChildStdin, line: &str) -> Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}
