//! Training-job lifecycle: from run directory resolution through dispatch to
//! cleanup and optional host shutdown.

use crate::env_type::EnvType;
use crate::job::{
    apply_conflict_choice, choose_conflict_action, ensure_run_dir, resolve_run_dir,
    ActiveJobMarker, ConflictChoice,
};
use crate::plan::{penalty_dir_name, TrainingPlan};
use crate::provision;
use crate::runner::{CommandRunner, CommandSpec};
use crate::settings::Settings;
use crate::telemetry;
use crate::trainer::{Trainer, TrainingJob, TrainingSummary};
use crate::visualization::VisualizationServer;
use anyhow::{anyhow, Context, Result};
use futures::FutureExt;
use std::any::Any;
use std::io::{BufRead, Write};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Per-invocation options, as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub data_dir: Option<PathBuf>,
    pub install: bool,
    pub shutdown: bool,
    pub port: Option<u16>,
    pub impact_penalties: Vec<f64>,
    pub env_type: Option<EnvType>,
}

impl LaunchOptions {
    /// Penalty values to train with; a single zero penalty when none were given.
    pub fn penalties(&self) -> Vec<f64> {
        if self.impact_penalties.is_empty() {
            vec![0.0]
        } else {
            self.impact_penalties.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Cleanup ran. `failed` is set when training raised an error.
    Completed { failed: bool },
    /// The operator declined to touch an existing run directory.
    Aborted,
}

/// Releases everything a run holds, whichever way it ends.
///
/// `finish` is the normal path. `Drop` is a synchronous fallback for early
/// returns and panics that skip it.
pub struct RunGuard {
    marker: ActiveJobMarker,
    visualization: Option<VisualizationServer>,
    finished: bool,
}

impl RunGuard {
    pub fn new(marker: ActiveJobMarker) -> Self {
        Self {
            marker,
            visualization: None,
            finished: false,
        }
    }

    pub fn attach_visualization(&mut self, server: VisualizationServer) {
        self.visualization = Some(server);
    }

    pub async fn finish(mut self) {
        if let Some(server) = self.visualization.take() {
            server.stop().await;
        }
        if let Err(e) = self.marker.clear() {
            warn!("{:#}", e);
        }
        self.finished = true;
    }

    /// Release without clearing the marker, leaving the job resumable.
    pub fn keep_marker(mut self) {
        self.finished = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(server) = self.visualization.as_mut() {
            server.start_kill();
        }
        let _ = self.marker.clear();
    }
}

/// Drives one training job per invocation.
pub struct Launcher {
    settings: Settings,
    workspace_dir: PathBuf,
    marker_path: PathBuf,
    runner: Arc<dyn CommandRunner>,
    trainer: Arc<dyn Trainer>,
}

impl Launcher {
    pub fn new(
        settings: Settings,
        runner: Arc<dyn CommandRunner>,
        trainer: Arc<dyn Trainer>,
    ) -> Result<Self> {
        let workspace_dir = settings.workspace_dir()?;
        let marker_path = settings.marker_path()?;
        Ok(Self {
            settings,
            workspace_dir,
            marker_path,
            runner,
            trainer,
        })
    }

    pub fn marker(&self) -> ActiveJobMarker {
        ActiveJobMarker::new(self.marker_path.clone())
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    /// Run the whole lifecycle. `input`/`output` carry the directory-conflict
    /// prompt.
    ///
    /// Returns `Err` only for failures before the run is under way, including
    /// [`crate::job::JobError::NothingToResume`]. Training failures are logged
    /// and reported as `Completed { failed: true }`.
    pub async fn launch<R: BufRead, W: Write>(
        &self,
        options: LaunchOptions,
        input: &mut R,
        output: &mut W,
    ) -> Result<LaunchOutcome> {
        let marker = self.marker();
        let run_dir = resolve_run_dir(options.data_dir.as_deref(), &marker)?;
        let mut guard = RunGuard::new(marker);

        let mut replaced = false;
        if run_dir.needs_conflict_resolution() {
            let choice = choose_conflict_action(
                &run_dir,
                &self.settings.jobs.temp_prefix,
                input,
                output,
            )?;
            if choice == ConflictChoice::Abort {
                writeln!(output, "Aborting.")?;
                guard.keep_marker();
                return Ok(LaunchOutcome::Aborted);
            }
            replaced = apply_conflict_choice(&run_dir, choice)?;
        }

        ensure_run_dir(&run_dir)?;

        let job_name = run_dir.job_name();
        let env_type = EnvType::resolve(options.env_type, &job_name);

        let log_file = run_dir.path.join(&self.settings.jobs.log_file_name);
        telemetry::init_run_logging(&log_file, &self.settings.logging.level)?;
        if !run_dir.explicit {
            info!("Resuming active job {}", run_dir.path.display());
        }
        if replaced {
            info!("Removed previous contents of {}", run_dir.path.display());
        }
        info!(
            "Starting job '{}' in {} (env type {})",
            job_name,
            run_dir.path.display(),
            env_type
        );

        if options.install {
            provision::install_dependencies(self.runner.as_ref(), &self.settings, &self.workspace_dir)
                .await;
        }
        provision::build_extensions(self.runner.as_ref(), &self.settings, &self.workspace_dir).await;

        match VisualizationServer::start(
            self.runner.as_ref(),
            &self.settings.visualization.program,
            &run_dir.path,
            options.port,
        ) {
            Ok(Some(server)) => guard.attach_visualization(server),
            Ok(None) => {}
            Err(e) => warn!("Visualization server not started: {:#}", e),
        }

        let penalties = options.penalties();
        let dispatch = AssertUnwindSafe(self.dispatch(env_type, &run_dir.path, &penalties))
            .catch_unwind();

        let result = tokio::select! {
            res = dispatch => match res {
                Ok(res) => res,
                Err(panic) => Err(anyhow!("Training panicked: {}", panic_message(panic.as_ref()))),
            },
            Ok(()) = tokio::signal::ctrl_c() => Err(anyhow!("Interrupted")),
        };

        let failed = match result {
            Ok(summaries) => {
                for (penalty, summary) in penalties.iter().zip(&summaries) {
                    info!(
                        "Penalty {:.2}: {} steps completed",
                        penalty, summary.steps_completed
                    );
                }
                false
            }
            Err(e) => {
                error!("Training failed: {:?}", e);
                true
            }
        };

        guard.finish().await;

        if options.shutdown {
            self.shutdown_host().await;
        }

        Ok(LaunchOutcome::Completed { failed })
    }

    /// Train once per penalty value, each into its own subdirectory.
    #[instrument(skip(self, run_dir, penalties), fields(trainer = self.trainer.name()))]
    pub async fn dispatch(
        &self,
        env_type: EnvType,
        run_dir: &Path,
        penalties: &[f64],
    ) -> Result<Vec<TrainingSummary>> {
        let mut summaries = Vec::with_capacity(penalties.len());
        for &penalty in penalties {
            let plan = TrainingPlan::for_env(env_type, penalty);
            let logdir = run_dir.join(penalty_dir_name(penalty));
            info!(
                "Training {} with impact penalty {:.2} for {} steps",
                env_type, penalty, plan.total_steps
            );
            let job = TrainingJob::from_plan(&plan, &logdir);
            let summary = self
                .trainer
                .train(job)
                .await
                .with_context(|| format!("Training run in {:?} failed", logdir))?;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    /// Schedule a delayed shutdown, then hand the terminal to an interactive
    /// shell so the operator can inspect the host or cancel it.
    async fn shutdown_host(&self) {
        let delay = self.settings.shutdown.delay_minutes;
        // Halting the host needs root regardless of `install.use_sudo`.
        let cmd = CommandSpec::new("shutdown")
            .args(["-h".to_string(), format!("+{}", delay)])
            .elevated(true);
        warn!("Scheduling host shutdown in {} minutes", delay);
        match self.runner.run(&cmd).await {
            Ok(0) => {}
            Ok(code) => warn!("`{}` exited with status {}", cmd, code),
            Err(e) => warn!("`{}` failed: {:#}", cmd, e),
        }

        let shell = CommandSpec::new(self.settings.shutdown.shell.as_str());
        info!("Opening `{}`; run `sudo shutdown -c` to cancel the shutdown", shell);
        if let Err(e) = self.runner.run(&shell).await {
            warn!("Interactive shell failed: {:#}", e);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;
    use async_trait::async_trait;
    use std::io::Cursor;
    use tracing_test::traced_test;

    struct InstantTrainer;

    #[async_trait]
    impl Trainer for InstantTrainer {
        fn name(&self) -> &str {
            "instant"
        }

        async fn train(&self, job: TrainingJob) -> Result<TrainingSummary> {
            Ok(TrainingSummary {
                steps_completed: job.total_steps,
            })
        }
    }

    fn launcher_in(workspace: &Path) -> Launcher {
        let mut settings = Settings::default();
        settings.jobs.workspace_dir = Some(workspace.to_path_buf());
        Launcher::new(settings, Arc::new(MockRunner::new()), Arc::new(InstantTrainer)).unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn resume_and_removal_are_logged_once_logging_is_up() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = launcher_in(tmp.path());

        let resumed = tmp.path().join("append-still-1");
        launcher.marker().write(&resumed).unwrap();
        let mut output = Vec::new();
        launcher
            .launch(LaunchOptions::default(), &mut Cursor::new(""), &mut output)
            .await
            .unwrap();
        assert!(logs_contain("Resuming active job"));

        let replaced = tmp.path().join("navigate-2");
        std::fs::create_dir_all(&replaced).unwrap();
        let options = LaunchOptions {
            data_dir: Some(replaced),
            ..Default::default()
        };
        launcher
            .launch(options, &mut Cursor::new("overwrite\n"), &mut output)
            .await
            .unwrap();
        assert!(logs_contain("Removed previous contents of"));
    }

    #[tokio::test]
    async fn shutdown_is_elevated_without_install_sudo() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.jobs.workspace_dir = Some(tmp.path().to_path_buf());
        settings.install.use_sudo = false;
        let runner = MockRunner::new();
        let launcher =
            Launcher::new(settings, Arc::new(runner.clone()), Arc::new(InstantTrainer)).unwrap();

        launcher.shutdown_host().await;

        let commands: Vec<String> = runner
            .executed_commands()
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(commands, vec!["sudo shutdown -h +2", "bash"]);
    }

    #[test]
    fn kept_marker_survives_guard() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = ActiveJobMarker::new(tmp.path().join("active_job.txt"));
        marker.write(Path::new("/runs/x")).unwrap();
        RunGuard::new(marker.clone()).keep_marker();
        assert_eq!(marker.read().unwrap(), Some(PathBuf::from("/runs/x")));
    }

    #[test]
    fn default_penalty_is_zero() {
        let options = LaunchOptions::default();
        assert_eq!(options.penalties(), vec![0.0]);
        let options = LaunchOptions {
            impact_penalties: vec![0.1, 1.0],
            ..Default::default()
        };
        assert_eq!(options.penalties(), vec![0.1, 1.0]);
    }

    #[test]
    fn guard_drop_clears_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = ActiveJobMarker::new(tmp.path().join("active_job.txt"));
        marker.write(Path::new("/runs/x")).unwrap();
        {
            let _guard = RunGuard::new(marker.clone());
        }
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn guard_finish_stops_visualization() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = ActiveJobMarker::new(tmp.path().join("active_job.txt"));
        marker.write(Path::new("/runs/x")).unwrap();

        let runner = MockRunner::new();
        let server = VisualizationServer::start(&runner, "tensorboard", tmp.path(), Some(6006))
            .unwrap()
            .unwrap();
        let mut guard = RunGuard::new(marker.clone());
        guard.attach_visualization(server);
        guard.finish().await;

        assert!(runner.spawned()[0].was_killed());
        assert!(!marker.exists());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
