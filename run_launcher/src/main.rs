//! Entry point for `start-training`.

use anyhow::Result;
use clap::Parser;
use run_launcher::{
    cli::StartTrainingCli,
    job::JobError,
    runner::{CommandSpec, TokioRunner},
    settings::Settings,
    trainer::SubprocessTrainer,
    LaunchOutcome, Launcher,
};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse command line arguments
    let args = StartTrainingCli::parse();

    // Load settings
    let settings = Settings::load(args.config.as_deref())?;
    if args.print_config {
        print!("{}", settings.to_toml()?);
        return Ok(ExitCode::SUCCESS);
    }
    let workspace_dir = settings.workspace_dir()?;

    let trainer = SubprocessTrainer::new(
        CommandSpec::new(settings.trainer.program.as_str())
            .args(settings.trainer.args.iter().cloned())
            .current_dir(&workspace_dir),
    );
    let launcher = Launcher::new(settings, Arc::new(TokioRunner), Arc::new(trainer))?;

    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();

    match launcher.launch(args.launch_options(), &mut input, &mut output).await {
        Ok(LaunchOutcome::Completed { .. }) | Ok(LaunchOutcome::Aborted) => Ok(ExitCode::SUCCESS),
        Err(e) => match e.downcast_ref::<JobError>() {
            Some(job_error) => {
                eprintln!("{}", job_error);
                Ok(ExitCode::FAILURE)
            }
            None => Err(e),
        },
    }
}
