//! Entry point for `remote-attach`.

use anyhow::Result;
use clap::Parser;
use run_launcher::{
    cli::RemoteAttachCli, remote::RemoteAttach, runner::TokioRunner, settings::Settings, telemetry,
};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = RemoteAttachCli::parse();
    let settings = Settings::load(args.config.as_deref())?;
    telemetry::init_console(&settings.logging.level)?;

    let port = args
        .port
        .as_deref()
        .unwrap_or(&settings.remote.default_local_port);
    let attach = RemoteAttach::new(args.instance_name, args.job_name, port)?;

    // Exit status is the remote shell's; a signal death reports 1.
    let code = attach.run(&TokioRunner, &settings.remote).await?;
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
