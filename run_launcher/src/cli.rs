//! Command-line interface definitions using clap derive API.

use crate::env_type::EnvType;
use crate::lifecycle::LaunchOptions;
use clap::Parser;
use std::path::PathBuf;

fn parse_penalty(value: &str) -> Result<f64, String> {
    let penalty: f64 = value
        .parse()
        .map_err(|e| format!("'{}' is not a number: {}", value, e))?;
    if !penalty.is_finite() {
        return Err(format!("impact penalty must be finite, got {}", value));
    }
    Ok(penalty)
}

/// Prepare a run directory and launch a training job
#[derive(Debug, Parser)]
#[command(name = "start-training")]
#[command(about = "Prepare a run directory and launch a training job")]
#[command(version)]
pub struct StartTrainingCli {
    /// Directory in which to store this run's data; resumes the active job when omitted
    pub data_dir: Option<PathBuf>,

    /// Install system and library dependencies first
    #[arg(long)]
    pub install: bool,

    /// Shut the host down after training finishes
    #[arg(long)]
    pub shutdown: bool,

    /// Port for the metrics-visualization server; no server when omitted or 0
    #[arg(long)]
    pub port: Option<u16>,

    /// Impact penalty coefficient; repeat to train once per value
    #[arg(long = "impact-penalty", value_parser = parse_penalty)]
    pub impact_penalty: Vec<f64>,

    /// Environment type; inferred from the run directory name when omitted
    #[arg(long, value_enum)]
    pub env_type: Option<EnvType>,

    /// Additional settings file layered over the defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the effective settings and exit
    #[arg(long)]
    pub print_config: bool,
}

impl StartTrainingCli {
    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            data_dir: self.data_dir.clone(),
            install: self.install,
            shutdown: self.shutdown,
            port: self.port,
            impact_penalties: self.impact_penalty.clone(),
            env_type: self.env_type,
        }
    }
}

/// Open a port-forwarded shell on a cloud instance and re-attach to tmux
#[derive(Debug, Parser)]
#[command(name = "remote-attach")]
#[command(about = "Open a port-forwarded shell on an instance and re-attach to its tmux session")]
#[command(version)]
pub struct RemoteAttachCli {
    /// Instance to connect to
    pub instance_name: String,

    /// tmux session to re-attach; the most recent session when omitted
    pub job_name: Option<String>,

    /// Local port forwarded to the remote visualization port
    #[arg(long)]
    pub port: Option<String>,

    /// Additional settings file layered over the defaults
    #[arg(long)]
    pub config: Option<PathBuf>,
}
