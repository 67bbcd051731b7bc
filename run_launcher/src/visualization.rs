//! Metrics-visualization server bound to a run directory.

use crate::runner::{BackgroundProcess, CommandRunner, CommandSpec};
use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};

/// A running visualization server. Not health-checked; if it dies the run
/// carries on.
pub struct VisualizationServer {
    process: Box<dyn BackgroundProcess>,
    port: u16,
}

impl VisualizationServer {
    pub fn command(program: &str, run_dir: &Path, port: u16) -> CommandSpec {
        CommandSpec::new(program)
            .arg("--logdir")
            .arg(run_dir.display().to_string())
            .arg("--port")
            .arg(port.to_string())
    }

    /// Start the server unless `port` is absent or zero.
    pub fn start(
        runner: &dyn CommandRunner,
        program: &str,
        run_dir: &Path,
        port: Option<u16>,
    ) -> Result<Option<Self>> {
        let port = match port {
            Some(port) if port != 0 => port,
            _ => return Ok(None),
        };
        let process = runner.spawn_background(&Self::command(program, run_dir, port))?;
        info!(
            "Visualization server started on port {} (pid {:?})",
            port,
            process.id()
        );
        Ok(Some(Self { process, port }))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Forcefully stop the server.
    pub async fn stop(mut self) {
        if let Err(e) = self.process.terminate().await {
            warn!("Failed to stop visualization server: {:#}", e);
        } else {
            info!("Visualization server on port {} stopped", self.port);
        }
    }

    /// Signal the server without waiting.
    pub fn start_kill(&mut self) {
        self.process.start_kill();
    }
}
