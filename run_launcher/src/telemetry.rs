//! Logging initialization: console-only for short-lived tools, console plus
//! per-run log file for training launches.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

/// Target used for every record that originates from the training framework.
pub const TRAINING_TARGET: &str = "training";

fn filter(default_level: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?)
}

/// Initialize console logging for tools that never touch a run directory.
pub fn init_console(default_level: &str) -> Result<()> {
    let subscriber = Registry::default()
        .with(filter(default_level)?)
        .with(fmt::layer().compact().with_target(false));

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Create the log file if it does not exist yet, without truncating it.
pub fn ensure_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {:?}", path))
}

/// Attach a compact console sink and a timestamped, source-located file sink.
///
/// Both sinks receive every record, including the ones the trainer bridge
/// re-emits under [`TRAINING_TARGET`]. If another subscriber is already
/// installed (as happens under test harnesses) the existing one is kept.
pub fn init_run_logging(log_file: &Path, default_level: &str) -> Result<()> {
    let file = ensure_log_file(log_file)?;

    let console = fmt::layer()
        .compact()
        .without_time()
        .with_target(false)
        .with_filter(filter(default_level)?);

    let file_sink = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(filter(default_level)?);

    let subscriber = Registry::default().with(console).with(file_sink);

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!("Global subscriber already installed; run log {:?} not attached", log_file);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn ensure_log_file_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.log");
        ensure_log_file(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn ensure_log_file_keeps_existing_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.log");
        std::fs::write(&path, "previous run\n").unwrap();

        let mut file = ensure_log_file(&path).unwrap();
        writeln!(file, "next run").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "previous run\nnext run\n");
    }
}
