//! Layered launcher configuration with environment variable support and validation.

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Where run bookkeeping lives and how run directories are treated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Directory holding the marker file, requirement manifests and the
    /// extension build descriptor. `None` resolves to the executable's directory.
    pub workspace_dir: Option<PathBuf>,
    pub marker_file_name: String,
    /// Run directories whose base name starts with this are overwritten without asking.
    pub temp_prefix: String,
    pub log_file_name: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workspace_dir: None,
            marker_file_name: "active_job.txt".to_string(),
            temp_prefix: "tmp".to_string(),
            log_file_name: "training.log".to_string(),
        }
    }
}

/// Dependency installation performed under `--install`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    pub use_sudo: bool,
    pub system_package: String,
    /// Requirement manifests, relative to the workspace directory.
    pub requirement_files: Vec<PathBuf>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            use_sudo: true,
            system_package: "ffmpeg".to_string(),
            requirement_files: vec![
                PathBuf::from("requirements.txt"),
                PathBuf::from("training/requirements.txt"),
            ],
        }
    }
}

/// Native extension build. The workspace directory is appended as the final argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec![
                "setup.py".to_string(),
                "build_ext".to_string(),
                "--build-lib".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationConfig {
    pub program: String,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            program: "tensorboard".to_string(),
        }
    }
}

/// Command that runs the external training loop bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-m".to_string(), "training.bridge".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub delay_minutes: u32,
    pub shell: String,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            delay_minutes: 2,
            shell: "bash".to_string(),
        }
    }
}

/// Remote shell used by `remote-attach`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub program: String,
    pub args: Vec<String>,
    pub remote_port: u16,
    pub default_local_port: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            program: "gcloud".to_string(),
            args: vec!["compute".to_string(), "ssh".to_string()],
            remote_port: 6006,
            default_local_port: "6006".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Main settings structure with all configuration sections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub jobs: JobsConfig,
    pub install: InstallConfig,
    pub build: BuildConfig,
    pub visualization: VisualizationConfig,
    pub trainer: TrainerConfig,
    pub shutdown: ShutdownConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load settings from the embedded defaults, an optional local
    /// `run_launcher` file, an optional explicit file and `RUNLAUNCH__*`
    /// environment variables, in increasing priority.
    pub fn load(extra: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::from_str(
                include_str!("../config.toml"),
                FileFormat::Toml,
            ))
            .add_source(File::with_name("run_launcher").required(false));

        if let Some(path) = extra {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("RUNLAUNCH")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("install.requirement_files")
                    .with_list_parse_key("build.args")
                    .with_list_parse_key("trainer.args")
                    .with_list_parse_key("remote.args")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration sources")?;

        let settings: Settings = config
            .try_deserialize()
            .context("Failed to deserialize settings")?;
        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings for consistency
    pub fn validate(&self) -> Result<()> {
        if self.jobs.marker_file_name.trim().is_empty() {
            return Err(anyhow!("jobs.marker_file_name cannot be empty"));
        }
        if self.jobs.log_file_name.trim().is_empty() {
            return Err(anyhow!("jobs.log_file_name cannot be empty"));
        }
        if self.jobs.temp_prefix.is_empty() {
            return Err(anyhow!("jobs.temp_prefix cannot be empty"));
        }
        if self.build.program.is_empty() {
            return Err(anyhow!("build.program cannot be empty"));
        }
        if self.trainer.program.is_empty() {
            return Err(anyhow!("trainer.program cannot be empty"));
        }
        if self.remote.program.is_empty() {
            return Err(anyhow!("remote.program cannot be empty"));
        }
        if self.remote.remote_port == 0 {
            return Err(anyhow!("remote.remote_port cannot be 0"));
        }
        self.remote
            .default_local_port
            .parse::<u16>()
            .map_err(|e| anyhow!("remote.default_local_port is not a port number: {}", e))?;

        if self.install.requirement_files.len() != 2 {
            warn!(
                "Expected two requirement manifests, found {}",
                self.install.requirement_files.len()
            );
        }
        if let Some(dir) = &self.jobs.workspace_dir {
            if !dir.is_dir() {
                warn!("Workspace directory does not exist: {:?}", dir);
            }
        }

        Ok(())
    }

    /// Directory containing the marker file and the training sources.
    pub fn workspace_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.jobs.workspace_dir {
            return Ok(dir.clone());
        }
        let exe = std::env::current_exe().context("Failed to locate the running executable")?;
        exe.parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("Executable path {:?} has no parent directory", exe))
    }

    /// Absolute location of the active-job marker.
    pub fn marker_path(&self) -> Result<PathBuf> {
        Ok(self.workspace_dir()?.join(&self.jobs.marker_file_name))
    }

    /// Render the effective settings as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render settings as TOML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_match_struct_defaults() {
        let settings = Settings::load(None).unwrap();
        let defaults = Settings::default();
        assert_eq!(settings.jobs.marker_file_name, defaults.jobs.marker_file_name);
        assert_eq!(settings.jobs.temp_prefix, "tmp");
        assert_eq!(settings.install.requirement_files, defaults.install.requirement_files);
        assert_eq!(settings.build.args, defaults.build.args);
        assert_eq!(settings.remote.remote_port, 6006);
        assert_eq!(settings.shutdown.delay_minutes, 2);
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("override.toml");
        std::fs::write(
            &path,
            "[jobs]\ntemp_prefix = \"scratch\"\n\n[shutdown]\ndelay_minutes = 10\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.jobs.temp_prefix, "scratch");
        assert_eq!(settings.shutdown.delay_minutes, 10);
        assert_eq!(settings.jobs.log_file_name, "training.log");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn rejects_bad_local_port() {
        let mut settings = Settings::default();
        settings.remote.default_local_port = "http".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn marker_is_sibling_of_workspace() {
        let mut settings = Settings::default();
        settings.jobs.workspace_dir = Some(PathBuf::from("/srv/safety"));
        assert_eq!(
            settings.marker_path().unwrap(),
            PathBuf::from("/srv/safety/active_job.txt")
        );
    }

    #[test]
    fn renders_as_toml() {
        let rendered = Settings::default().to_toml().unwrap();
        assert!(rendered.contains("[jobs]"));
        assert!(rendered.contains("marker_file_name = \"active_job.txt\""));
    }
}
