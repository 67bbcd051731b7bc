//! Port-forwarded remote shell that re-attaches to a tmux session.

use crate::runner::{CommandRunner, CommandSpec};
use crate::settings::RemoteConfig;
use anyhow::{anyhow, Result};
use tracing::info;

/// Quote `s` for a POSIX shell unless it is made of safe characters only.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '%'))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// The command run on the remote host.
pub fn tmux_attach_command(job_name: Option<&str>) -> String {
    match job_name {
        Some(name) => format!("tmux attach -t {}", shell_escape(name)),
        None => "tmux attach".to_string(),
    }
}

/// One remote-attach invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAttach {
    pub instance: String,
    pub job_name: Option<String>,
    pub local_port: u16,
}

impl RemoteAttach {
    pub fn new(instance: impl Into<String>, job_name: Option<String>, local_port: &str) -> Result<Self> {
        let instance = instance.into();
        if instance.is_empty() {
            return Err(anyhow!("Instance name cannot be empty"));
        }
        let local_port = local_port
            .parse::<u16>()
            .map_err(|e| anyhow!("Invalid local port '{}': {}", local_port, e))?;
        Ok(Self {
            instance,
            job_name,
            local_port,
        })
    }

    /// Build the full remote-shell invocation.
    pub fn command(&self, config: &RemoteConfig) -> CommandSpec {
        CommandSpec::new(config.program.as_str())
            .args(config.args.iter().cloned())
            .arg(self.instance.as_str())
            .arg("--")
            .arg("-L")
            .arg(format!("{}:localhost:{}", self.local_port, config.remote_port))
            .arg("-t")
            .arg(tmux_attach_command(self.job_name.as_deref()))
    }

    /// Single attempt; returns the remote shell's exit code unchanged.
    pub async fn run(&self, runner: &dyn CommandRunner, config: &RemoteConfig) -> Result<i32> {
        let cmd = self.command(config);
        info!("Connecting: {}", cmd);
        runner.run(&cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;

    #[test]
    fn escape_leaves_plain_names_bare() {
        assert_eq!(shell_escape("append-still_3"), "append-still_3");
        assert_eq!(shell_escape(""), "''");
        assert_eq!(shell_escape("my job"), "'my job'");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
    }

    #[test]
    fn attach_to_named_session() {
        let attach = RemoteAttach::new("gpu-1", Some("prune-spawn-2".into()), "6006").unwrap();
        let args = attach.command(&RemoteConfig::default()).args;
        assert_eq!(
            args,
            vec![
                "compute",
                "ssh",
                "gpu-1",
                "--",
                "-L",
                "6006:localhost:6006",
                "-t",
                "tmux attach -t prune-spawn-2",
            ]
        );
    }

    #[test]
    fn attach_to_most_recent_session() {
        let attach = RemoteAttach::new("gpu-1", None, "7007").unwrap();
        let cmd = attach.command(&RemoteConfig::default());
        assert_eq!(cmd.program, "gcloud");
        assert!(cmd.args.contains(&"7007:localhost:6006".to_string()));
        assert_eq!(cmd.args.last().unwrap(), "tmux attach");
    }

    #[test]
    fn rejects_bad_port_and_empty_instance() {
        assert!(RemoteAttach::new("gpu-1", None, "not-a-port").is_err());
        assert!(RemoteAttach::new("gpu-1", None, "70000").is_err());
        assert!(RemoteAttach::new("", None, "6006").is_err());
    }

    #[tokio::test]
    async fn exit_code_passes_through() {
        let runner = MockRunner::with_responses(vec![Ok(255)]);
        let attach = RemoteAttach::new("gpu-1", None, "6006").unwrap();
        let code = attach.run(&runner, &RemoteConfig::default()).await.unwrap();
        assert_eq!(code, 255);
        assert_eq!(runner.executed_commands().len(), 1);
    }
}
