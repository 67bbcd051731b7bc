//! Host preparation: optional dependency installation and the native
//! extension build that precedes every run.

use crate::runner::{CommandRunner, CommandSpec};
use crate::settings::Settings;
use std::path::Path;
use tracing::{info, instrument, warn};

/// Commands run under `--install`, in order.
pub fn install_commands(settings: &Settings, workspace_dir: &Path) -> Vec<CommandSpec> {
    let install = &settings.install;
    let mut commands = vec![CommandSpec::new("apt-get")
        .args(["install", install.system_package.as_str(), "--yes"])
        .elevated(install.use_sudo)];

    for manifest in &install.requirement_files {
        commands.push(
            CommandSpec::new("pip3")
                .args(["install", "-r"])
                .arg(workspace_dir.join(manifest).display().to_string())
                .elevated(install.use_sudo),
        );
    }
    commands
}

/// Install system and library dependencies. Best effort: failures are
/// logged and the launch continues.
#[instrument(skip_all)]
pub async fn install_dependencies(runner: &dyn CommandRunner, settings: &Settings, workspace_dir: &Path) {
    for cmd in install_commands(settings, workspace_dir) {
        info!("Installing: {}", cmd);
        match runner.run(&cmd).await {
            Ok(0) => {}
            Ok(code) => warn!("`{}` exited with status {}; continuing", cmd, code),
            Err(e) => warn!("`{}` failed: {:#}; continuing", cmd, e),
        }
    }
}

/// Native extension build, writing its output into the workspace tree.
pub fn build_command(settings: &Settings, workspace_dir: &Path) -> CommandSpec {
    CommandSpec::new(settings.build.program.as_str())
        .args(settings.build.args.iter().cloned())
        .arg(workspace_dir.display().to_string())
        .current_dir(workspace_dir)
}

/// Run the extension build. A failed build is logged and left for the
/// training framework to surface.
#[instrument(skip_all)]
pub async fn build_extensions(runner: &dyn CommandRunner, settings: &Settings, workspace_dir: &Path) {
    let cmd = build_command(settings, workspace_dir);
    info!("Building native extensions: {}", cmd);
    match runner.run(&cmd).await {
        Ok(0) => {}
        Ok(code) => warn!("Extension build exited with status {}; continuing", code),
        Err(e) => warn!("Extension build failed: {:#}; continuing", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;
    use std::path::PathBuf;
    use tracing_test::traced_test;

    #[test]
    fn install_commands_cover_package_and_both_manifests() {
        let settings = Settings::default();
        let cmds = install_commands(&settings, Path::new("/srv/safety"));
        let rendered: Vec<String> = cmds.iter().map(|c| c.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "sudo apt-get install ffmpeg --yes",
                "sudo pip3 install -r /srv/safety/requirements.txt",
                "sudo pip3 install -r /srv/safety/training/requirements.txt",
            ]
        );
    }

    #[test]
    fn install_without_sudo() {
        let mut settings = Settings::default();
        settings.install.use_sudo = false;
        let cmds = install_commands(&settings, Path::new("/w"));
        assert!(cmds.iter().all(|c| c.program != "sudo"));
    }

    #[tokio::test]
    async fn install_failures_do_not_stop_later_steps() {
        let runner = MockRunner::with_responses(vec![
            Err("apt-get: not found".into()),
            Ok(1),
            Ok(0),
        ]);
        install_dependencies(&runner, &Settings::default(), Path::new("/w")).await;
        assert_eq!(runner.executed_commands().len(), 3);
    }

    #[test]
    fn build_targets_workspace_tree() {
        let cmd = build_command(&Settings::default(), Path::new("/srv/safety"));
        assert_eq!(
            cmd.to_string(),
            "python3 setup.py build_ext --build-lib /srv/safety"
        );
        assert_eq!(cmd.cwd, Some(PathBuf::from("/srv/safety")));
    }

    #[tokio::test]
    #[traced_test]
    async fn build_failure_is_only_logged() {
        let runner = MockRunner::with_responses(vec![Ok(2)]);
        build_extensions(&runner, &Settings::default(), Path::new("/w")).await;
        assert_eq!(runner.executed_commands().len(), 1);
        assert!(logs_contain("Extension build exited with status 2"));
    }
}
