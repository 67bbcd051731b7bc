//! Run directory resolution and the active-job marker.

use anyhow::{Context, Result};
use std::fmt;
use std::io::{BufRead, Write};
use std::path::{Component, Path, PathBuf};

/// Controlled early exits that happen before a run is under way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// No run directory was given and no active job is recorded.
    NothingToResume { marker: PathBuf },
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::NothingToResume { marker } => write!(
                f,
                "No run directory given and no active job recorded in {}",
                marker.display()
            ),
        }
    }
}

impl std::error::Error for JobError {}

/// Single-line file naming the most recently started, not yet cleaned up run.
#[derive(Debug, Clone)]
pub struct ActiveJobMarker {
    path: PathBuf,
}

impl ActiveJobMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// The recorded run directory, if any. An empty marker counts as absent.
    pub fn read(&self) -> Result<Option<PathBuf>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let line = contents.lines().next().unwrap_or("").trim();
                Ok((!line.is_empty()).then(|| PathBuf::from(line)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read active-job marker {:?}", self.path))
            }
        }
    }

    pub fn write(&self, run_dir: &Path) -> Result<()> {
        std::fs::write(&self.path, format!("{}\n", run_dir.display()))
            .with_context(|| format!("Failed to write active-job marker {:?}", self.path))
    }

    /// Remove the marker; a missing marker is fine.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to remove active-job marker {:?}", self.path))
            }
        }
    }
}

/// A resolved run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDir {
    pub path: PathBuf,
    /// Given on the command line rather than resumed from the marker.
    pub explicit: bool,
    /// Already present on disk at resolution time.
    pub existed: bool,
}

impl RunDir {
    /// Base name of the run directory, used as the job name.
    pub fn job_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Whether an existing directory must be reconciled before starting.
    pub fn needs_conflict_resolution(&self) -> bool {
        self.explicit && self.existed
    }
}

/// Make `path` absolute against the current directory and normalise `.`/`..`
/// lexically. Symlinks are left alone.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to read the current directory")?
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Resolve the run directory and record it in the marker before anything
/// else touches the filesystem.
pub fn resolve_run_dir(arg: Option<&Path>, marker: &ActiveJobMarker) -> Result<RunDir> {
    let (path, explicit) = match arg {
        Some(dir) => (absolutize(dir)?, true),
        None => match marker.read()? {
            Some(dir) => (dir, false),
            None => {
                return Err(JobError::NothingToResume {
                    marker: marker.path().to_path_buf(),
                }
                .into())
            }
        },
    };

    marker.write(&path)?;

    Ok(RunDir {
        existed: path.exists(),
        path,
        explicit,
    })
}

/// Operator's answer to "this run directory already exists".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    Overwrite,
    Append,
    Abort,
}

impl ConflictChoice {
    pub fn from_response(response: &str) -> Option<ConflictChoice> {
        match response.trim() {
            "overwrite" => Some(ConflictChoice::Overwrite),
            "append" => Some(ConflictChoice::Append),
            "abort" => Some(ConflictChoice::Abort),
            _ => None,
        }
    }
}

/// Ask until a recognised answer arrives. Temporary runs are overwritten
/// without asking; end of input counts as abort.
pub fn choose_conflict_action<R: BufRead, W: Write>(
    run_dir: &RunDir,
    temp_prefix: &str,
    input: &mut R,
    output: &mut W,
) -> Result<ConflictChoice> {
    if run_dir.job_name().starts_with(temp_prefix) {
        return Ok(ConflictChoice::Overwrite);
    }

    writeln!(
        output,
        "The directory '{}' already exists. Would you like to overwrite the old data, append to it, or abort?",
        run_dir.path.display()
    )?;

    let mut line = Vec::new();
    loop {
        write!(output, "(overwrite / append / abort) > ")?;
        output.flush()?;

        line.clear();
        if input.read_until(b'\n', &mut line)? == 0 {
            writeln!(output)?;
            return Ok(ConflictChoice::Abort);
        }
        // Undecodable bytes just fail to match and we ask again.
        if let Some(choice) = ConflictChoice::from_response(&String::from_utf8_lossy(&line)) {
            return Ok(choice);
        }
    }
}

/// Carry out an overwrite or append. Abort is the caller's business.
/// Returns whether previous contents were removed.
pub fn apply_conflict_choice(run_dir: &RunDir, choice: ConflictChoice) -> Result<bool> {
    if choice == ConflictChoice::Overwrite && run_dir.path.exists() {
        std::fs::remove_dir_all(&run_dir.path)
            .with_context(|| format!("Failed to remove {:?}", run_dir.path))?;
        return Ok(true);
    }
    Ok(false)
}

/// Create the run directory (and parents) if missing.
pub fn ensure_run_dir(run_dir: &RunDir) -> Result<()> {
    std::fs::create_dir_all(&run_dir.path)
        .with_context(|| format!("Failed to create run directory {:?}", run_dir.path))
}
