//! Environment-type tags selecting which fixed training configuration runs.

use anyhow::anyhow;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EnvType {
    AppendStill,
    PruneStill,
    AppendSpawn,
    PruneSpawn,
    Navigate,
}

impl EnvType {
    /// Every tag, in the order job names are scanned.
    pub const ALL: [EnvType; 5] = [
        EnvType::AppendStill,
        EnvType::PruneStill,
        EnvType::AppendSpawn,
        EnvType::PruneSpawn,
        EnvType::Navigate,
    ];

    /// Used when neither a flag nor the job name names a tag.
    pub const FALLBACK: EnvType = EnvType::AppendSpawn;

    pub fn as_str(self) -> &'static str {
        match self {
            EnvType::AppendStill => "append-still",
            EnvType::PruneStill => "prune-still",
            EnvType::AppendSpawn => "append-spawn",
            EnvType::PruneSpawn => "prune-spawn",
            EnvType::Navigate => "navigate",
        }
    }

    /// First tag (in [`EnvType::ALL`] order) contained in `job_name`.
    pub fn from_job_name(job_name: &str) -> Option<EnvType> {
        Self::ALL
            .into_iter()
            .find(|env| job_name.contains(env.as_str()))
    }

    /// Explicit flag first, then the job name, then [`EnvType::FALLBACK`].
    pub fn resolve(explicit: Option<EnvType>, job_name: &str) -> EnvType {
        explicit
            .or_else(|| Self::from_job_name(job_name))
            .unwrap_or(Self::FALLBACK)
    }
}

impl fmt::Display for EnvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|env| env.as_str() == s)
            .ok_or_else(|| anyhow!("Unknown environment type '{}'", s))
    }
}
