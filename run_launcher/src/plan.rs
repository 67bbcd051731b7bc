//! The fixed training configurations, one per environment type.

use crate::env_type::EnvType;
use crate::levels::{GlobalStepCounter, LevelSet, LevelSource, StillThenSpawn};
use crate::schedule::LinearRamp;
use serde::{Deserialize, Serialize};

/// Minimum-performance threshold reached at the end of every performance ramp.
const MIN_PERFORMANCE_START: f64 = 0.01;
const MIN_PERFORMANCE_END: f64 = 0.3;

/// Where a run's levels come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LevelPlan {
    /// A single level set.
    Set { name: String },
    /// Still levels until `switch_at` steps, spawning levels afterwards.
    StillThenSpawn {
        still: String,
        spawn: String,
        switch_at: u64,
    },
}

/// Schedules, budget and level plan for one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPlan {
    pub env_type: EnvType,
    pub penalty: LinearRamp,
    pub min_performance: Option<LinearRamp>,
    pub total_steps: u64,
    pub levels: LevelPlan,
    /// Parallel environment count; `None` leaves it to the framework.
    pub num_env: Option<usize>,
}

impl TrainingPlan {
    pub fn for_env(env_type: EnvType, impact_penalty: f64) -> Self {
        let penalty = |start: u64, end: u64| LinearRamp::new(start, end, 0.0, impact_penalty);
        let performance = |start: u64, end: u64| {
            Some(LinearRamp::new(
                start,
                end,
                MIN_PERFORMANCE_START,
                MIN_PERFORMANCE_END,
            ))
        };

        match env_type {
            EnvType::AppendStill => Self {
                env_type,
                penalty: penalty(1_000_000, 2_000_000),
                min_performance: performance(1_000_000, 2_000_000),
                total_steps: 10_000_000,
                levels: LevelPlan::Set {
                    name: "random/append-still-easy".to_string(),
                },
                num_env: None,
            },
            EnvType::PruneStill => Self {
                env_type,
                penalty: penalty(500_000, 1_500_000),
                min_performance: performance(500_000, 1_500_000),
                total_steps: 6_000_000,
                levels: LevelPlan::Set {
                    name: "random/prune-still-easy".to_string(),
                },
                num_env: None,
            },
            EnvType::AppendSpawn => Self {
                env_type,
                penalty: penalty(2_000_000, 3_500_000),
                min_performance: performance(1_000_000, 2_000_000),
                total_steps: 10_000_000,
                levels: LevelPlan::StillThenSpawn {
                    still: "random/append-still-easy".to_string(),
                    spawn: "random/append-spawn".to_string(),
                    switch_at: 2_000_000,
                },
                num_env: None,
            },
            EnvType::PruneSpawn => Self {
                env_type,
                penalty: penalty(1_500_000, 2_500_000),
                min_performance: performance(500_000, 1_500_000),
                total_steps: 6_000_000,
                levels: LevelPlan::StillThenSpawn {
                    still: "random/prune-still-easy".to_string(),
                    spawn: "random/prune-spawn".to_string(),
                    switch_at: 1_500_000,
                },
                num_env: Some(4),
            },
            EnvType::Navigate => Self {
                env_type,
                penalty: penalty(1_000_000, 2_000_000),
                min_performance: None,
                total_steps: 6_000_000,
                levels: LevelPlan::Set {
                    name: "random/navigation".to_string(),
                },
                num_env: None,
            },
        }
    }

    /// Build the lazy level supply, reading progress from `counter`.
    pub fn level_source(&self, counter: &GlobalStepCounter) -> LevelSource {
        match &self.levels {
            LevelPlan::Set { name } => Box::new(LevelSet::new(name.clone())),
            LevelPlan::StillThenSpawn {
                still,
                spawn,
                switch_at,
            } => Box::new(StillThenSpawn::new(
                LevelSet::new(still.clone()),
                LevelSet::new(spawn.clone()),
                *switch_at,
                counter.clone(),
            )),
        }
    }
}

/// Subdirectory of the run directory that receives output for one penalty value.
pub fn penalty_dir_name(impact_penalty: f64) -> String {
    format!("penalty_{:.2}", impact_penalty)
}
