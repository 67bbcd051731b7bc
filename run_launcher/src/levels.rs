//! Level sources consumed by the training loop, and the step counter that
//! lets a source change behaviour as training progresses.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Read access to the number of environment steps taken so far.
pub trait StepCounter: Send + Sync {
    fn num_steps(&self) -> u64;
}

/// Shared step counter. The trainer bridge writes it; sequencers read it.
#[derive(Debug, Clone, Default)]
pub struct GlobalStepCounter {
    steps: Arc<AtomicU64>,
}

impl GlobalStepCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, steps: u64) {
        self.steps.store(steps, Ordering::Relaxed);
    }

    pub fn advance(&self, by: u64) -> u64 {
        self.steps.fetch_add(by, Ordering::Relaxed) + by
    }
}

impl StepCounter for GlobalStepCounter {
    fn num_steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }
}

/// Identifies one level: the set it comes from and its position in that set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub set: String,
    pub index: u64,
}

/// Unbounded lazy supply of levels handed to the training framework.
pub type LevelSource = Box<dyn Iterator<Item = Level> + Send>;

/// A named, endless level set.
#[derive(Debug, Clone)]
pub struct LevelSet {
    name: String,
    next_index: u64,
}

impl LevelSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_index: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Iterator for LevelSet {
    type Item = Level;

    fn next(&mut self) -> Option<Level> {
        let level = Level {
            set: self.name.clone(),
            index: self.next_index,
        };
        self.next_index += 1;
        Some(level)
    }
}

/// Serves still levels until the counter reaches `switch_at`, spawning
/// levels from then on. The counter is consulted on every element.
pub struct StillThenSpawn<C> {
    still: LevelSet,
    spawn: LevelSet,
    switch_at: u64,
    counter: C,
}

impl<C: StepCounter> StillThenSpawn<C> {
    pub fn new(still: LevelSet, spawn: LevelSet, switch_at: u64, counter: C) -> Self {
        Self {
            still,
            spawn,
            switch_at,
            counter,
        }
    }
}

impl<C: StepCounter> Iterator for StillThenSpawn<C> {
    type Item = Level;

    fn next(&mut self) -> Option<Level> {
        if self.counter.num_steps() < self.switch_at {
            self.still.next()
        } else {
            self.spawn.next()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_set_is_unbounded_and_ordered() {
        let levels: Vec<Level> = LevelSet::new("random/navigation").take(3).collect();
        assert_eq!(levels.len(), 3);
        assert!(levels.iter().all(|l| l.set == "random/navigation"));
        assert_eq!(
            levels.iter().map(|l| l.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn counter_advances_and_is_shared() {
        let counter = GlobalStepCounter::new();
        let reader = counter.clone();
        assert_eq!(counter.advance(512), 512);
        assert_eq!(counter.advance(512), 1024);
        assert_eq!(reader.num_steps(), 1024);
        counter.set(7);
        assert_eq!(reader.num_steps(), 7);
    }

    #[test]
    fn sequencer_switches_sources_across_sweep() {
        let counter = GlobalStepCounter::new();
        let mut levels = StillThenSpawn::new(
            LevelSet::new("still"),
            LevelSet::new("spawn"),
            1_500_000,
            counter.clone(),
        );

        for i in 0..200u64 {
            let steps = i * 15_000;
            counter.set(steps);
            let level = levels.next().unwrap();
            if steps < 1_500_000 {
                assert_eq!(level.set, "still", "at {} steps", steps);
            } else {
                assert_eq!(level.set, "spawn", "at {} steps", steps);
            }
        }
    }

    #[test]
    fn sequencer_switches_exactly_at_threshold() {
        struct Fixed(u64);
        impl StepCounter for Fixed {
            fn num_steps(&self) -> u64 {
                self.0
            }
        }

        let mut below = StillThenSpawn::new(
            LevelSet::new("still"),
            LevelSet::new("spawn"),
            2_000_000,
            Fixed(1_999_999),
        );
        assert_eq!(below.next().unwrap().set, "still");

        let mut at = StillThenSpawn::new(
            LevelSet::new("still"),
            LevelSet::new("spawn"),
            2_000_000,
            Fixed(2_000_000),
        );
        assert_eq!(at.next().unwrap().set, "spawn");
    }

    #[test]
    fn each_source_keeps_its_own_position() {
        let counter = GlobalStepCounter::new();
        let mut levels = StillThenSpawn::new(
            LevelSet::new("still"),
            LevelSet::new("spawn"),
            10,
            counter.clone(),
        );
        levels.next();
        levels.next();
        counter.set(10);
        let first_spawn = levels.next().unwrap();
        assert_eq!(first_spawn, Level { set: "spawn".into(), index: 0 });
    }
}
