//! Step-indexed parameter schedules handed to the training loop.

use serde::{Deserialize, Serialize};

/// A scalar that varies with the global training step count.
pub trait Schedule: Send + Sync {
    fn value_at(&self, steps: u64) -> f64;
}

/// Linear interpolation from `start_value` at `start_step` to `end_value`
/// at `end_step`, held constant outside that interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearRamp {
    pub start_step: u64,
    pub end_step: u64,
    pub start_value: f64,
    pub end_value: f64,
}

impl LinearRamp {
    pub const fn new(start_step: u64, end_step: u64, start_value: f64, end_value: f64) -> Self {
        Self {
            start_step,
            end_step,
            start_value,
            end_value,
        }
    }
}

impl Schedule for LinearRamp {
    fn value_at(&self, steps: u64) -> f64 {
        if steps < self.start_step {
            return self.start_value;
        }
        // Covers the degenerate end_step <= start_step case too.
        if steps >= self.end_step {
            return self.end_value;
        }
        let span = (self.end_step - self.start_step) as f64;
        let t = (steps - self.start_step) as f64 / span;
        self.start_value + t * (self.end_value - self.start_value)
    }
}
