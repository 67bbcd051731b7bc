//! Run Launcher - Core Library
//!
//! Operator tooling for reinforcement-learning training runs: preparing a
//! run directory, launching the external training loop with the right
//! schedules, and attaching to remote instances.

pub mod cli;
pub mod env_type;
pub mod job;
pub mod levels;
pub mod lifecycle;
pub mod plan;
pub mod provision;
pub mod remote;
pub mod runner;
pub mod schedule;
pub mod settings;
pub mod telemetry;
pub mod trainer;
pub mod visualization;

pub use lifecycle::{LaunchOptions, LaunchOutcome, Launcher};
