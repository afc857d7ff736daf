//! Clip selection: turns a preset, emotion, and target duration into an
//! ordered sequence of motion clips.

pub mod clip_planner;

pub use clip_planner::{ClipPlan, ClipPlanEntry, ClipPlanner, SpecMismatch};
