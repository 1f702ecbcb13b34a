//! Planning and applying changes.
//!
//! This module compares an old snapshot with a new one, turns the
//! differences into an ordered plan, and applies that plan step by step.

mod diff;
mod executor;
mod plan;
mod progress;

pub use diff::{DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use executor::{ApplyOutcome, PlanExecutor};
pub use plan::{Plan, PlanSummary, Planner, Step, StepOp};
pub use progress::{ApplyProgress, NoopProgress, ProgressSink};
