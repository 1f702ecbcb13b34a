//! Progress reporting during an apply run.

use std::collections::BTreeMap;

use tracing::{error, info, warn};

use crate::error::{ProviderError, ResourceState};

use super::plan::{Step, StepOp};

/// Observer of an apply run.
///
/// Called synchronously around every step; implementations must not block.
pub trait ProgressSink: Send {
    /// Called before a step is executed.
    fn before(&mut self, step: &Step);

    /// Called after a step finished, with its failure if any.
    fn after(&mut self, step: &Step, error: Option<&ProviderError>, state: ResourceState);
}

/// Sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn before(&mut self, _step: &Step) {}

    fn after(&mut self, _step: &Step, _error: Option<&ProviderError>, _state: ResourceState) {}
}

/// Sink that logs every step and keeps counts.
#[derive(Debug, Default, Clone)]
pub struct ApplyProgress {
    /// Steps attempted.
    pub steps: usize,
    /// Successful steps per operation.
    pub ops: BTreeMap<StepOp, usize>,
    /// Set once a failure left remote state unknown.
    pub maybe_corrupt: bool,
}

impl ApplyProgress {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful steps of one operation.
    #[must_use]
    pub fn succeeded(&self, op: StepOp) -> usize {
        self.ops.get(&op).copied().unwrap_or_default()
    }
}

impl ProgressSink for ApplyProgress {
    fn before(&mut self, step: &Step) {
        self.steps += 1;
        info!("Applying step #{}: {step}", self.steps);
    }

    fn after(&mut self, step: &Step, error: Option<&ProviderError>, state: ResourceState) {
        match error {
            None => {
                *self.ops.entry(step.op()).or_default() += 1;
                info!("Step #{} done: {step}", self.steps);
            }
            Some(e) if state == ResourceState::Unknown => {
                self.maybe_corrupt = true;
                error!("Step #{} failed, remote state unknown: {step}: {e}", self.steps);
            }
            Some(e) => warn!("Step #{} failed: {step}: {e}", self.steps),
        }
    }
}
