//! Plan executor for applying plans against providers.
//!
//! Steps run strictly one after another. The first failure halts the walk,
//! and the returned checkpoint describes what exists remotely at that point:
//! unchanged resources, everything created or updated so far, and the old
//! versions of resources whose update or deletion did not happen.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::error::{ApplyError, ProviderError, ResourceState};
use crate::provider::{Provider, ProviderRegistry};
use crate::resource::{Moniker, Resource, Snapshot};

use super::plan::{Plan, Step};
use super::progress::ProgressSink;

/// Executor for plans.
#[derive(Debug)]
pub struct PlanExecutor<'a> {
    registry: &'a ProviderRegistry,
    cancel: Option<Arc<AtomicBool>>,
}

/// Result of an apply run, successful or not.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// Snapshot of what exists after the run; always safe to persist.
    pub checkpoint: Snapshot,
    /// The failure that halted the run.
    pub error: Option<ProviderError>,
    /// Zero-based index of the failed step.
    pub failed_step: Option<usize>,
    /// Resource state reported with the failure.
    pub state: ResourceState,
    /// Set if a failure left remote state unknown.
    pub maybe_corrupt: bool,
    /// Number of steps that succeeded.
    pub completed: usize,
}

impl<'a> PlanExecutor<'a> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(registry: &'a ProviderRegistry) -> Self {
        Self {
            registry,
            cancel: None,
        }
    }

    /// Stops the run before the next step once `flag` is set.
    #[must_use]
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Executes a plan.
    ///
    /// Always yields an [`ApplyOutcome`] with a checkpoint. Provider failures
    /// and cancellation are reported in it rather than returned as errors.
    pub async fn execute(&self, plan: &Plan, progress: &mut dyn ProgressSink) -> ApplyOutcome {
        info!("Executing plan with {} steps", plan.len());

        let mut applied: BTreeMap<Moniker, Resource> = plan
            .unchanged()
            .iter()
            .map(|r| (r.moniker.clone(), r.clone()))
            .collect();
        let mut lingering: BTreeMap<Moniker, Resource> = plan
            .steps()
            .iter()
            .filter_map(Step::old)
            .map(|r| (r.moniker.clone(), r.clone()))
            .collect();

        let mut completed = 0;
        let mut failure = None;

        for (index, step) in plan.steps().iter().enumerate() {
            progress.before(step);

            let result = if self.is_cancelled() {
                warn!("Apply cancelled before step #{}", index + 1);
                Err(ProviderError::recovered("apply cancelled"))
            } else {
                self.apply_step(step).await
            };

            match result {
                Ok(materialized) => {
                    if let Some(old) = step.old() {
                        lingering.remove(&old.moniker);
                    }
                    if let Some(resource) = materialized {
                        applied.insert(resource.moniker.clone(), resource);
                    }
                    completed += 1;
                    progress.after(step, None, ResourceState::Recovered);
                }
                Err(e) => {
                    progress.after(step, Some(&e), e.state);
                    failure = Some((index, e));
                    break;
                }
            }
        }

        // Keep the target order where possible; old versions of resources
        // that were not updated take the slot of their new version.
        let mut resources = Vec::with_capacity(applied.len() + lingering.len());
        for resource in plan.new() {
            if let Some(current) = applied.remove(&resource.moniker) {
                resources.push(current);
            } else if let Some(previous) = lingering.remove(&resource.moniker) {
                resources.push(previous);
            }
        }
        for resource in plan.old() {
            if let Some(previous) = lingering.remove(&resource.moniker) {
                resources.push(previous);
            }
        }
        resources.extend(applied.into_values());

        let checkpoint = Snapshot::checkpoint(resources);

        match failure {
            None => {
                info!("Plan applied: {completed} steps");
                ApplyOutcome {
                    checkpoint,
                    error: None,
                    failed_step: None,
                    state: ResourceState::Recovered,
                    maybe_corrupt: false,
                    completed,
                }
            }
            Some((index, error)) => {
                warn!(
                    "Apply halted at step #{} after {completed} successful steps: {error}",
                    index + 1
                );
                ApplyOutcome {
                    checkpoint,
                    state: error.state,
                    maybe_corrupt: error.is_unknown(),
                    error: Some(error),
                    failed_step: Some(index),
                    completed,
                }
            }
        }
    }

    /// Runs one step, returning the resource it materialized.
    async fn apply_step(&self, step: &Step) -> Result<Option<Resource>, ProviderError> {
        match step {
            Step::Create { new, .. } => {
                let provider = self.provider_for(new)?;
                let created = provider.create(&new.type_token, &new.inputs).await?;
                debug!("Created {} [id={}]", new.moniker, created.id);
                Ok(Some(
                    new.clone()
                        .with_id(created.id)
                        .with_outputs(created.outputs),
                ))
            }
            Step::Update { old, new, diff } => {
                let Some(id) = &old.id else {
                    return Err(ProviderError::recovered(format!(
                        "{} has no ID and cannot be updated",
                        old.moniker
                    )));
                };
                let provider = self.provider_for(new)?;
                provider
                    .update(&new.type_token, id, &old.inputs, &new.inputs, diff)
                    .await?;
                debug!("Updated {} [id={id}]", new.moniker);
                Ok(Some(new.clone()))
            }
            Step::Delete { old, .. } => {
                let Some(id) = &old.id else {
                    debug!("{} has no ID, nothing to delete", old.moniker);
                    return Ok(None);
                };
                let provider = self.provider_for(old)?;
                provider.delete(&old.type_token, id).await?;
                debug!("Deleted {} [id={id}]", old.moniker);
                Ok(None)
            }
        }
    }

    fn provider_for(&self, resource: &Resource) -> Result<Arc<dyn Provider>, ProviderError> {
        self.registry
            .resolve(&resource.type_token)
            .map_err(|e| ProviderError::recovered(e.to_string()))
    }
}

impl ApplyOutcome {
    /// Returns true if every step succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Describes the failure in terms of the plan's steps.
    #[must_use]
    pub fn to_error(&self, plan: &Plan) -> Option<ApplyError> {
        let error = self.error.as_ref()?;
        let index = self.failed_step?;
        let step = plan.steps().get(index)?;
        Some(ApplyError::StepFailed {
            step: index + 1,
            op: step.op().to_string(),
            moniker: step.moniker().to_string(),
            state: self.state,
            message: error.message.clone(),
        })
    }
}
