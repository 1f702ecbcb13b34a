//! Plan types and construction.
//!
//! A [`Plan`] is derived from an old and a new snapshot and never persisted.
//! Its steps are in application order: creates, updates and replacements in
//! new snapshot order, then deletions in reverse old snapshot order.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PlanError;
use crate::provider::ProviderRegistry;
use crate::resource::{Moniker, ObjectDiff, Resource, Snapshot};

use super::diff::{DiffEngine, DiffType};

/// One operation of a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Create a resource.
    Create {
        /// The resource to create.
        new: Resource,
        /// Whether this creates the replacement of a deleted resource.
        replace: bool,
    },
    /// Update a resource in place.
    Update {
        /// The recorded resource.
        old: Resource,
        /// The desired resource, carrying the old ID and outputs.
        new: Resource,
        /// Input diff from `old` to `new`.
        diff: ObjectDiff,
    },
    /// Delete a resource.
    Delete {
        /// The recorded resource.
        old: Resource,
        /// Whether this deletes a resource that is about to be replaced.
        replace: bool,
    },
}

/// Operation kind of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepOp {
    /// Plain create.
    Create,
    /// In-place update.
    Update,
    /// Plain delete.
    Delete,
    /// Create half of a replacement.
    CreateReplacement,
    /// Delete half of a replacement.
    DeleteReplaced,
}

/// Step counts of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    /// Resources created.
    pub creates: usize,
    /// Resources updated in place.
    pub updates: usize,
    /// Resources replaced.
    pub replaces: usize,
    /// Resources deleted.
    pub deletes: usize,
    /// Resources left alone.
    pub unchanged: usize,
}

/// An ordered set of steps turning one snapshot into another.
#[derive(Debug, Clone)]
pub struct Plan {
    old: Snapshot,
    new: Snapshot,
    steps: Vec<Step>,
    unchanged: Vec<Resource>,
}

/// Builds plans.
#[derive(Debug)]
pub struct Planner<'a> {
    registry: &'a ProviderRegistry,
}

impl<'a> Planner<'a> {
    /// Creates a planner consulting providers from `registry`.
    #[must_use]
    pub const fn new(registry: &'a ProviderRegistry) -> Self {
        Self { registry }
    }

    /// Plans the transition from `old` to `new`.
    ///
    /// Only `inspect_change` is called on providers.
    ///
    /// # Errors
    ///
    /// Fails if a changed resource has no provider or its provider cannot
    /// inspect the change.
    pub async fn plan(&self, old: &Snapshot, new: &Snapshot) -> Result<Plan, PlanError> {
        let result = DiffEngine::new(self.registry).compute_diff(old, new).await?;

        let mut steps = Vec::with_capacity(result.total_changes() + result.replaces);
        let mut unchanged = Vec::with_capacity(result.unchanged);

        for entry in result.diffs {
            let old_resource = entry.old.map(|i| &old.resources()[i]);
            let new_resource = entry.new.map(|i| &new.resources()[i]);

            match (entry.diff_type, old_resource, new_resource) {
                (DiffType::Create, _, Some(n)) => steps.push(Step::Create {
                    new: n.clone(),
                    replace: false,
                }),
                (DiffType::NoChange, Some(o), _) => unchanged.push(o.clone()),
                (DiffType::Update, Some(o), Some(n)) => steps.push(Step::Update {
                    old: o.clone(),
                    new: carry_forward(o, n),
                    diff: entry.diff.unwrap_or_default(),
                }),
                (DiffType::Replace, Some(o), Some(n)) => {
                    steps.push(Step::Delete {
                        old: o.clone(),
                        replace: true,
                    });
                    steps.push(Step::Create {
                        new: n.clone(),
                        replace: true,
                    });
                }
                (DiffType::Delete, Some(o), _) => steps.push(Step::Delete {
                    old: o.clone(),
                    replace: false,
                }),
                _ => {}
            }
        }

        let plan = Plan {
            old: old.clone(),
            new: new.clone(),
            steps,
            unchanged,
        };
        info!("{}", plan.summary());
        Ok(plan)
    }

    /// Plans the deletion of every resource in `old`.
    ///
    /// # Errors
    ///
    /// Never fails in practice; shares the signature of [`Planner::plan`].
    pub async fn destroy(&self, old: &Snapshot) -> Result<Plan, PlanError> {
        self.plan(old, &Snapshot::empty()).await
    }
}

/// The desired resource with the recorded ID and outputs.
fn carry_forward(old: &Resource, new: &Resource) -> Resource {
    let mut updated = new.clone();
    updated.id.clone_from(&old.id);
    updated.outputs = old.outputs.clone();
    updated
}

impl Plan {
    /// The snapshot the plan starts from.
    #[must_use]
    pub const fn old(&self) -> &Snapshot {
        &self.old
    }

    /// The snapshot the plan ends at.
    #[must_use]
    pub const fn new(&self) -> &Snapshot {
        &self.new
    }

    /// Steps in application order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Resources that need no step.
    #[must_use]
    pub fn unchanged(&self) -> &[Resource] {
        &self.unchanged
    }

    /// Returns true if the plan has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Number of steps with the given operation.
    #[must_use]
    pub fn count(&self, op: StepOp) -> usize {
        self.steps.iter().filter(|s| s.op() == op).count()
    }

    /// Per-resource counts.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            creates: self.count(StepOp::Create),
            updates: self.count(StepOp::Update),
            replaces: self.count(StepOp::CreateReplacement),
            deletes: self.count(StepOp::Delete),
            unchanged: self.unchanged.len(),
        }
    }
}

impl Step {
    /// The operation kind.
    #[must_use]
    pub const fn op(&self) -> StepOp {
        match self {
            Self::Create { replace: false, .. } => StepOp::Create,
            Self::Create { replace: true, .. } => StepOp::CreateReplacement,
            Self::Update { .. } => StepOp::Update,
            Self::Delete { replace: false, .. } => StepOp::Delete,
            Self::Delete { replace: true, .. } => StepOp::DeleteReplaced,
        }
    }

    /// The recorded resource, for updates and deletes.
    #[must_use]
    pub const fn old(&self) -> Option<&Resource> {
        match self {
            Self::Create { .. } => None,
            Self::Update { old, .. } | Self::Delete { old, .. } => Some(old),
        }
    }

    /// The desired resource, for creates and updates.
    #[must_use]
    pub const fn new(&self) -> Option<&Resource> {
        match self {
            Self::Create { new, .. } | Self::Update { new, .. } => Some(new),
            Self::Delete { .. } => None,
        }
    }

    /// The resource this step is about.
    #[must_use]
    pub const fn resource(&self) -> &Resource {
        match self {
            Self::Create { new, .. } | Self::Update { new, .. } => new,
            Self::Delete { old, .. } => old,
        }
    }

    /// Moniker of the resource this step is about.
    #[must_use]
    pub const fn moniker(&self) -> &Moniker {
        &self.resource().moniker
    }
}

impl PlanSummary {
    /// Number of resources that change.
    #[must_use]
    pub const fn changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }
}

impl std::fmt::Display for StepOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::CreateReplacement => "create-replacement",
            Self::DeleteReplaced => "delete-replaced",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.op(), self.moniker())?;
        if let Self::Update { diff, .. } = self {
            write!(f, " ({})", diff.changed_keys().join(", "))?;
        }
        Ok(())
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.creates, self.updates, self.replaces, self.deletes, self.unchanged
        )
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} steps):", self.steps.len())?;
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "  {}. {step}", i + 1)?;
        }
        write!(f, "{}", self.summary())
    }
}
