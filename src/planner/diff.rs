//! Diff engine for comparing an old snapshot against a new one.
//!
//! Resources are matched by moniker only. Every matched pair whose inputs
//! changed is classified as an update or a replacement, asking the
//! resource's provider which of the changed properties cannot be updated in
//! place.

use tracing::debug;

use crate::error::PlanError;
use crate::provider::ProviderRegistry;
use crate::resource::{ObjectDiff, PropertyKey, Resource, Snapshot};

/// Engine for computing diffs between two snapshots.
#[derive(Debug)]
pub struct DiffEngine<'a> {
    registry: &'a ProviderRegistry,
}

/// Classification of a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Type of difference.
    pub diff_type: DiffType,
    /// Position of the resource in the old snapshot.
    pub old: Option<usize>,
    /// Position of the resource in the new snapshot.
    pub new: Option<usize>,
    /// Input diff, for matched resources.
    pub diff: Option<ObjectDiff>,
    /// Changed properties that force a replacement.
    pub replace_keys: Vec<PropertyKey>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource can be updated in place.
    Update,
    /// Resource must be deleted and created again.
    Replace,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// Complete diff result.
///
/// `diffs` lists every new resource in new snapshot order, followed by the
/// deletions in reverse old snapshot order.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// All resource diffs.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl<'a> DiffEngine<'a> {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new(registry: &'a ProviderRegistry) -> Self {
        Self { registry }
    }

    /// Computes the diff between two snapshots.
    ///
    /// # Errors
    ///
    /// Fails if a changed resource has no provider or its provider cannot
    /// inspect the change.
    pub async fn compute_diff(&self, old: &Snapshot, new: &Snapshot) -> Result<DiffResult, PlanError> {
        let old_index = old.index();
        let mut matched = vec![false; old.len()];
        let mut diffs = Vec::with_capacity(new.len() + old.len());

        for (new_pos, resource) in new.iter().enumerate() {
            let Some(&old_pos) = old_index.get(&resource.moniker) else {
                debug!("{} needs to be created", resource.moniker);
                diffs.push(ResourceDiff::create(new_pos));
                continue;
            };
            matched[old_pos] = true;
            let previous = &old.resources()[old_pos];
            diffs.push(self.compare(previous, resource, old_pos, new_pos).await?);
        }

        for (old_pos, resource) in old.iter().enumerate().rev() {
            if !matched[old_pos] {
                debug!("{} needs to be deleted", resource.moniker);
                diffs.push(ResourceDiff {
                    diff_type: DiffType::Delete,
                    old: Some(old_pos),
                    new: None,
                    diff: None,
                    replace_keys: Vec::new(),
                });
            }
        }

        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();
        let creates = count(DiffType::Create);
        let updates = count(DiffType::Update);
        let replaces = count(DiffType::Replace);
        let deletes = count(DiffType::Delete);
        let unchanged = count(DiffType::NoChange);

        Ok(DiffResult {
            diffs,
            creates,
            updates,
            replaces,
            deletes,
            unchanged,
        })
    }

    /// Classifies one matched pair.
    async fn compare(
        &self,
        old: &Resource,
        new: &Resource,
        old_pos: usize,
        new_pos: usize,
    ) -> Result<ResourceDiff, PlanError> {
        let diff = old.inputs.diff(&new.inputs);

        let classified = |diff_type, diff, replace_keys| ResourceDiff {
            diff_type,
            old: Some(old_pos),
            new: Some(new_pos),
            diff: Some(diff),
            replace_keys,
        };

        if old.type_token == new.type_token && !diff.any_changes() {
            return Ok(classified(DiffType::NoChange, diff, Vec::new()));
        }

        // Nothing exists remotely, so there is nothing to update or delete.
        let Some(id) = &old.id else {
            debug!("{} was never created, creating it", new.moniker);
            return Ok(ResourceDiff::create(new_pos));
        };

        if old.type_token != new.type_token {
            debug!(
                "{} changed type from {} to {}, replacing",
                new.moniker, old.type_token, new.type_token
            );
            return Ok(classified(DiffType::Replace, diff, Vec::new()));
        }

        let provider = self.registry.resolve(&new.type_token)?;
        let replace_keys: Vec<PropertyKey> = provider
            .inspect_change(&new.type_token, id, &old.inputs, &new.inputs, &diff)
            .await
            .map_err(|source| PlanError::ProviderCall {
                moniker: new.moniker.to_string(),
                operation: "inspect_change",
                source,
            })?
            .into_iter()
            .filter(|key| diff.changed(key))
            .collect();

        if replace_keys.is_empty() {
            debug!("{} needs update ({:?})", new.moniker, diff.changed_keys());
            Ok(classified(DiffType::Update, diff, replace_keys))
        } else {
            debug!("{} needs replacement ({replace_keys:?})", new.moniker);
            Ok(classified(DiffType::Replace, diff, replace_keys))
        }
    }
}

impl ResourceDiff {
    const fn create(new_pos: usize) -> Self {
        Self {
            diff_type: DiffType::Create,
            old: None,
            new: Some(new_pos),
            diff: None,
            replace_keys: Vec::new(),
        }
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }

    /// Returns the total number of changed resources.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}
