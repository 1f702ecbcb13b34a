//! Orchestration of a deployment.
//!
//! The reconciler owns the sequence around the engine: lock the husk, load
//! its record, build the target snapshot, plan, apply, and persist the
//! checkpoint. The lock is released on every path once it was acquired.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{SnapshotHasher, is_valid_husk_name};
use crate::diag::Diagnostics;
use crate::error::{ConfigError, HuskError, Result, StateError};
use crate::planner::{Plan, PlanExecutor, PlanSummary, Planner, ProgressSink};
use crate::provider::ProviderRegistry;
use crate::resource::{PropertyMap, Snapshot, SnapshotBuilder, TargetGraph};
use crate::state::{Deployment, DeploymentHistoryEntry, DeploymentOperation, StateStore, generate_holder_id};

/// Drives plan and apply runs against a state store.
pub struct Reconciler<'a, S: StateStore + ?Sized> {
    /// State store.
    store: &'a S,
    /// Providers for every resource type.
    registry: &'a ProviderRegistry,
    /// Snapshot hasher for history entries.
    hasher: SnapshotHasher,
    /// Lock holder identity.
    holder: String,
    /// Cancellation flag handed to the executor.
    cancel: Option<Arc<AtomicBool>>,
}

/// Options of a deploy or destroy run.
#[derive(Clone, Copy, Default)]
pub struct ApplyOptions<'a> {
    /// Plan under the lock but do not apply.
    pub dry_run: bool,
    /// Shown every non-empty plan before it is applied; returning false
    /// skips the apply. Its answer is ignored on dry runs.
    pub review: Option<&'a (dyn Fn(&Plan) -> bool + Sync)>,
}

/// A plan computed outside of any lock.
#[derive(Debug)]
pub struct Preview {
    /// The husk's current record.
    pub deployment: Deployment,
    /// The plan from the recorded snapshot to the target.
    pub plan: Plan,
}

/// Result of a deploy or destroy run.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// Husk name.
    pub husk: String,
    /// Operation that ran.
    pub operation: DeploymentOperation,
    /// Whether the run stopped after planning.
    pub dry_run: bool,
    /// Whether the plan was applied.
    pub applied: bool,
    /// Step counts of the plan.
    pub summary: PlanSummary,
    /// Number of steps that completed.
    pub completed: usize,
    /// Resources recorded after the run.
    pub resources: usize,
    /// Fingerprint of the recorded snapshot, when one was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_hash: Option<String>,
    /// The record as written, or as a dry run would have written it.
    #[serde(skip)]
    pub record: Option<Deployment>,
}

impl<'a, S: StateStore + ?Sized> Reconciler<'a, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(store: &'a S, registry: &'a ProviderRegistry) -> Self {
        Self {
            store,
            registry,
            hasher: SnapshotHasher::new(),
            holder: generate_holder_id(),
            cancel: None,
        }
    }

    /// Sets the lock holder identity.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Lets the executor stop between steps once `flag` is set.
    #[must_use]
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Creates an empty record for a new husk.
    ///
    /// # Errors
    ///
    /// Fails if the name is invalid or the husk already exists.
    pub async fn init(&self, husk: &str) -> Result<Deployment> {
        check_name(husk)?;
        if self.store.exists(husk).await? {
            return Err(StateError::AlreadyExists { husk: husk.to_string() }.into());
        }

        let deployment = Deployment::new(husk);
        self.store.save(&deployment).await?;
        info!("Initialized husk {husk} ({} backend)", self.store.backend_type());
        Ok(deployment)
    }

    /// Loads the record of an initialized husk.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotFound`] if the husk was never initialized.
    pub async fn load(&self, husk: &str) -> Result<Deployment> {
        check_name(husk)?;
        self.store
            .load(husk)
            .await?
            .ok_or_else(|| StateError::NotFound { husk: husk.to_string() }.into())
    }

    /// Builds the target snapshot of a graph inside `husk`.
    ///
    /// # Errors
    ///
    /// Fails on validation problems (reported in `diag`) and graph errors.
    pub async fn build(&self, husk: &str, graph: &TargetGraph, diag: &mut Diagnostics) -> Result<Snapshot> {
        check_name(husk)?;
        SnapshotBuilder::new(husk, self.registry).build(graph, diag).await
    }

    /// Plans a deploy without locking or applying anything.
    ///
    /// # Errors
    ///
    /// Fails if the husk does not exist, the graph is invalid or planning
    /// fails.
    pub async fn preview(&self, husk: &str, graph: &TargetGraph, diag: &mut Diagnostics) -> Result<Preview> {
        let deployment = self.load(husk).await?;
        let target = self.build(husk, graph, diag).await?;
        let plan = Planner::new(self.registry).plan(&deployment.latest, &target).await?;
        Ok(Preview { deployment, plan })
    }

    /// Converges a husk towards a target graph.
    ///
    /// The resulting checkpoint is saved even when a step fails; the failure
    /// is returned as an [`crate::error::ApplyError`] afterwards.
    ///
    /// # Errors
    ///
    /// Fails if the husk is locked or missing, the graph is invalid,
    /// planning fails, a step fails or the record cannot be saved.
    pub async fn deploy(
        &self,
        husk: &str,
        graph: &TargetGraph,
        options: ApplyOptions<'_>,
        diag: &mut Diagnostics,
        progress: &mut dyn ProgressSink,
    ) -> Result<ApplyReport> {
        check_name(husk)?;
        let lock = self.store.acquire_lock(husk, &self.holder).await?;

        let result = self.deploy_locked(husk, graph, options, diag, progress).await;

        self.unlock(husk, &lock.lock_id).await;
        result
    }

    /// Deletes every resource of a husk, then its record.
    ///
    /// On failure the remaining resources are recorded and the husk is kept.
    ///
    /// # Errors
    ///
    /// Fails if the husk is locked or missing, a step fails or the record
    /// cannot be saved.
    pub async fn destroy(
        &self,
        husk: &str,
        options: ApplyOptions<'_>,
        progress: &mut dyn ProgressSink,
    ) -> Result<ApplyReport> {
        check_name(husk)?;
        let lock = self.store.acquire_lock(husk, &self.holder).await?;

        let result = self.destroy_locked(husk, options, progress).await;

        self.unlock(husk, &lock.lock_id).await;
        result
    }

    async fn deploy_locked(
        &self,
        husk: &str,
        graph: &TargetGraph,
        options: ApplyOptions<'_>,
        diag: &mut Diagnostics,
        progress: &mut dyn ProgressSink,
    ) -> Result<ApplyReport> {
        let deployment = self.load(husk).await?;
        let target = SnapshotBuilder::new(husk, self.registry).build(graph, diag).await?;
        let plan = Planner::new(self.registry).plan(&deployment.latest, &target).await?;
        self.run(&deployment, &plan, graph.args.clone(), DeploymentOperation::Deploy, options, progress)
            .await
    }

    async fn destroy_locked(
        &self,
        husk: &str,
        options: ApplyOptions<'_>,
        progress: &mut dyn ProgressSink,
    ) -> Result<ApplyReport> {
        let deployment = self.load(husk).await?;
        let plan = Planner::new(self.registry).destroy(&deployment.latest).await?;
        let args = deployment.args.clone();
        let report = self
            .run(&deployment, &plan, args, DeploymentOperation::Destroy, options, progress)
            .await?;
        if report.applied {
            self.store.delete(husk).await?;
            info!("Destroyed husk {husk}");
        }
        Ok(report)
    }

    /// Reviews, applies and records one plan. The caller holds the lock.
    async fn run(
        &self,
        deployment: &Deployment,
        plan: &Plan,
        args: PropertyMap,
        operation: DeploymentOperation,
        options: ApplyOptions<'_>,
        progress: &mut dyn ProgressSink,
    ) -> Result<ApplyReport> {
        let husk = deployment.husk.as_str();
        let mut report = ApplyReport {
            husk: husk.to_string(),
            operation,
            dry_run: options.dry_run,
            applied: false,
            summary: plan.summary(),
            completed: 0,
            resources: deployment.resource_count(),
            snapshot_hash: None,
            record: None,
        };

        if options.dry_run {
            info!("Dry run of {operation} on {husk}: {}", plan.summary());
            let mut would_be = deployment.clone();
            would_be.latest = plan.new().clone();
            would_be.args = args;
            report.record = Some(would_be);
            return Ok(report);
        }
        let approved = plan.is_empty() || options.review.is_none_or(|review| review(plan));
        if !approved {
            info!("{operation} on {husk} was not approved");
            return Ok(report);
        }

        let mut executor = PlanExecutor::new(self.registry);
        if let Some(flag) = &self.cancel {
            executor = executor.with_cancellation(Arc::clone(flag));
        }
        let outcome = executor.execute(plan, progress).await;

        let hash = self.hasher.hash_snapshot(&outcome.checkpoint);
        let mut entry = DeploymentHistoryEntry::new(operation, &hash, plan.summary(), outcome.completed);
        let failure = outcome.to_error(plan);
        if let Some(err) = &failure {
            entry = entry.failed(&err.to_string(), outcome.maybe_corrupt);
        }

        let resources = outcome.checkpoint.len();
        let next = deployment.advance(outcome.checkpoint, args, entry);
        if let Err(e) = self.store.save(&next).await {
            error!("Failed to record the checkpoint of {husk}: {e}");
            return Err(e);
        }
        debug!("Recorded {resources} resources for {husk} ({})", SnapshotHasher::short_hash(&hash));

        if let Some(err) = failure {
            if outcome.maybe_corrupt {
                error!("{husk} may be out of sync with its providers: {err}");
            }
            return Err(HuskError::Apply(err));
        }

        report.applied = true;
        report.completed = outcome.completed;
        report.resources = resources;
        report.snapshot_hash = Some(hash);
        report.record = Some(next);
        Ok(report)
    }

    async fn unlock(&self, husk: &str, lock_id: &str) {
        if let Err(e) = self.store.release_lock(husk, lock_id).await {
            warn!("Failed to release the lock of {husk}: {e}");
        }
    }
}

impl std::fmt::Debug for ApplyOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyOptions")
            .field("dry_run", &self.dry_run)
            .field("review", &self.review.is_some())
            .finish()
    }
}

fn check_name(husk: &str) -> Result<()> {
    if is_valid_husk_name(husk) {
        Ok(())
    } else {
        Err(ConfigError::InvalidHuskName { name: husk.to_string() }.into())
    }
}
