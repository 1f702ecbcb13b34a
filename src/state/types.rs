//! Deployment records.
//!
//! A deployment record is everything the engine remembers about a husk: the
//! latest snapshot, the arguments the target graph was last evaluated with,
//! and a short history of apply runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::planner::PlanSummary;
use crate::resource::{PropertyMap, Snapshot};

/// Current version of the record format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept per husk.
pub const MAX_HISTORY: usize = 100;

/// The persisted record of one husk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Record format version.
    pub version: String,
    /// Husk name.
    pub husk: String,
    /// Snapshot written by the most recent apply.
    #[serde(default)]
    pub latest: Snapshot,
    /// Arguments of the last evaluated target graph.
    #[serde(default)]
    pub args: PropertyMap,
    /// When the record was last written.
    pub last_updated: DateTime<Utc>,
    /// Apply history, oldest first.
    #[serde(default)]
    pub history: Vec<DeploymentHistoryEntry>,
}

/// A single entry in the deployment history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHistoryEntry {
    /// When the apply finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: DeploymentOperation,
    /// Fingerprint of the snapshot the apply produced.
    pub snapshot_hash: String,
    /// Step counts of the executed plan.
    #[serde(default)]
    pub summary: PlanSummary,
    /// Number of steps that completed.
    #[serde(default)]
    pub completed: usize,
    /// Whether the apply succeeded.
    pub success: bool,
    /// Whether a failure left remote state unknown.
    #[serde(default)]
    pub maybe_corrupt: bool,
    /// Error message of a failed apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Types of deployment operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOperation {
    /// Converge towards a target graph.
    Deploy,
    /// Delete everything.
    Destroy,
}

impl Deployment {
    /// Creates an empty record for a freshly initialized husk.
    #[must_use]
    pub fn new(husk: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            husk: husk.to_string(),
            latest: Snapshot::empty(),
            args: PropertyMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Builds the record that replaces this one after an apply.
    ///
    /// The receiver is left untouched; history is carried over and capped.
    #[must_use]
    pub fn advance(&self, latest: Snapshot, args: PropertyMap, entry: DeploymentHistoryEntry) -> Self {
        let mut next = Self {
            version: STATE_VERSION.to_string(),
            husk: self.husk.clone(),
            latest,
            args,
            last_updated: Utc::now(),
            history: self.history.clone(),
        };
        next.add_history(entry);
        next
    }

    /// Adds a history entry, dropping the oldest past the cap.
    pub fn add_history(&mut self, entry: DeploymentHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            let excess = self.history.len() + 1 - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.history.push(entry);
    }

    /// Checks that the record was written by a compatible version.
    ///
    /// # Errors
    ///
    /// Returns `VersionMismatch` if the major version differs.
    pub fn check_version(&self) -> Result<(), StateError> {
        let major = |v: &str| v.split('.').next().unwrap_or_default().to_string();
        if major(&self.version) == major(STATE_VERSION) {
            Ok(())
        } else {
            Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: self.version.clone(),
            })
        }
    }

    /// Number of resources in the latest snapshot.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.latest.len()
    }

    /// The most recent history entry.
    #[must_use]
    pub fn last_entry(&self) -> Option<&DeploymentHistoryEntry> {
        self.history.last()
    }
}

impl DeploymentHistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: DeploymentOperation, snapshot_hash: &str, summary: PlanSummary, completed: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            snapshot_hash: snapshot_hash.to_string(),
            summary,
            completed,
            success: true,
            maybe_corrupt: false,
            error: None,
        }
    }

    /// Marks the entry as failed.
    #[must_use]
    pub fn failed(mut self, error: &str, maybe_corrupt: bool) -> Self {
        self.success = false;
        self.maybe_corrupt = maybe_corrupt;
        self.error = Some(error.to_string());
        self
    }
}

impl std::fmt::Display for DeploymentOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Deploy => "deploy",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
