//! Error types for the Husk deployment engine.
//!
//! This module provides the error hierarchy for every phase of a deployment:
//! configuration, snapshot construction, planning, applying, provider calls,
//! and state persistence.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for the Husk engine.
#[derive(Debug, Error)]
pub enum HuskError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Snapshot graph construction errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Apply errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// A resource provider failed outside of an apply walk.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Two provider entries claim the same package.
    #[error("Duplicate provider for package: {package}")]
    DuplicateProvider {
        /// The duplicated package name.
        package: String,
    },

    /// A husk name does not follow the naming convention.
    #[error("Invalid husk name: {name}")]
    InvalidHuskName {
        /// The rejected name.
        name: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// No deployment record exists for the husk.
    #[error("Husk '{husk}' has not been initialized")]
    NotFound {
        /// Name of the husk.
        husk: String,
    },

    /// A deployment record already exists for the husk.
    #[error("Husk '{husk}' already exists")]
    AlreadyExists {
        /// Name of the husk.
        husk: String,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Local filesystem failure.
    #[error("State IO error: {message}")]
    Io {
        /// Description of the IO failure.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },

    /// The file extension does not map to a known markup encoding.
    #[error("Unsupported record encoding: '{extension}'")]
    UnsupportedEncoding {
        /// The offending extension.
        extension: String,
    },
}

/// Errors raised while building or validating a snapshot's dependency graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Two resources share a moniker.
    #[error("Duplicate resource moniker: {moniker}")]
    DuplicateMoniker {
        /// The duplicated moniker.
        moniker: String,
    },

    /// Two target graph nodes share a key.
    #[error("Duplicate target graph key: {key}")]
    DuplicateKey {
        /// The duplicated key.
        key: String,
    },

    /// A resource references a moniker that does not exist.
    #[error("Resource {from} references unknown resource {to}")]
    UnknownReference {
        /// The referencing resource.
        from: String,
        /// The missing reference target.
        to: String,
    },

    /// A resource references a moniker that only appears later in the snapshot.
    #[error("Resource {from} references {to}, which appears later in the snapshot")]
    ForwardReference {
        /// The referencing resource.
        from: String,
        /// The reference target.
        to: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Circular dependency detected between: {monikers}")]
    Cycle {
        /// Monikers of the resources left unsorted by the cycle.
        monikers: String,
    },

    /// A type token is malformed.
    #[error("Invalid type token: '{token}'")]
    InvalidTypeToken {
        /// The rejected token.
        token: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// One or more resources failed provider validation.
    #[error("{failures} resource validation failure(s); no plan was produced")]
    ValidationFailed {
        /// Number of field failures collected.
        failures: usize,
    },

    /// No provider is registered for a resource type.
    #[error("No provider registered for resource type {type_token}")]
    ProviderNotFound {
        /// The unresolved type token.
        type_token: String,
    },

    /// A read-only provider call made during planning failed.
    #[error("Provider {operation} failed for {moniker}: {source}")]
    ProviderCall {
        /// The resource being planned.
        moniker: String,
        /// The provider operation name.
        operation: &'static str,
        /// The provider failure.
        source: ProviderError,
    },
}

/// Apply errors, produced once the checkpoint has been handled.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A step failed and halted the apply walk.
    #[error("Step #{step} ({op} {moniker}) failed [{state}]: {message}")]
    StepFailed {
        /// One-based index of the failed step.
        step: usize,
        /// Operation of the failed step.
        op: String,
        /// Moniker of the resource the step touched.
        moniker: String,
        /// Resource state reported with the failure.
        state: ResourceState,
        /// Provider failure description.
        message: String,
    },
}

/// Whether a failed provider operation left remote state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    /// The provider guarantees no partial effect.
    #[default]
    Recovered,
    /// The provider cannot vouch for remote state.
    Unknown,
}

/// A failure reported across the provider boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    /// Description of the failure.
    pub message: String,
    /// Resource state classification.
    pub state: ResourceState,
}

/// Result type alias for Husk operations.
pub type Result<T> = std::result::Result<T, HuskError>;

impl HuskError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the caller may safely retry the operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::State(StateError::LockFailed { .. } | StateError::LockedByOther { .. })
                | Self::Apply(ApplyError::StepFailed {
                    state: ResourceState::Recovered,
                    ..
                })
        )
    }

    /// Returns true if the error signals possibly corrupt remote state.
    #[must_use]
    pub const fn is_maybe_corrupt(&self) -> bool {
        matches!(
            self,
            Self::Apply(ApplyError::StepFailed {
                state: ResourceState::Unknown,
                ..
            })
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local IO error with the given message.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a failure that left remote state untouched.
    #[must_use]
    pub fn recovered(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            state: ResourceState::Recovered,
        }
    }

    /// Creates a failure with unknown remote state.
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            state: ResourceState::Unknown,
        }
    }

    /// Returns true if the failure may have left remote state inconsistent.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self.state, ResourceState::Unknown)
    }
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Recovered => "recovered",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}
