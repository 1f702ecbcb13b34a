//! The resource provider capability set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::resource::{ObjectDiff, PropertyKey, PropertyMap, ResourceId, TypeToken};

/// A single field-level validation failure reported by `check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    /// The offending property.
    pub property: PropertyKey,
    /// Why the value was rejected.
    pub reason: String,
}

/// Result of validating candidate properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// The normalized candidate properties.
    #[serde(default)]
    pub properties: PropertyMap,
    /// Every field that failed validation.
    #[serde(default)]
    pub failures: Vec<CheckFailure>,
}

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResult {
    /// The provider-assigned ID.
    pub id: ResourceId,
    /// Computed output properties.
    #[serde(default)]
    pub outputs: PropertyMap,
}

/// Operations a resource provider implements.
///
/// One provider may serve many resource types; every call names the type
/// it is about. `check`, `name`, `get` and `inspect_change` must not mutate
/// remote state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Validates and normalizes candidate properties.
    async fn check(
        &self,
        type_token: &TypeToken,
        properties: &PropertyMap,
    ) -> Result<CheckResult, ProviderError>;

    /// Derives a logical name for a resource that was not given one.
    async fn name(
        &self,
        type_token: &TypeToken,
        properties: &PropertyMap,
    ) -> Result<String, ProviderError>;

    /// Creates a resource.
    async fn create(
        &self,
        type_token: &TypeToken,
        properties: &PropertyMap,
    ) -> Result<CreateResult, ProviderError>;

    /// Reads the current properties of an existing resource.
    async fn get(
        &self,
        type_token: &TypeToken,
        id: &ResourceId,
    ) -> Result<PropertyMap, ProviderError>;

    /// Returns the changed properties that cannot be updated in place.
    async fn inspect_change(
        &self,
        type_token: &TypeToken,
        id: &ResourceId,
        olds: &PropertyMap,
        news: &PropertyMap,
        diff: &ObjectDiff,
    ) -> Result<Vec<PropertyKey>, ProviderError>;

    /// Updates a resource in place.
    async fn update(
        &self,
        type_token: &TypeToken,
        id: &ResourceId,
        olds: &PropertyMap,
        news: &PropertyMap,
        diff: &ObjectDiff,
    ) -> Result<(), ProviderError>;

    /// Deletes a resource.
    async fn delete(&self, type_token: &TypeToken, id: &ResourceId) -> Result<(), ProviderError>;
}

impl CheckResult {
    /// A passing result that keeps the candidate as is.
    #[must_use]
    pub const fn ok(properties: PropertyMap) -> Self {
        Self {
            properties,
            failures: Vec::new(),
        }
    }

    /// Returns true if no field failed.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

impl CheckFailure {
    /// Creates a failure for a property.
    #[must_use]
    pub fn new(property: impl Into<PropertyKey>, reason: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.property, self.reason)
    }
}
