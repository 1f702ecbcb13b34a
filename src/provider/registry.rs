//! Dispatch from resource type tokens to providers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::http::HttpProvider;
use super::traits::Provider;
use crate::config::EngineConfig;
use crate::error::{PlanError, Result};
use crate::resource::TypeToken;

/// Maps type tokens to providers.
///
/// An exact type registration wins over a registration for the token's
/// package.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    by_type: HashMap<TypeToken, Arc<dyn Provider>>,
    by_package: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry with one HTTP provider per configured package.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let mut registry = Self::new();
        for entry in &config.providers {
            let provider = HttpProvider::new(&entry.endpoint, entry.timeout_secs)?;
            debug!(package = %entry.package, endpoint = %entry.endpoint, "Registered provider");
            registry.register_package(&entry.package, Arc::new(provider));
        }
        Ok(registry)
    }

    /// Registers a provider for every type of a package.
    pub fn register_package(&mut self, package: &str, provider: Arc<dyn Provider>) {
        self.by_package.insert(package.to_string(), provider);
    }

    /// Registers a provider for one exact type.
    pub fn register_type(&mut self, type_token: TypeToken, provider: Arc<dyn Provider>) {
        self.by_type.insert(type_token, provider);
    }

    /// Looks up the provider for a type.
    #[must_use]
    pub fn get(&self, type_token: &TypeToken) -> Option<Arc<dyn Provider>> {
        self.by_type
            .get(type_token)
            .or_else(|| self.by_package.get(type_token.package()))
            .cloned()
    }

    /// Looks up the provider for a type, failing if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::ProviderNotFound`] for unregistered types.
    pub fn resolve(&self, type_token: &TypeToken) -> std::result::Result<Arc<dyn Provider>, PlanError> {
        self.get(type_token).ok_or_else(|| PlanError::ProviderNotFound {
            type_token: type_token.to_string(),
        })
    }

    /// Registered package names, sorted.
    #[must_use]
    pub fn packages(&self) -> Vec<&str> {
        let mut packages: Vec<&str> = self.by_package.keys().map(String::as_str).collect();
        packages.sort_unstable();
        packages
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty() && self.by_package.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.by_type.keys().map(TypeToken::as_str).collect();
        types.sort_unstable();
        f.debug_struct("ProviderRegistry")
            .field("types", &types)
            .field("packages", &self.packages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    #[tokio::test]
    async fn test_exact_type_wins_over_package() {
        let mut package = MockProvider::new();
        package
            .expect_delete()
            .returning(|_, _| Err(crate::error::ProviderError::recovered("package")));
        let mut exact = MockProvider::new();
        exact.expect_delete().returning(|_, _| Ok(()));

        let mut registry = ProviderRegistry::new();
        registry.register_package("aws", Arc::new(package));
        registry.register_type(TypeToken::from("aws:s3/object:Object"), Arc::new(exact));
        let id = crate::resource::ResourceId::from("x");

        let object_type = TypeToken::from("aws:s3/object:Object");
        let object = registry.resolve(&object_type).expect("exact");
        assert!(object.delete(&object_type, &id).await.is_ok());

        let bucket_type = TypeToken::from("aws:s3/bucket:Bucket");
        let bucket = registry.resolve(&bucket_type).expect("package");
        assert!(bucket.delete(&bucket_type, &id).await.is_err());
        assert_eq!(registry.packages(), vec!["aws"]);
    }

    #[test]
    fn test_unknown_package() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.resolve(&TypeToken::from("gcp:storage:Bucket")),
            Err(PlanError::ProviderNotFound { .. })
        ));
    }
}
