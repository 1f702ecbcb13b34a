//! Identity tokens for resources: monikers, provider IDs and type tokens.

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Separator between the segments of a moniker.
const MONIKER_SEPARATOR: &str = "::";

/// Stable logical identity of a resource within a husk.
///
/// A moniker has the shape `husk::package:module:Kind::name` and survives
/// across deployments, unlike the provider-assigned [`ResourceId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Moniker(String);

/// Provider-assigned identifier, known only after a successful create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

/// Resource type token of the form `package:module:Kind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeToken(String);

impl Moniker {
    /// Mints the moniker for a named resource of a type inside a husk.
    #[must_use]
    pub fn new(husk: &str, type_token: &TypeToken, name: &str) -> Self {
        Self(format!(
            "{husk}{MONIKER_SEPARATOR}{type_token}{MONIKER_SEPARATOR}{name}"
        ))
    }

    /// Returns the moniker as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the logical name segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0
            .rsplit_once(MONIKER_SEPARATOR)
            .map_or(self.0.as_str(), |(_, name)| name)
    }
}

impl ResourceId {
    /// Wraps a provider ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TypeToken {
    /// Parses and validates a type token.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidTypeToken`] unless the token has three
    /// non-empty, colon-separated segments.
    pub fn parse(token: &str) -> Result<Self, GraphError> {
        let candidate = Self(token.to_string());
        candidate.validate()?;
        Ok(candidate)
    }

    /// Checks the `package:module:Kind` shape.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidTypeToken`] for malformed tokens.
    pub fn validate(&self) -> Result<(), GraphError> {
        let parts: Vec<&str> = self.0.split(':').collect();
        if parts.len() == 3 && parts.iter().all(|p| !p.is_empty()) {
            Ok(())
        } else {
            Err(GraphError::InvalidTypeToken {
                token: self.0.clone(),
            })
        }
    }

    /// Returns the package segment, used to route to a provider.
    #[must_use]
    pub fn package(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    /// Returns the kind segment.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.0.rsplit(':').next().unwrap_or_default()
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Moniker {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Moniker {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for TypeToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for Moniker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for TypeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moniker_shape() {
        let ty = TypeToken::from("aws:s3/object:Object");
        let moniker = Moniker::new("prod", &ty, "logo");
        assert_eq!(moniker.as_str(), "prod::aws:s3/object:Object::logo");
        assert_eq!(moniker.name(), "logo");
    }

    #[test]
    fn test_type_token_segments() {
        let ty = TypeToken::parse("aws:s3/object:Object").expect("valid token");
        assert_eq!(ty.package(), "aws");
        assert_eq!(ty.kind(), "Object");
    }

    #[test]
    fn test_type_token_invalid() {
        assert!(TypeToken::parse("aws:Object").is_err());
        assert!(TypeToken::parse("aws::Object").is_err());
        assert!(TypeToken::parse("").is_err());
    }
}
