//! Markup encodings for stored records and target graph documents.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StateError;

/// Supported document encodings, picked by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// JSON, pretty printed.
    #[default]
    Json,
    /// YAML.
    Yaml,
}

impl Encoding {
    /// Detects the encoding from a path's extension.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UnsupportedEncoding`] for unknown extensions.
    pub fn from_path(path: &Path) -> Result<Self, StateError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::from_extension(extension)
    }

    /// Maps an extension (without the dot) to an encoding.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UnsupportedEncoding`] for unknown extensions.
    pub fn from_extension(extension: &str) -> Result<Self, StateError> {
        match extension.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(StateError::UnsupportedEncoding {
                extension: extension.to_string(),
            }),
        }
    }

    /// Canonical file extension.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }

    /// Serializes a value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::SerializationError`] on failure.
    pub fn marshal<T: Serialize>(self, value: &T) -> Result<String, StateError> {
        match self {
            Self::Json => serde_json::to_string_pretty(value).map_err(|e| StateError::serialization(e.to_string())),
            Self::Yaml => serde_yaml::to_string(value).map_err(|e| StateError::serialization(e.to_string())),
        }
    }

    /// Deserializes a value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::SerializationError`] on failure.
    pub fn unmarshal<T: DeserializeOwned>(self, content: &str) -> Result<T, StateError> {
        match self {
            Self::Json => serde_json::from_str(content).map_err(|e| StateError::serialization(e.to_string())),
            Self::Yaml => serde_yaml::from_str(content).map_err(|e| StateError::serialization(e.to_string())),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}
