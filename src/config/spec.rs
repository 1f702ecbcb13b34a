//! Configuration types for the engine.
//!
//! These structs map to `husk.yaml`: where husk records live, how they are
//! stored, and which endpoint serves each provider package.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::provider::DEFAULT_TIMEOUT_SECS;
use crate::state::{Encoding, LOCK_EXPIRY_SECS};

/// The root engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct EngineConfig {
    /// Directory holding the `husks/` record directory.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider endpoints, one per package.
    #[serde(default)]
    #[validate(nested)]
    pub providers: Vec<ProviderConfig>,
    /// Lifetime of husk locks in seconds.
    #[serde(default = "default_lock_expiry")]
    #[validate(range(min = 1, message = "lock expiry must be at least one second"))]
    pub lock_expiry_secs: i64,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Encoding of newly created records.
    #[serde(default)]
    pub format: Encoding,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Endpoint serving one provider package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ProviderConfig {
    /// Package name, the first segment of type tokens.
    #[validate(length(min = 1, message = "provider package cannot be empty"))]
    pub package: String,
    /// Base URL of the provider endpoint.
    #[validate(url(message = "provider endpoint must be a URL"))]
    pub endpoint: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    #[validate(range(min = 1, max = 3600, message = "timeout must be between 1 and 3600 seconds"))]
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            state: StateConfig::default(),
            providers: Vec::new(),
            lock_expiry_secs: default_lock_expiry(),
        }
    }
}

impl EngineConfig {
    /// Directory holding local husk records.
    #[must_use]
    pub fn husks_dir(&self) -> PathBuf {
        self.workspace.join(crate::state::HUSKS_DIR)
    }

    /// Provider entry for a package.
    #[must_use]
    pub fn provider(&self, package: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.package == package)
    }
}

impl std::fmt::Display for StateBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Local => "local",
            Self::S3 => "s3",
        };
        write!(f, "{s}")
    }
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

const fn default_lock_expiry() -> i64 {
    LOCK_EXPIRY_SECS
}

const fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
