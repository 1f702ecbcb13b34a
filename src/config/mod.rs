//! Engine configuration.
//!
//! This module handles all configuration-related functionality:
//! - Parsing `husk.yaml` and `HUSK_*` environment overrides
//! - Validation of configuration values
//! - Fingerprinting snapshots for deployment history

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::SnapshotHasher;
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use spec::{EngineConfig, ProviderConfig, StateBackend, StateConfig};
pub use self::validator::{ConfigValidator, ValidationError, ValidationResult, is_valid_husk_name};
