//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling. Environment
//! variables win over the file, the file wins over defaults.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, HuskError, Result};
use crate::state::Encoding;

use super::spec::{EngineConfig, StateBackend};

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["husk.yaml", "husk.yml"];

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "HUSK_";

/// Configuration parser for loading engine configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// A relative `workspace` is resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(HuskError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            HuskError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut config = self.parse_yaml(&content, Some(path))?;
        if config.workspace.is_relative()
            && let Some(dir) = path.parent()
        {
            config.workspace = dir.join(&config.workspace);
        }
        Ok(config)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<EngineConfig> {
        debug!("Parsing YAML configuration");

        // An empty document means all defaults.
        if content.trim().is_empty() {
            return Ok(EngineConfig::default());
        }

        let config: EngineConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            HuskError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Parsed configuration with {} provider(s)", config.providers.len());
        Ok(config)
    }

    /// Loads the configuration to use for a command.
    ///
    /// Uses `explicit` if given, otherwise searches upwards from the base
    /// path for a default file name, falling back to defaults when none
    /// exists. Environment overrides are applied last.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing or any file or
    /// override is invalid.
    pub fn resolve(&self, explicit: Option<&Path>) -> Result<EngineConfig> {
        let mut config = match explicit {
            Some(path) => self.load_file(path)?,
            None => {
                let start = self.base_dir()?;
                match find_config_file(&start) {
                    Ok(path) => self.load_file(path)?,
                    Err(_) => {
                        debug!("No configuration file found, using defaults");
                        let mut config = EngineConfig::default();
                        config.workspace = start;
                        config
                    }
                }
            }
        };

        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format:
    /// `HUSK_<SECTION>_<KEY>` (e.g., `HUSK_STATE_BUCKET`)
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// has an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies overrides from `lookup` to the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for unparseable override values.
    pub fn apply_env_overrides(
        config: &mut EngineConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        let var = |key: &str| lookup(&format!("{ENV_PREFIX}{key}"));

        if let Some(workspace) = var("WORKSPACE") {
            debug!("Overriding workspace from environment");
            config.workspace = PathBuf::from(workspace);
        }

        if let Some(backend) = var("STATE_BACKEND") {
            debug!("Overriding state.backend from environment");
            config.state.backend = match backend.to_ascii_lowercase().as_str() {
                "local" => StateBackend::Local,
                "s3" => StateBackend::S3,
                other => return Err(invalid_override("STATE_BACKEND", &format!("unknown backend '{other}'"))),
            };
        }

        if let Some(bucket) = var("STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Some(prefix) = var("STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Some(region) = var("STATE_REGION") {
            debug!("Overriding state.region from environment");
            config.state.region = Some(region);
        }

        if let Some(format) = var("STATE_FORMAT") {
            debug!("Overriding state.format from environment");
            config.state.format =
                Encoding::from_extension(&format).map_err(|e| invalid_override("STATE_FORMAT", &e.to_string()))?;
        }

        if let Some(expiry) = var("LOCK_EXPIRY_SECS") {
            debug!("Overriding lock_expiry_secs from environment");
            config.lock_expiry_secs = expiry
                .parse()
                .map_err(|e| invalid_override("LOCK_EXPIRY_SECS", &format!("{e}")))?;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                HuskError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    fn base_dir(&self) -> Result<PathBuf> {
        match &self.base_path {
            Some(path) => Ok(path.clone()),
            None => std::env::current_dir()
                .map_err(|e| HuskError::internal(format!("Cannot determine current directory: {e}"))),
        }
    }
}

fn invalid_override(key: &str, message: &str) -> HuskError {
    HuskError::Config(ConfigError::ParseError {
        message: format!("Invalid {ENV_PREFIX}{key}: {message}"),
        location: Some(String::from("environment")),
    })
}

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(HuskError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
