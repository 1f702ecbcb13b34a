//! Configuration validation.
//!
//! Field-level rules come from the `validator` derive on the config types;
//! cross-field rules (unique packages, backend requirements) live here.

use std::collections::HashSet;

use tracing::debug;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::{ConfigError, HuskError, Result};

use super::spec::{EngineConfig, StateBackend};

/// Longest accepted husk name.
pub const MAX_HUSK_NAME_LEN: usize = 63;

/// Validator for engine configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates an engine configuration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found; a duplicated package is reported as
    /// [`ConfigError::DuplicateProvider`].
    pub fn validate(&self, config: &EngineConfig) -> Result<ValidationResult> {
        let mut result = Self::check(config);

        if let Some(package) = Self::duplicate_package(config) {
            return Err(HuskError::Config(ConfigError::DuplicateProvider { package }));
        }

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = result.errors.remove(0);
            Err(HuskError::Config(ConfigError::ValidationError {
                message: first_error.message,
                field: Some(first_error.field),
            }))
        }
    }

    /// Collects every problem without failing.
    #[must_use]
    pub fn check(config: &EngineConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(errors) = config.validate() {
            collect_derive_errors("", &errors, &mut result);
        }
        Self::validate_state(config, &mut result);
        Self::validate_providers(config, &mut result);

        result
    }

    fn validate_state(config: &EngineConfig, result: &mut ValidationResult) {
        let state = &config.state;
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("state.bucket"),
                        message: String::from("S3 bucket name is required when using S3 backend"),
                    });
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() || state.prefix.is_some() || state.region.is_some() {
                    result
                        .warnings
                        .push(String::from("state: S3 settings are ignored by the local backend"));
                }
            }
        }
    }

    fn validate_providers(config: &EngineConfig, result: &mut ValidationResult) {
        if config.providers.is_empty() {
            result.warnings.push(String::from("No providers configured"));
        }

        let mut seen = HashSet::new();
        for (i, provider) in config.providers.iter().enumerate() {
            let field = format!("providers[{i}].package");
            if !provider.package.is_empty() && !is_valid_name(&provider.package) {
                result.errors.push(ValidationError {
                    field: field.clone(),
                    message: format!(
                        "Package '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        provider.package
                    ),
                });
            }
            if !seen.insert(provider.package.as_str()) {
                result.errors.push(ValidationError {
                    field,
                    message: format!("Duplicate provider for package: {}", provider.package),
                });
            }
        }
    }

    fn duplicate_package(config: &EngineConfig) -> Option<String> {
        let mut seen = HashSet::new();
        config
            .providers
            .iter()
            .find(|p| !seen.insert(p.package.as_str()))
            .map(|p| p.package.clone())
    }
}

/// Flattens derive errors into field paths.
fn collect_derive_errors(prefix: &str, errors: &ValidationErrors, result: &mut ValidationResult) {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    for (field, kind) in fields {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                for err in errs {
                    let message = err
                        .message
                        .as_ref()
                        .map_or_else(|| format!("invalid value ({})", err.code), ToString::to_string);
                    result.errors.push(ValidationError {
                        field: path.clone(),
                        message,
                    });
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_derive_errors(&path, inner, result),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_derive_errors(&format!("{path}[{index}]"), inner, result);
                }
            }
        }
    }
}

/// Checks a husk name: lowercase alphanumeric with single hyphens, starting
/// with a letter.
#[must_use]
pub fn is_valid_husk_name(name: &str) -> bool {
    name.len() <= MAX_HUSK_NAME_LEN && is_valid_name(name)
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    fn provider(package: &str) -> ProviderConfig {
        ProviderConfig {
            package: package.to_string(),
            endpoint: "http://localhost:7001".to_string(),
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_valid_husk_name() {
        assert!(is_valid_husk_name("web"));
        assert!(is_valid_husk_name("prod-eu-1"));
        assert!(is_valid_husk_name("a"));
    }

    #[test]
    fn test_invalid_husk_name() {
        assert!(!is_valid_husk_name(""));
        assert!(!is_valid_husk_name("Web")); // uppercase
        assert!(!is_valid_husk_name("1web")); // starts with number
        assert!(!is_valid_husk_name("web_1")); // underscore
        assert!(!is_valid_husk_name("web-")); // ends with hyphen
        assert!(!is_valid_husk_name("web--1")); // consecutive hyphens
        assert!(!is_valid_husk_name("../web"));
        assert!(!is_valid_husk_name(&"a".repeat(MAX_HUSK_NAME_LEN + 1)));
    }

    #[test]
    fn test_default_config_warns_without_providers() {
        let result = ConfigValidator::new().validate(&EngineConfig::default()).expect("valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_s3_requires_bucket() {
        let mut config = EngineConfig::default();
        config.state.backend = StateBackend::S3;

        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("bucket"));

        config.state.bucket = Some("husk-state".to_string());
        assert!(ConfigValidator::new().validate(&config).is_ok());
    }

    #[test]
    fn test_duplicate_provider() {
        let config = EngineConfig {
            providers: vec![provider("aws"), provider("aws")],
            ..EngineConfig::default()
        };

        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(matches!(
            err,
            HuskError::Config(ConfigError::DuplicateProvider { ref package }) if package == "aws"
        ));
    }

    #[test]
    fn test_derive_errors_carry_field_paths() {
        let mut bad = provider("aws");
        bad.endpoint = "nope".to_string();
        let config = EngineConfig {
            providers: vec![bad, provider("Bad_Package")],
            lock_expiry_secs: 0,
            ..EngineConfig::default()
        };

        let result = ConfigValidator::check(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"lock_expiry_secs"));
        assert!(fields.contains(&"providers[0].endpoint"));
        assert!(fields.contains(&"providers[1].package"));
    }
}
