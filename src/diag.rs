//! Diagnostics collected during a single engine run.
//!
//! A [`Diagnostics`] value is created once per command and passed by mutable
//! reference into whatever needs to report. Every entry is also emitted as a
//! `tracing` event.

use serde::Serialize;
use tracing::{error, info, warn};

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational note.
    Info,
    /// Something suspicious that does not stop the run.
    Warning,
    /// A failure; the run cannot produce a result.
    Error,
}

/// A single reported diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Severity.
    pub severity: Severity,
    /// What the diagnostic is about, usually a target graph key or moniker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Human readable message.
    pub message: String,
}

/// Accumulates diagnostics for one run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Creates an empty context.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Records an error.
    pub fn error(&mut self, subject: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        error!(subject = subject.unwrap_or_default(), "{message}");
        self.push(Severity::Error, subject, message);
    }

    /// Records a warning.
    pub fn warning(&mut self, subject: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        warn!(subject = subject.unwrap_or_default(), "{message}");
        self.push(Severity::Warning, subject, message);
    }

    /// Records an informational note.
    pub fn info(&mut self, subject: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        info!(subject = subject.unwrap_or_default(), "{message}");
        self.push(Severity::Info, subject, message);
    }

    fn push(&mut self, severity: Severity, subject: Option<&str>, message: String) {
        self.entries.push(Diagnostic {
            severity,
            subject: subject.map(ToString::to_string),
            message,
        });
    }

    /// Returns true if no errors were recorded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.error_count() == 0
    }

    /// Number of errors recorded.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    /// Number of warnings recorded.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|d| d.severity == severity).count()
    }

    /// All entries, in the order they were recorded.
    #[must_use]
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "{}: {subject}: {}", self.severity, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_success() {
        let mut diag = Diagnostics::new();
        assert!(diag.success());
        assert!(diag.is_empty());

        diag.info(None, "starting");
        diag.warning(Some("web"), "no tags");
        assert!(diag.success());

        diag.error(Some("web"), "size: must be positive");
        diag.error(Some("db"), "engine: unsupported");
        assert!(!diag.success());
        assert_eq!(diag.error_count(), 2);
        assert_eq!(diag.warning_count(), 1);
        assert_eq!(diag.entries().len(), 4);
    }

    #[test]
    fn test_display() {
        let mut diag = Diagnostics::new();
        diag.error(Some("web"), "size: must be positive");
        diag.warning(None, "empty graph");
        let lines: Vec<String> = diag.entries().iter().map(ToString::to_string).collect();
        assert_eq!(lines, vec!["error: web: size: must be positive", "warning: empty graph"]);
    }
}
