//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{SnapshotHasher, ValidationResult};
use crate::diag::{Diagnostics, Severity};
use crate::error::{ProviderError, ResourceState};
use crate::planner::{ApplyProgress, Plan, PlanSummary, ProgressSink, Step, StepOp};
use crate::reconciler::ApplyReport;
use crate::state::{Deployment, LockInfo};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// One line of `husk ls`.
#[derive(Debug, Clone, Serialize)]
pub struct HuskListing {
    /// Husk name.
    pub husk: String,
    /// Resources in the latest snapshot.
    pub resources: usize,
    /// When the record was last written.
    pub last_updated: DateTime<Utc>,
    /// Outcome of the most recent apply, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<bool>,
    /// Holder of a live lock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
}

/// Plan step row for table display.
#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    type_token: String,
    #[tabled(rename = "Changes")]
    changes: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    type_token: String,
    #[tabled(rename = "ID")]
    id: String,
}

/// Husk row for table display.
#[derive(Tabled)]
struct HuskRow {
    #[tabled(rename = "Husk")]
    husk: String,
    #[tabled(rename = "Resources")]
    resources: usize,
    #[tabled(rename = "Last apply")]
    last_apply: String,
    #[tabled(rename = "Updated")]
    updated: String,
    #[tabled(rename = "Lock")]
    lock: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true when output is meant for scripts.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, husk: &str, plan: &Plan, show_unchanged: bool, summary_only: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson::new(husk, plan, show_unchanged && !summary_only))
                    .unwrap_or_default()
            }
            OutputFormat::Text if summary_only => format!("{}\n", Self::format_summary(&plan.summary())),
            OutputFormat::Text => Self::format_plan_text(husk, plan, show_unchanged),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(husk: &str, plan: &Plan, show_unchanged: bool) -> String {
        let mut output = String::new();

        let hash = SnapshotHasher::new().hash_snapshot(plan.new());
        let _ = write!(output, "\nPlan for husk {}\n", husk.bold());
        let _ = write!(output, "   Target hash: {}\n\n", SnapshotHasher::short_hash(&hash));

        if plan.is_empty() {
            let _ = writeln!(output, "{} No changes required - husk is up to date.", "✓".green());
        } else {
            let rows: Vec<StepRow> = plan
                .steps()
                .iter()
                .enumerate()
                .map(|(i, step)| StepRow {
                    index: i + 1,
                    action: Self::format_op(step.op()),
                    resource: step.moniker().name().to_string(),
                    type_token: step.resource().type_token.to_string(),
                    changes: Self::truncate(&Self::changed_keys(step).join(", "), 40),
                })
                .collect();

            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if show_unchanged && !plan.unchanged().is_empty() {
            let _ = writeln!(output, "\nUnchanged:");
            for resource in plan.unchanged() {
                let _ = writeln!(output, "   {} {}", "=".dimmed(), resource.moniker.name());
            }
        }

        let _ = writeln!(output, "\n{}", Self::format_summary(&plan.summary()));
        output
    }

    /// Formats the result of a deploy or destroy.
    #[must_use]
    pub fn format_report(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                if report.dry_run {
                    let _ = writeln!(
                        output,
                        "{} Dry run of {} on {}: nothing was applied.",
                        "ℹ".blue(),
                        report.operation,
                        report.husk
                    );
                    let _ = writeln!(output, "   {}", Self::format_summary(&report.summary));
                } else if !report.applied {
                    let _ = writeln!(output, "{} {} on {} was not applied.", "✗".yellow(), report.operation, report.husk);
                } else {
                    let _ = writeln!(output, "{} {} of {} complete", "✓".green(), report.operation, report.husk);
                    let _ = writeln!(output, "   Steps: {}", report.completed);
                    let _ = writeln!(output, "   Resources: {}", report.resources);
                    if let Some(hash) = &report.snapshot_hash {
                        let _ = writeln!(output, "   Snapshot: {}", SnapshotHasher::short_hash(hash));
                    }
                }
                output
            }
        }
    }

    /// Formats the record of a husk.
    #[must_use]
    pub fn format_deployment(&self, deployment: &Deployment, lock: Option<&LockInfo>) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "deployment": deployment, "lock": lock });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_deployment_text(deployment, lock),
        }
    }

    fn format_deployment_text(deployment: &Deployment, lock: Option<&LockInfo>) -> String {
        let mut output = String::new();

        let _ = write!(output, "\nHusk: {}\n\n", deployment.husk.bold());
        let _ = writeln!(output, "   Version: {}", deployment.version);
        let _ = writeln!(output, "   Last updated: {}", deployment.last_updated);
        let _ = writeln!(output, "   Resources: {}", deployment.resource_count());
        match lock {
            Some(lock) if !lock.is_expired() => {
                let _ = writeln!(output, "   Lock: {} ({}s left)", lock.holder.yellow(), lock.remaining_secs());
            }
            Some(lock) => {
                let _ = writeln!(output, "   Lock: {} (expired)", lock.holder.dimmed());
            }
            None => {}
        }

        if !deployment.latest.is_empty() {
            let rows: Vec<ResourceRow> = deployment
                .latest
                .iter()
                .map(|r| ResourceRow {
                    name: r.moniker.name().to_string(),
                    type_token: r.type_token.to_string(),
                    id: r.id.as_ref().map_or_else(|| "-".to_string(), |id| Self::truncate(id.as_str(), 24)),
                })
                .collect();
            output.push('\n');
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if !deployment.history.is_empty() {
            let _ = writeln!(output, "\n   Recent history ({}):", deployment.history.len());
            for entry in deployment.history.iter().rev().take(5) {
                let status = if entry.success {
                    "✓".green()
                } else if entry.maybe_corrupt {
                    "!".red()
                } else {
                    "✗".red()
                };
                let _ = writeln!(
                    output,
                    "     {status} {} - {} ({}, {} steps)",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.operation,
                    entry.summary,
                    entry.completed
                );
                if let Some(error) = &entry.error {
                    let _ = writeln!(output, "         {}", error.red());
                }
            }
        }

        output
    }

    /// Formats the husk list.
    #[must_use]
    pub fn format_husks(&self, husks: &[HuskListing]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(husks).unwrap_or_default(),
            OutputFormat::Text => {
                if husks.is_empty() {
                    return "No husks found.\n".to_string();
                }
                let rows: Vec<HuskRow> = husks
                    .iter()
                    .map(|h| HuskRow {
                        husk: h.husk.clone(),
                        resources: h.resources,
                        last_apply: match h.last_success {
                            Some(true) => "succeeded".green().to_string(),
                            Some(false) => "failed".red().to_string(),
                            None => "never".dimmed().to_string(),
                        },
                        updated: h.last_updated.format("%Y-%m-%d %H:%M").to_string(),
                        lock: h.locked_by.clone().unwrap_or_default(),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats collected diagnostics.
    #[must_use]
    pub fn format_diagnostics(&self, diag: &Diagnostics) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(diag.entries()).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                for entry in diag.entries() {
                    let label = match entry.severity {
                        Severity::Error => "error".red(),
                        Severity::Warning => "warning".yellow(),
                        Severity::Info => "info".blue(),
                    };
                    match &entry.subject {
                        Some(subject) => {
                            let _ = writeln!(output, "{label}: {subject}: {}", entry.message);
                        }
                        None => {
                            let _ = writeln!(output, "{label}: {}", entry.message);
                        }
                    }
                }
                output
            }
        }
    }

    /// Formats the outcome of `husk validate`.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, resources: Option<usize>) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.errors.is_empty(),
                    "warnings": result.warnings,
                    "resources": resources,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!("{} Configuration is valid!\n", "✓".green());
                if let Some(count) = resources {
                    let _ = writeln!(output, "{} Target graph is valid ({count} resources)", "✓".green());
                }
                if !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats a one-line status message.
    #[must_use]
    pub fn message(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "success", "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✓".green()),
        }
    }

    /// Formats summary counts with color.
    fn format_summary(summary: &PlanSummary) -> String {
        format!(
            "Plan: {} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            summary.creates.to_string().green(),
            summary.updates.to_string().yellow(),
            summary.replaces.to_string().magenta(),
            summary.deletes.to_string().red(),
            summary.unchanged
        )
    }

    /// Formats a step operation with color.
    fn format_op(op: StepOp) -> String {
        match op {
            StepOp::Create => "+create".green().to_string(),
            StepOp::Update => "~update".yellow().to_string(),
            StepOp::Delete => "-delete".red().to_string(),
            StepOp::CreateReplacement => "+-replace".magenta().to_string(),
            StepOp::DeleteReplaced => "-+replaced".magenta().to_string(),
        }
    }

    fn changed_keys(step: &Step) -> Vec<String> {
        match step {
            Step::Update { diff, .. } => diff.changed_keys().iter().map(ToString::to_string).collect(),
            _ => Vec::new(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

/// Progress sink that echoes every step to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    inner: ApplyProgress,
}

impl ConsoleProgress {
    /// Creates a new console sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts gathered so far.
    #[must_use]
    pub const fn progress(&self) -> &ApplyProgress {
        &self.inner
    }
}

impl ProgressSink for ConsoleProgress {
    fn before(&mut self, step: &Step) {
        self.inner.before(step);
        eprintln!("   {} {}", OutputFormatter::format_op(step.op()), step.moniker().name());
    }

    fn after(&mut self, step: &Step, error: Option<&ProviderError>, state: ResourceState) {
        self.inner.after(step, error, state);
        match error {
            None => eprintln!("   {} {}", "✓".green(), step.moniker().name()),
            Some(e) if state == ResourceState::Unknown => {
                eprintln!("   {} {}: {e}", "✗".red(), step.moniker().name());
                eprintln!(
                    "\n{} The state of {} is unknown. The provider may have changed it before failing; \
                     inspect it and repair the husk record before deploying again.",
                    "error:".red().bold(),
                    step.moniker()
                );
            }
            Some(e) => eprintln!("   {} {}: {e}", "✗".red(), step.moniker().name()),
        }
    }
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    husk: String,
    target_hash: String,
    summary: PlanSummary,
    steps: Vec<StepJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unchanged: Option<Vec<String>>,
}

#[derive(Serialize)]
struct StepJson {
    op: StepOp,
    moniker: String,
    #[serde(rename = "type")]
    type_token: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    changes: Vec<String>,
}

impl PlanJson {
    fn new(husk: &str, plan: &Plan, show_unchanged: bool) -> Self {
        Self {
            husk: husk.to_string(),
            target_hash: SnapshotHasher::new().hash_snapshot(plan.new()),
            summary: plan.summary(),
            steps: plan
                .steps()
                .iter()
                .map(|step| StepJson {
                    op: step.op(),
                    moniker: step.moniker().to_string(),
                    type_token: step.resource().type_token.to_string(),
                    changes: OutputFormatter::changed_keys(step),
                })
                .collect(),
            unchanged: show_unchanged
                .then(|| plan.unchanged().iter().map(|r| r.moniker.to_string()).collect()),
        }
    }
}
