//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Husk - plan and apply resource graphs against providers.
#[derive(Parser, Debug)]
#[command(name = "husk")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "HUSK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log line format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: OutputFormat,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an empty husk.
    Init {
        /// Husk name.
        husk: String,
    },

    /// List husks.
    Ls,

    /// Validate the configuration and, optionally, a target graph.
    Validate {
        /// Target graph document to check against its providers.
        #[arg(short, long)]
        target: Option<PathBuf>,

        /// Husk the target graph is built for.
        #[arg(long, requires = "target")]
        husk: Option<String>,
    },

    /// Show the steps a deploy would run.
    Plan {
        /// Husk name.
        husk: String,

        /// Target graph document.
        #[arg(short, long)]
        target: PathBuf,

        /// Also list resources that stay as they are.
        #[arg(long)]
        show_unchanged: bool,

        /// Only print the step counts.
        #[arg(long, conflicts_with = "show_unchanged")]
        summary: bool,
    },

    /// Converge a husk towards a target graph.
    Deploy {
        /// Husk name.
        husk: String,

        /// Target graph document.
        #[arg(short, long)]
        target: PathBuf,

        /// Plan under the lock without applying.
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Also write the resulting record to this file (.json or .yaml).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete every resource of a husk, then the husk.
    Destroy {
        /// Husk name.
        husk: String,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Plan under the lock without applying.
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect and repair husk records.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the record of a husk.
    Show {
        /// Husk name.
        husk: String,
    },

    /// Remove the lock of a husk, whoever holds it.
    Unlock {
        /// Husk name.
        husk: String,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy() {
        let cli = Cli::try_parse_from([
            "husk", "deploy", "dev", "--target", "graph.yaml", "--yes", "--output", "out.json",
        ])
        .unwrap();

        match cli.command {
            Commands::Deploy { husk, target, dry_run, yes, output } => {
                assert_eq!(husk, "dev");
                assert_eq!(target, PathBuf::from("graph.yaml"));
                assert!(!dry_run);
                assert!(yes);
                assert_eq!(output, Some(PathBuf::from("out.json")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["husk", "ls", "--format", "json", "-v"]).unwrap();
        assert!(matches!(cli.command, Commands::Ls));
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.verbose);
    }

    #[test]
    fn test_plan_summary_conflicts_with_unchanged() {
        let result = Cli::try_parse_from([
            "husk", "plan", "dev", "-t", "g.json", "--summary", "--show-unchanged",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_state_unlock() {
        let cli = Cli::try_parse_from(["husk", "state", "unlock", "dev"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::State { command: StateCommands::Unlock { ref husk } } if husk == "dev"
        ));
    }

    #[test]
    fn test_validate_husk_requires_target() {
        assert!(Cli::try_parse_from(["husk", "validate", "--husk", "dev"]).is_err());
        assert!(Cli::try_parse_from(["husk", "validate"]).is_ok());
    }
}
