//! CLI module for the husk tool.
//!
//! Argument definitions and terminal output; the command bodies live in
//! the binary.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::{ConsoleProgress, HuskListing, OutputFormatter};
