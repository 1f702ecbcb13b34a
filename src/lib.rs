// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // Public items should be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Husk
//!
//! A reconciliation engine for declared infrastructure.
//!
//! ## Overview
//!
//! A husk is a named deployment target. Each husk records the snapshot of
//! resources its last apply produced. Given a new target graph, husk:
//!
//! - Validates and names every declared resource through its provider
//! - Orders resources so that dependencies come first
//! - Diffs the recorded snapshot against the target and builds a plan of
//!   creates, updates, replacements and deletes
//! - Applies the plan one step at a time and records a checkpoint, even when
//!   a step fails part way
//!
//! ## Architecture
//!
//! 1. **Target graph**: An evaluated document of resource declarations
//! 2. **Snapshot**: Dependency-ordered resources, as recorded or as desired
//! 3. **Plan**: Steps turning the old snapshot into the new one
//! 4. **Providers**: Remote services implementing create/update/delete
//!
//! ## Modules
//!
//! - [`resource`]: Property values, diffs, resources and snapshots
//! - [`planner`]: Plan construction and the apply executor
//! - [`provider`]: Provider trait, registry and HTTP adapter
//! - [`state`]: Husk records and locks (local, S3)
//! - [`reconciler`]: Lock, plan, apply and persist a husk
//! - [`config`]: Configuration parsing and validation
//! - [`diag`]: Diagnostics of a single run
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! args:
//!   stage: dev
//! resources:
//!   - key: assets
//!     type: "cloud:storage:Bucket"
//!     properties:
//!       region: eu
//!   - key: index
//!     type: "cloud:storage:Object"
//!     name: index.html
//!     properties:
//!       bucket: { "$ref": assets }
//!       body: "<h1>hello</h1>"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod diag;
pub mod error;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod resource;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{ConfigParser, ConfigValidator, EngineConfig, SnapshotHasher};
pub use diag::Diagnostics;
pub use error::{HuskError, Result};
pub use planner::{Plan, PlanExecutor, Planner, ProgressSink};
pub use provider::{Provider, ProviderRegistry};
pub use reconciler::{ApplyOptions, ApplyReport, Reconciler};
pub use resource::{PropertyMap, PropertyValue, Resource, Snapshot, TargetGraph};
pub use state::{Deployment, LocalStateStore, S3StateStore, StateStore};
