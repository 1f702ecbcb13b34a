//! Resource provider boundary.
//!
//! Providers implement create/read/update/delete for resource types and are
//! reached through the [`Provider`] trait. The engine selects one per
//! resource through a [`ProviderRegistry`].

mod http;
mod registry;
mod traits;

pub use http::{DEFAULT_TIMEOUT_SECS, HttpProvider};
pub use registry::ProviderRegistry;
#[cfg(test)]
pub use traits::MockProvider;
pub use traits::{CheckFailure, CheckResult, CreateResult, Provider};
