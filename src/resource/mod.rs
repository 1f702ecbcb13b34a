//! Resource model: property values, structural diffs, resources and
//! snapshots.

mod diff;
mod graph;
mod property;
#[allow(clippy::module_inception)]
mod resource;
mod snapshot;
mod tokens;

pub use diff::{ArrayDiff, ObjectDiff, ValueDiff, diff_objects};
pub use graph::{GraphNode, SnapshotBuilder, TargetGraph};
pub use property::{PropertyKey, PropertyMap, PropertyValue, REFERENCE_KEY};
pub use resource::Resource;
pub use snapshot::Snapshot;
pub use tokens::{Moniker, ResourceId, TypeToken};
