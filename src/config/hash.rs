//! Snapshot fingerprints.
//!
//! Deterministic SHA-256 hashing of snapshots and property maps, recorded
//! in deployment history to tell apply results apart.

use sha2::{Digest, Sha256};

use crate::resource::{PropertyMap, PropertyValue, Resource, Snapshot};

/// Length of the abbreviated hash shown to users.
pub const SHORT_HASH_LEN: usize = 12;

/// Hasher for computing snapshot fingerprints.
#[derive(Debug, Default)]
pub struct SnapshotHasher;

impl SnapshotHasher {
    /// Creates a new snapshot hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of a whole snapshot.
    ///
    /// Resource order is part of the fingerprint.
    #[must_use]
    pub fn hash_snapshot(&self, snapshot: &Snapshot) -> String {
        let mut hasher = Sha256::new();
        for resource in snapshot {
            hasher.update(self.hash_resource(resource).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource.
    #[must_use]
    pub fn hash_resource(&self, resource: &Resource) -> String {
        let mut hasher = Sha256::new();
        update_str(&mut hasher, resource.type_token.as_str());
        update_str(&mut hasher, resource.moniker.as_str());
        match &resource.id {
            Some(id) => update_str(&mut hasher, id.as_str()),
            None => hasher.update([0u8]),
        }
        update_map(&mut hasher, &resource.inputs);
        update_map(&mut hasher, &resource.outputs);
        hex::encode(hasher.finalize())
    }

    /// Computes a hash of a property map.
    #[must_use]
    pub fn hash_properties(&self, properties: &PropertyMap) -> String {
        let mut hasher = Sha256::new();
        update_map(&mut hasher, properties);
        hex::encode(hasher.finalize())
    }

    /// Returns a short version of a hash for display.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        hash.get(..SHORT_HASH_LEN).unwrap_or(hash)
    }
}

// Strings are length-prefixed so adjacent values cannot run together.
fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn update_map(hasher: &mut Sha256, map: &PropertyMap) {
    hasher.update((map.len() as u64).to_be_bytes());
    for (key, value) in map {
        update_str(hasher, key);
        update_value(hasher, value);
    }
}

fn update_value(hasher: &mut Sha256, value: &PropertyValue) {
    match value {
        PropertyValue::Null => hasher.update([0u8]),
        PropertyValue::Bool(b) => hasher.update([1u8, u8::from(*b)]),
        PropertyValue::Number(n) => {
            hasher.update([2u8]);
            hasher.update(n.to_be_bytes());
        }
        PropertyValue::String(s) => {
            hasher.update([3u8]);
            update_str(hasher, s);
        }
        PropertyValue::Resource(moniker) => {
            hasher.update([4u8]);
            update_str(hasher, moniker.as_str());
        }
        PropertyValue::Array(items) => {
            hasher.update([5u8]);
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                update_value(hasher, item);
            }
        }
        PropertyValue::Object(map) => {
            hasher.update([6u8]);
            update_map(hasher, map);
        }
    }
}
