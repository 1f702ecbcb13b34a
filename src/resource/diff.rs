//! Structural diffing of property maps and values.
//!
//! Objects are compared key by key and arrays position by position. Scalars
//! that differ (or values of different variants) are recorded as a plain
//! replacement of the old value by the new one.

use std::collections::{BTreeMap, BTreeSet};

use super::property::{PropertyKey, PropertyMap, PropertyValue};

/// Result of comparing two property maps.
///
/// The four partitions are disjoint; together they cover every key of both
/// inputs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectDiff {
    /// Keys only present on the new side.
    pub adds: BTreeMap<PropertyKey, PropertyValue>,
    /// Keys only present on the old side.
    pub deletes: BTreeMap<PropertyKey, PropertyValue>,
    /// Keys present on both sides with different values.
    pub updates: BTreeMap<PropertyKey, ValueDiff>,
    /// Keys present on both sides with equal values.
    pub sames: BTreeMap<PropertyKey, PropertyValue>,
}

/// Difference between two values that are not equal.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueDiff {
    /// The old value was replaced wholesale.
    Replace {
        /// Value on the old side.
        old: PropertyValue,
        /// Value on the new side.
        new: PropertyValue,
    },
    /// Both sides are arrays.
    Array(ArrayDiff),
    /// Both sides are objects.
    Object(ObjectDiff),
}

/// Positional difference between two arrays.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArrayDiff {
    /// Trailing elements only on the new side.
    pub adds: BTreeMap<usize, PropertyValue>,
    /// Trailing elements only on the old side.
    pub deletes: BTreeMap<usize, PropertyValue>,
    /// Elements at the same index that differ.
    pub updates: BTreeMap<usize, ValueDiff>,
    /// Elements at the same index that are equal.
    pub sames: BTreeMap<usize, PropertyValue>,
}

/// Computes the structural diff from `old` to `new`.
#[must_use]
pub fn diff_objects(old: &PropertyMap, new: &PropertyMap) -> ObjectDiff {
    old.diff(new)
}

impl PropertyMap {
    /// Computes the structural diff from `self` (old) to `new`.
    #[must_use]
    pub fn diff(&self, new: &Self) -> ObjectDiff {
        let mut diff = ObjectDiff::default();

        for (key, old_value) in self {
            match new.get(key) {
                None => {
                    diff.deletes.insert(key.clone(), old_value.clone());
                }
                Some(new_value) => match old_value.diff(new_value) {
                    None => {
                        diff.sames.insert(key.clone(), old_value.clone());
                    }
                    Some(value_diff) => {
                        diff.updates.insert(key.clone(), value_diff);
                    }
                },
            }
        }

        for (key, new_value) in new {
            if !self.contains_key(key) {
                diff.adds.insert(key.clone(), new_value.clone());
            }
        }

        diff
    }
}

impl PropertyValue {
    /// Computes the diff from `self` (old) to `new`, or `None` if they are
    /// structurally equal.
    #[must_use]
    pub fn diff(&self, new: &Self) -> Option<ValueDiff> {
        if self == new {
            return None;
        }

        Some(match (self, new) {
            (Self::Array(old_items), Self::Array(new_items)) => {
                ValueDiff::Array(ArrayDiff::compute(old_items, new_items))
            }
            (Self::Object(old_map), Self::Object(new_map)) => {
                ValueDiff::Object(old_map.diff(new_map))
            }
            _ => ValueDiff::Replace {
                old: self.clone(),
                new: new.clone(),
            },
        })
    }
}

impl ObjectDiff {
    /// Returns true if the key was added, deleted or updated.
    #[must_use]
    pub fn changed(&self, key: &str) -> bool {
        self.adds.contains_key(key) || self.deletes.contains_key(key) || self.updates.contains_key(key)
    }

    /// Returns true if any key changed.
    #[must_use]
    pub fn any_changes(&self) -> bool {
        !self.adds.is_empty() || !self.deletes.is_empty() || !self.updates.is_empty()
    }

    /// Changed keys in lexical order.
    #[must_use]
    pub fn changed_keys(&self) -> Vec<&str> {
        let keys: BTreeSet<&str> = self
            .adds
            .keys()
            .chain(self.deletes.keys())
            .chain(self.updates.keys())
            .map(String::as_str)
            .collect();
        keys.into_iter().collect()
    }

    /// Every key of either side, in lexical order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let keys: BTreeSet<&str> = self
            .adds
            .keys()
            .chain(self.deletes.keys())
            .chain(self.updates.keys())
            .chain(self.sames.keys())
            .map(String::as_str)
            .collect();
        keys.into_iter().collect()
    }

    /// Rebuilds the new side of the diff on top of `old`.
    #[must_use]
    pub fn apply_to(&self, old: &PropertyMap) -> PropertyMap {
        let mut result = old.clone();
        for key in self.deletes.keys() {
            result.remove(key);
        }
        for (key, value) in &self.adds {
            result.insert(key.clone(), value.clone());
        }
        for (key, value_diff) in &self.updates {
            result.insert(key.clone(), value_diff.new_value());
        }
        result
    }

    /// The new-side map described by this diff alone.
    #[must_use]
    pub fn new_map(&self) -> PropertyMap {
        self.sames
            .iter()
            .chain(self.adds.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .chain(self.updates.iter().map(|(k, d)| (k.clone(), d.new_value())))
            .collect()
    }

    /// The old-side map described by this diff alone.
    #[must_use]
    pub fn old_map(&self) -> PropertyMap {
        self.sames
            .iter()
            .chain(self.deletes.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .chain(self.updates.iter().map(|(k, d)| (k.clone(), d.old_value())))
            .collect()
    }
}

impl ValueDiff {
    /// Reconstructs the old-side value.
    #[must_use]
    pub fn old_value(&self) -> PropertyValue {
        match self {
            Self::Replace { old, .. } => old.clone(),
            Self::Array(array) => PropertyValue::Array(array.old_values()),
            Self::Object(object) => PropertyValue::Object(object.old_map()),
        }
    }

    /// Reconstructs the new-side value.
    #[must_use]
    pub fn new_value(&self) -> PropertyValue {
        match self {
            Self::Replace { new, .. } => new.clone(),
            Self::Array(array) => PropertyValue::Array(array.new_values()),
            Self::Object(object) => PropertyValue::Object(object.new_map()),
        }
    }
}

impl ArrayDiff {
    fn compute(old: &[PropertyValue], new: &[PropertyValue]) -> Self {
        let mut diff = Self::default();
        let len = old.len().max(new.len());

        for i in 0..len {
            match (old.get(i), new.get(i)) {
                (Some(o), Some(n)) => match o.diff(n) {
                    None => {
                        diff.sames.insert(i, o.clone());
                    }
                    Some(value_diff) => {
                        diff.updates.insert(i, value_diff);
                    }
                },
                (Some(o), None) => {
                    diff.deletes.insert(i, o.clone());
                }
                (None, Some(n)) => {
                    diff.adds.insert(i, n.clone());
                }
                (None, None) => {}
            }
        }

        diff
    }

    /// Number of positions covered, i.e. the longer of the two arrays.
    #[must_use]
    pub fn len(&self) -> usize {
        [
            self.adds.keys().next_back(),
            self.deletes.keys().next_back(),
            self.updates.keys().next_back(),
            self.sames.keys().next_back(),
        ]
        .into_iter()
        .flatten()
        .max()
        .map_or(0, |last| last + 1)
    }

    /// Returns true if neither array had elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn old_values(&self) -> Vec<PropertyValue> {
        let mut indexed: BTreeMap<usize, PropertyValue> = self.sames.clone();
        indexed.extend(self.deletes.iter().map(|(i, v)| (*i, v.clone())));
        indexed.extend(self.updates.iter().map(|(i, d)| (*i, d.old_value())));
        indexed.into_values().collect()
    }

    fn new_values(&self) -> Vec<PropertyValue> {
        let mut indexed: BTreeMap<usize, PropertyValue> = self.sames.clone();
        indexed.extend(self.adds.iter().map(|(i, v)| (*i, v.clone())));
        indexed.extend(self.updates.iter().map(|(i, d)| (*i, d.new_value())));
        indexed.into_values().collect()
    }
}
