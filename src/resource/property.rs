//! Property values and maps describing a resource's state.
//!
//! A [`PropertyValue`] is a closed sum type; equality is structural across
//! the whole tree, and a NaN number equals itself so a value always diffs
//! clean against its own copy. [`PropertyMap`] keeps its keys in lexical order so every
//! walk over it is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use super::tokens::Moniker;

/// Key of a property within a [`PropertyMap`].
pub type PropertyKey = String;

/// Object key marking a resource reference in serialized property bags.
pub const REFERENCE_KEY: &str = "$ref";

/// A single property value.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "WireValue")]
pub enum PropertyValue {
    /// Absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Double-precision number.
    Number(f64),
    /// String value.
    String(String),
    /// Reference to another resource, by moniker.
    Resource(Moniker),
    /// Ordered list of values.
    Array(Vec<PropertyValue>),
    /// Nested object.
    Object(PropertyMap),
}

/// Mapping from property keys to values, iterated in lexical key order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyMap(BTreeMap<PropertyKey, PropertyValue>);

/// Serialized shape of a property value.
///
/// Variant order matters: a single-key `$ref` object must be tried before a
/// generic object.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Reference(WireReference),
    Array(Vec<PropertyValue>),
    Object(PropertyMap),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireReference {
    #[serde(rename = "$ref")]
    moniker: Moniker,
}

impl From<WireValue> for PropertyValue {
    fn from(wire: WireValue) -> Self {
        match wire {
            WireValue::Null => Self::Null,
            WireValue::Bool(b) => Self::Bool(b),
            WireValue::Number(n) => Self::Number(n),
            WireValue::String(s) => Self::String(s),
            WireValue::Reference(r) => Self::Resource(r.moniker),
            WireValue::Array(items) => Self::Array(items),
            WireValue::Object(map) => Self::Object(map),
        }
    }
}

impl PartialEq for PropertyValue {
    #[allow(clippy::float_cmp)]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Resource(a), Self::Resource(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::String(s) => serializer.serialize_str(s),
            Self::Resource(moniker) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(REFERENCE_KEY, moniker)?;
                map.end()
            }
            Self::Array(items) => items.serialize(serializer),
            Self::Object(map) => map.serialize(serializer),
        }
    }
}

impl PropertyValue {
    /// Returns true for [`PropertyValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the boolean payload, if any.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the numeric payload, if any.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the referenced moniker, if any.
    #[must_use]
    pub const fn as_resource(&self) -> Option<&Moniker> {
        match self {
            Self::Resource(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the array payload, if any.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Self]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the object payload, if any.
    #[must_use]
    pub const fn as_object(&self) -> Option<&PropertyMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Short name of the variant, for messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Resource(_) => "resource",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Adds every moniker referenced by this value to `out`.
    pub fn collect_references(&self, out: &mut BTreeSet<Moniker>) {
        match self {
            Self::Resource(m) => {
                out.insert(m.clone());
            }
            Self::Array(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Object(map) => map.collect_references(out),
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => {}
        }
    }

    fn collect_non_finite(&self, path: &str, out: &mut Vec<String>) {
        match self {
            Self::Number(n) if !n.is_finite() => out.push(path.to_string()),
            Self::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_non_finite(&format!("{path}[{i}]"), out);
                }
            }
            Self::Object(map) => map.collect_non_finite(Some(path), out),
            _ => {}
        }
    }

    /// Rebuilds the value with every reference passed through `f`.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `f`.
    pub fn try_map_references<E>(
        &self,
        f: &mut impl FnMut(&Moniker) -> Result<Moniker, E>,
    ) -> Result<Self, E> {
        Ok(match self {
            Self::Resource(m) => Self::Resource(f(m)?),
            Self::Array(items) => Self::Array(
                items
                    .iter()
                    .map(|item| item.try_map_references(f))
                    .collect::<Result<_, E>>()?,
            ),
            Self::Object(map) => Self::Object(map.try_map_references(f)?),
            other => other.clone(),
        })
    }
}

impl PropertyMap {
    /// Creates an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<PropertyKey>, value: impl Into<PropertyValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(
        &mut self,
        key: impl Into<PropertyKey>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.0.remove(key)
    }

    /// Looks up a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the map has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates entries in lexical key order.
    pub fn iter(&self) -> impl Iterator<Item = (&PropertyKey, &PropertyValue)> {
        self.0.iter()
    }

    /// Returns the keys in lexical order.
    #[must_use]
    pub fn stable_keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }

    /// Returns a copy with every entry of `other` laid over this map.
    #[must_use]
    pub fn overlay(&self, other: &Self) -> Self {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(merged)
    }

    /// Every moniker referenced anywhere in the map.
    #[must_use]
    pub fn references(&self) -> BTreeSet<Moniker> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out);
        out
    }

    /// Paths of every NaN or infinite number in the map, such as
    /// `limits.cpu` or `ports[1]`.
    ///
    /// Such numbers have no JSON form, so they cannot be recorded faithfully.
    #[must_use]
    pub fn non_finite_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_non_finite(None, &mut out);
        out
    }

    fn collect_non_finite(&self, prefix: Option<&str>, out: &mut Vec<String>) {
        for (key, value) in &self.0 {
            let path = prefix.map_or_else(|| key.clone(), |p| format!("{p}.{key}"));
            value.collect_non_finite(&path, out);
        }
    }

    fn collect_references(&self, out: &mut BTreeSet<Moniker>) {
        for value in self.0.values() {
            value.collect_references(out);
        }
    }

    /// Rebuilds the map with every reference passed through `f`.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `f`.
    pub fn try_map_references<E>(
        &self,
        f: &mut impl FnMut(&Moniker) -> Result<Moniker, E>,
    ) -> Result<Self, E> {
        let mut mapped = BTreeMap::new();
        for (key, value) in &self.0 {
            mapped.insert(key.clone(), value.try_map_references(f)?);
        }
        Ok(Self(mapped))
    }
}

impl<K: Into<PropertyKey>> FromIterator<(K, PropertyValue)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (K, PropertyValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<'a> IntoIterator for &'a PropertyMap {
    type Item = (&'a PropertyKey, &'a PropertyValue);
    type IntoIter = std::collections::btree_map::Iter<'a, PropertyKey, PropertyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Moniker> for PropertyValue {
    fn from(value: Moniker) -> Self {
        Self::Resource(value)
    }
}

impl From<Vec<Self>> for PropertyValue {
    fn from(value: Vec<Self>) -> Self {
        Self::Array(value)
    }
}

impl From<PropertyMap> for PropertyValue {
    fn from(value: PropertyMap) -> Self {
        Self::Object(value)
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "<null>"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
            Self::Resource(m) => write!(f, "-> *{m}"),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Object(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
