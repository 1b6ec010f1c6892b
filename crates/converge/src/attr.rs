//! Attribute trees exchanged with the configuration host.
//!
//! Values are JSON-shaped. Each top-level attribute is either known (with a
//! value), explicitly unknown, or absent. Unknown is distinct from null and
//! from an empty string: it marks a value that cannot be determined, such as
//! a secret that was never disclosed to this process.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Lookup result for a single attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attr<'a> {
    Known(&'a Value),
    Unknown,
    /// Not set, or set to null
    Absent,
}

impl<'a> Attr<'a> {
    pub fn is_known(&self) -> bool {
        matches!(self, Attr::Known(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Attr::Unknown)
    }

    /// The value, if known.
    pub fn value(&self) -> Option<&'a Value> {
        match self {
            Attr::Known(v) => Some(v),
            _ => None,
        }
    }
}

/// A flat map of attribute name to value, plus the set of names whose
/// value is unknown. A name is never both known and unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(default)]
    values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    unknown: BTreeSet<String>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object. Anything other than an object yields an
    /// empty tree; schema validation reports the missing attributes.
    pub fn from_json(value: Value) -> Self {
        let mut attrs = Self::new();
        if let Value::Object(map) = value {
            for (name, value) in map {
                attrs.values.insert(name, value);
            }
        }
        attrs
    }

    /// Known values as a JSON object. Unknown attributes are omitted.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Look up an attribute.
    pub fn get(&self, name: &str) -> Attr<'_> {
        if self.unknown.contains(name) {
            return Attr::Unknown;
        }
        match self.values.get(name) {
            Some(Value::Null) | None => Attr::Absent,
            Some(v) => Attr::Known(v),
        }
    }

    /// Set a known value. Clears an unknown marker.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        self.unknown.remove(&name);
        self.values.insert(name, value.into());
    }

    /// Set a value when present, otherwise leave the attribute absent.
    pub fn set_opt<V: Into<Value>>(&mut self, name: impl Into<String>, value: Option<V>) {
        if let Some(v) = value {
            self.set(name, v);
        }
    }

    /// Mark an attribute as unknown. Drops any known value.
    pub fn set_unknown(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.values.remove(&name);
        self.unknown.insert(name);
    }

    /// Remove an attribute entirely.
    pub fn remove(&mut self, name: &str) {
        self.values.remove(name);
        self.unknown.remove(name);
    }

    pub fn is_unknown(&self, name: &str) -> bool {
        self.unknown.contains(name)
    }

    /// Names of all attributes that are set to a non-null value.
    pub fn known_names(&self) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k.as_str())
    }

    /// Names of all unknown attributes.
    pub fn unknown_names(&self) -> impl Iterator<Item = &str> {
        self.unknown.iter().map(String::as_str)
    }

    // ========================================================================
    // Typed accessors
    // ========================================================================

    /// Known string value.
    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).value().and_then(Value::as_str)
    }

    /// Known boolean value.
    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).value().and_then(Value::as_bool)
    }

    /// Known integer value.
    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).value().and_then(Value::as_i64)
    }

    /// Known list of strings. Non-string elements are skipped; the schema
    /// rejects them before decoding.
    pub fn strings(&self, name: &str) -> Option<Vec<String>> {
        self.get(name).value().and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
    }

    /// Known list of objects.
    pub fn objects(&self, name: &str) -> Option<Vec<&serde_json::Map<String, Value>>> {
        self.get(name)
            .value()
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_object).collect())
    }
}

impl From<Value> for Attributes {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}
