//! Helpers shared by the per-kind attribute codecs.
//!
//! Typed state never carries an untyped tree: each kind decodes the host's
//! [`Attributes`] into its own structs and encodes them back. Values that a
//! read cannot recover are held as [`Tracked`] so that "not knowable" stays
//! distinct from "empty".

use crate::error::{Error, Result, Subject};
use crate::resource::Kind;
use converge::{Attr, Attributes, ValidationError};
use serde_json::Value;

/// A value the engine may or may not know.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Tracked<T> {
    Known(T),
    /// Exists remotely but cannot be read back
    Unknown,
    /// Known not to be set
    #[default]
    Absent,
}

impl<T> Tracked<T> {
    pub fn from_option(value: Option<T>) -> Self {
        value.map_or(Tracked::Absent, Tracked::Known)
    }

    pub fn known(&self) -> Option<&T> {
        match self {
            Tracked::Known(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Tracked::Unknown)
    }

    pub fn map<U>(&self, f: impl FnOnce(&T) -> U) -> Tracked<U> {
        match self {
            Tracked::Known(v) => Tracked::Known(f(v)),
            Tracked::Unknown => Tracked::Unknown,
            Tracked::Absent => Tracked::Absent,
        }
    }

    /// Keep `self` unless it is unknown, in which case fall back to `prior`.
    pub fn or_carry(self, prior: &Tracked<T>) -> Tracked<T>
    where
        T: Clone,
    {
        match self {
            Tracked::Unknown => prior.clone(),
            other => other,
        }
    }

    /// Whether a declared value contradicts this one. Unknown never does.
    pub fn conflicts_with(&self, declared: Option<&T>) -> bool
    where
        T: PartialEq,
    {
        match self {
            Tracked::Unknown => false,
            Tracked::Known(v) => declared != Some(v),
            Tracked::Absent => declared.is_some(),
        }
    }
}

/// Write a tracked value into an attribute tree.
pub(crate) fn put<T>(attrs: &mut Attributes, name: &str, value: &Tracked<T>)
where
    T: Clone + Into<Value>,
{
    match value {
        Tracked::Known(v) => attrs.set(name, v.clone()),
        Tracked::Unknown => attrs.set_unknown(name),
        Tracked::Absent => attrs.remove(name),
    }
}

/// Read a tracked string.
pub(crate) fn tracked_str(attrs: &Attributes, name: &str) -> Tracked<String> {
    match attrs.get(name) {
        Attr::Unknown => Tracked::Unknown,
        Attr::Known(Value::String(s)) => Tracked::Known(s.clone()),
        _ => Tracked::Absent,
    }
}

/// Read a tracked list of strings.
pub(crate) fn tracked_strings(attrs: &Attributes, name: &str) -> Tracked<Vec<String>> {
    match attrs.get(name) {
        Attr::Unknown => Tracked::Unknown,
        Attr::Known(_) => Tracked::from_option(attrs.strings(name)),
        Attr::Absent => Tracked::Absent,
    }
}

/// Read a tracked bool.
pub(crate) fn tracked_bool(attrs: &Attributes, name: &str) -> Tracked<bool> {
    match attrs.get(name) {
        Attr::Unknown => Tracked::Unknown,
        Attr::Known(Value::Bool(b)) => Tracked::Known(*b),
        _ => Tracked::Absent,
    }
}

/// A string attribute that the schema guarantees to be present.
pub(crate) fn required_str(attrs: &Attributes, name: &str, subject: Subject) -> Result<String> {
    attrs.str(name).map(str::to_string).ok_or_else(|| {
        Error::validation(subject, ValidationError::new(name, "required attribute is missing"))
    })
}

/// The id stored in a persisted record.
pub(crate) fn record_id(attrs: &Attributes, kind: Kind) -> Result<u64> {
    match attrs.get("id") {
        Attr::Known(Value::Number(n)) => n.as_u64().ok_or_else(|| bad_id(kind, &n.to_string())),
        Attr::Known(Value::String(s)) => parse_id(kind, s),
        _ => Err(Error::validation(
            Subject::unassigned(kind),
            ValidationError::new("id", "record has no id"),
        )),
    }
}

/// Parse a host-supplied id.
pub fn parse_id(kind: Kind, id: &str) -> Result<u64> {
    id.trim().parse::<u64>().map_err(|_| bad_id(kind, id))
}

fn bad_id(kind: Kind, id: &str) -> Error {
    Error::validation(
        Subject::unassigned(kind),
        ValidationError::new("id", format!("{id:?} is not a valid {kind} id")),
    )
}

/// Sorted copy of a string list, for order-insensitive comparison.
pub(crate) fn sorted(items: &[String]) -> Vec<String> {
    let mut items = items.to_vec();
    items.sort();
    items
}
