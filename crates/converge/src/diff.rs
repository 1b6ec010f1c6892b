//! Diff computation between declared and observed state

use crate::schema::AttributeSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Partition of two keyed collections.
///
/// Entries are ordered by key so that the resulting operations are
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedDiff<K, T> {
    /// Declared but not observed
    pub to_create: Vec<T>,
    /// Observed but not declared
    pub to_revoke: Vec<T>,
    /// Present on both sides with different contents: (declared, observed)
    pub to_update: Vec<(T, T)>,
    /// Present on both sides and equal
    pub unchanged: Vec<K>,
}

impl<K, T> KeyedDiff<K, T> {
    /// Check if the two sides are equivalent
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_revoke.is_empty() && self.to_update.is_empty()
    }

    /// Number of changes
    pub fn len(&self) -> usize {
        self.to_create.len() + self.to_revoke.len() + self.to_update.len()
    }
}

/// Compare two collections whose elements are identified by `key`.
///
/// Callers must reject duplicate keys first (see [`find_duplicate`]); with
/// duplicates the last element for a key wins.
pub fn keyed_diff<K, T, F>(declared: &[T], observed: &[T], key: F) -> KeyedDiff<K, T>
where
    K: Ord + Clone,
    T: Clone + PartialEq,
    F: Fn(&T) -> K,
{
    let declared: BTreeMap<K, &T> = declared.iter().map(|t| (key(t), t)).collect();
    let mut observed: BTreeMap<K, &T> = observed.iter().map(|t| (key(t), t)).collect();

    let mut diff = KeyedDiff {
        to_create: Vec::new(),
        to_revoke: Vec::new(),
        to_update: Vec::new(),
        unchanged: Vec::new(),
    };

    for (k, d) in declared {
        match observed.remove(&k) {
            None => diff.to_create.push(d.clone()),
            Some(o) if o == d => diff.unchanged.push(k),
            Some(o) => diff.to_update.push((d.clone(), o.clone())),
        }
    }
    diff.to_revoke = observed.into_values().cloned().collect();
    diff
}

/// First key that appears more than once, if any.
pub fn find_duplicate<K, T, F>(items: &[T], key: F) -> Option<K>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut seen = BTreeSet::new();
    for item in items {
        let k = key(item);
        if seen.contains(&k) {
            return Some(k);
        }
        seen.insert(k);
    }
    None
}

/// A single attribute that differs between declared and observed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub attribute: String,
    pub from: Option<Value>,
    pub to: Option<Value>,
    pub sensitive: bool,
    /// The change cannot be applied in place
    pub force_new: bool,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<Value>| match v {
            _ if self.sensitive => "(sensitive)".to_string(),
            Some(v) => v.to_string(),
            None => "(none)".to_string(),
        };
        write!(f, "{}: {} -> {}", self.attribute, show(&self.from), show(&self.to))?;
        if self.force_new {
            write!(f, " (forces replacement)")?;
        }
        Ok(())
    }
}

/// Attribute-level diff of one resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDiff {
    pub changes: Vec<FieldChange>,
}

impl ResourceDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change of `attr` if the two values differ. Sensitivity and
    /// replacement come from the schema.
    pub fn compare(&mut self, attr: &AttributeSchema, from: Option<Value>, to: Option<Value>) {
        if from != to {
            self.changes.push(FieldChange {
                attribute: attr.name.to_string(),
                from,
                to,
                sensitive: attr.sensitive,
                force_new: attr.force_new,
            });
        }
    }

    /// Record a change unconditionally.
    pub fn push(&mut self, change: FieldChange) {
        self.changes.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Check if any change forces replacement
    pub fn requires_replacement(&self) -> bool {
        self.changes.iter().any(|c| c.force_new)
    }

    /// Names of the attributes that force replacement
    pub fn replacement_attributes(&self) -> Vec<String> {
        self.changes
            .iter()
            .filter(|c| c.force_new)
            .map(|c| c.attribute.clone())
            .collect()
    }

    pub fn get(&self, attribute: &str) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.attribute == attribute)
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Resources to create
    pub additions: usize,
    /// Resources to delete
    pub removals: usize,
    /// Resources to modify in place
    pub modifications: usize,
    /// Resources whose changes cannot be applied in place
    pub replacements: usize,
}

impl DiffSummary {
    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications + self.replacements
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttrType;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Grant {
        bucket: &'static str,
        perm: &'static str,
    }

    fn g(bucket: &'static str, perm: &'static str) -> Grant {
        Grant { bucket, perm }
    }

    #[test]
    fn test_keyed_diff_partitions() {
        let declared = vec![g("a", "read_only"), g("b", "read_write"), g("c", "read_only")];
        let observed = vec![g("c", "read_only"), g("b", "read_only"), g("d", "read_only")];

        let diff = keyed_diff(&declared, &observed, |x| x.bucket);
        assert_eq!(diff.to_create, vec![g("a", "read_only")]);
        assert_eq!(diff.to_revoke, vec![g("d", "read_only")]);
        assert_eq!(diff.to_update, vec![(g("b", "read_write"), g("b", "read_only"))]);
        assert_eq!(diff.unchanged, vec!["c"]);
        assert_eq!(diff.len(), 3);
    }

    #[test]
    fn test_keyed_diff_order_insensitive() {
        let a = vec![g("x", "read_only"), g("y", "read_only")];
        let b = vec![g("y", "read_only"), g("x", "read_only")];
        assert!(keyed_diff(&a, &b, |x| x.bucket).is_empty());
    }

    #[test]
    fn test_find_duplicate() {
        let items = vec![g("a", "read_only"), g("b", "read_only"), g("a", "read_write")];
        assert_eq!(find_duplicate(&items, |x| x.bucket), Some("a"));
        assert_eq!(find_duplicate(&items[..2], |x| x.bucket), None);
    }

    #[test]
    fn test_resource_diff() {
        let label = AttributeSchema::required("label", AttrType::String);
        let plan = AttributeSchema::required("type", AttrType::String).force_new();
        let group = AttributeSchema::optional("group", AttrType::String);

        let mut diff = ResourceDiff::new();
        diff.compare(&label, Some(json!("web")), Some(json!("web-2")));
        diff.compare(&plan, Some(json!("g6-standard-1")), Some(json!("g6-standard-2")));
        diff.compare(&group, None, None);

        assert_eq!(diff.changes.len(), 2);
        assert!(diff.requires_replacement());
        assert_eq!(diff.replacement_attributes(), vec!["type"]);
        assert_eq!(
            diff.get("label").unwrap().to_string(),
            r#"label: "web" -> "web-2""#
        );
    }

    #[test]
    fn test_sensitive_masked() {
        let change = FieldChange {
            attribute: "root_pass".into(),
            from: None,
            to: Some(json!("hunter2")),
            sensitive: true,
            force_new: true,
        };
        let shown = change.to_string();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("(sensitive)"));
    }
}
