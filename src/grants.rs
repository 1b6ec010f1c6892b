//! Reconciliation of grant lists.
//!
//! A grant scopes a credential to one target (a bucket) within one scope (a
//! cluster) at a permission level. Lists are compared by the composite
//! `(target, scope)` key, so declaration order never matters.

use crate::error::{Error, Result, Subject};
use crate::resource::Capabilities;
use converge::{KeyedDiff, find_duplicate, keyed_diff};
use linodekit::BucketAccess;
use std::fmt;

/// Composite key of a grant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GrantKey {
    pub target: String,
    pub scope: String,
}

impl fmt::Display for GrantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.target, self.scope)
    }
}

/// An element of a grant list.
pub trait Grant: Clone + PartialEq {
    fn key(&self) -> GrantKey;
}

impl Grant for BucketAccess {
    fn key(&self) -> GrantKey {
        GrantKey {
            target: self.bucket_name.clone(),
            scope: self.cluster.clone(),
        }
    }
}

/// Operation needed to converge a grant list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOp<G> {
    /// Replace the whole remote list with the declared one
    ReplaceList(Vec<G>),
}

/// Comparison of a declared grant list with the observed one.
#[derive(Debug, Clone)]
pub struct GrantPlan<G> {
    declared: Vec<G>,
    diff: KeyedDiff<GrantKey, G>,
}

impl<G: Grant> GrantPlan<G> {
    pub fn to_create(&self) -> &[G] {
        &self.diff.to_create
    }

    pub fn to_revoke(&self) -> &[G] {
        &self.diff.to_revoke
    }

    /// Grants whose permission differs: (declared, observed)
    pub fn to_update(&self) -> &[(G, G)] {
        &self.diff.to_update
    }

    /// Whether the lists are equivalent.
    pub fn is_empty(&self) -> bool {
        self.diff.is_empty()
    }

    /// Operations to emit. The provider offers no per-grant mutation, so any
    /// divergence collapses into a single list replacement.
    pub fn ops(&self) -> Vec<GrantOp<G>> {
        if self.is_empty() {
            Vec::new()
        } else {
            vec![GrantOp::ReplaceList(self.declared.clone())]
        }
    }
}

/// Reject a declared list with two grants for the same key.
pub fn check_unique<G: Grant>(
    declared: &[G],
    attribute: &'static str,
    subject: Subject,
) -> Result<()> {
    match find_duplicate(declared, G::key) {
        Some(key) => Err(Error::DuplicateKey {
            subject,
            attribute,
            key: key.to_string(),
        }),
        None => Ok(()),
    }
}

/// Compare declared and observed lists. Both must be unique by key.
pub fn plan<G: Grant>(declared: &[G], observed: &[G]) -> GrantPlan<G> {
    GrantPlan {
        declared: declared.to_vec(),
        diff: keyed_diff(declared, observed, G::key),
    }
}

/// Whether converging the lists requires recreating the owning resource.
pub fn requires_replacement<G: Grant>(declared: &[G], observed: &[G], caps: Capabilities) -> bool {
    !caps.grant_mutation && !plan(declared, observed).is_empty()
}
