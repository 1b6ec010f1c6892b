//! Resource kinds managed by the engine
//!
//! Every kind provides:
//! - A schema classifying its attributes
//! - A codec between the host's attribute tree and typed structs
//! - Create/read/update/delete against the provider
//!
//! The set of kinds is closed; the controller selects one by matching on
//! [`Kind`].

pub mod instance;
pub mod object_storage_key;

use crate::error::{Error, Result, Subject};
use crate::migration::MigrationConfig;
use converge::{Attributes, CancelToken, ResourceDiff, ResourceSchema};
use linodekit::Client;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use instance::InstanceResource;
pub use object_storage_key::ObjectStorageKeyResource;

/// A managed resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    #[serde(rename = "linode_instance")]
    Instance,
    #[serde(rename = "linode_object_storage_key")]
    ObjectStorageKey,
}

impl Kind {
    pub const ALL: [Kind; 2] = [Kind::Instance, Kind::ObjectStorageKey];

    /// Host-facing type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Kind::Instance => "linode_instance",
            Kind::ObjectStorageKey => "linode_object_storage_key",
        }
    }

    /// Look up a kind by its type name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.type_name() == name)
    }

    pub fn schema(&self) -> &'static ResourceSchema {
        match self {
            Kind::Instance => InstanceResource::schema(),
            Kind::ObjectStorageKey => ObjectStorageKeyResource::schema(),
        }
    }

    /// What the provider allows for this kind.
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Kind::Instance => Capabilities {
                grant_mutation: false,
                migration: true,
            },
            Kind::ObjectStorageKey => Capabilities {
                grant_mutation: false,
                migration: false,
            },
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Provider capabilities that decide between in-place changes and
/// replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Grant lists can be changed after creation
    pub grant_mutation: bool,
    /// Placement can be changed by migration
    pub migration: bool,
}

/// Dependencies of a single operation.
pub struct OpContext<'a> {
    pub client: &'a Client,
    pub migration: &'a MigrationConfig,
    pub cancel: &'a CancelToken,
    pub capabilities: Capabilities,
}

impl OpContext<'_> {
    pub(crate) fn check_cancelled(&self, subject: Subject) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled { subject });
        }
        Ok(())
    }
}

/// Persisted snapshot of one resource after its last successful operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub kind: Kind,
    pub id: u64,
    pub attributes: Attributes,
}

impl Record {
    /// Key used by the state file, e.g. `linode_instance/123`.
    pub fn key(&self) -> String {
        record_key(self.kind, self.id)
    }

    pub fn subject(&self) -> Subject {
        Subject::new(self.kind, self.id)
    }
}

pub(crate) fn record_key(kind: Kind, id: impl fmt::Display) -> String {
    format!("{kind}/{id}")
}

/// Result of reading a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Found(Record),
    /// The provider no longer has the resource; drop it from state
    Gone,
}

impl ReadOutcome {
    pub fn record(self) -> Option<Record> {
        match self {
            ReadOutcome::Found(record) => Some(record),
            ReadOutcome::Gone => None,
        }
    }
}

/// State returned by a create.
///
/// `read_error` is set when the implicit read after creation failed. The
/// state is then built from the create response alone.
#[derive(Debug)]
pub struct Created<S> {
    pub state: S,
    pub read_error: Option<Error>,
}

impl<S> Created<S> {
    pub fn read_back(state: S) -> Self {
        Self {
            state,
            read_error: None,
        }
    }
}

/// The contract every kind implements.
pub trait ResourceKind {
    /// Decoded declaration
    type Spec;
    /// Typed record state
    type State: Clone;

    const KIND: Kind;

    fn schema() -> &'static ResourceSchema;

    /// Validate and decode a declared attribute tree.
    fn decode(declared: &Attributes, subject: Subject) -> Result<Self::Spec>;

    /// Decode a persisted record.
    fn decode_state(attrs: &Attributes) -> Result<Self::State>;

    /// Encode state for the host. Never fails.
    fn encode(state: &Self::State) -> Attributes;

    fn id(state: &Self::State) -> u64;

    /// Differences between a declaration and a state.
    fn diff(spec: &Self::Spec, state: &Self::State, caps: Capabilities) -> ResourceDiff;

    /// Keep values a read cannot return from the previous state.
    fn carry_forward(prior: &Self::State, fresh: Self::State) -> Self::State;

    /// Create a resource and read it back.
    ///
    /// Errors before the provider assigns an id are returned as `Err`. A
    /// failed read-back is reported through [`Created::read_error`].
    fn create(ctx: &OpContext<'_>, spec: &Self::Spec) -> Result<Created<Self::State>>;

    /// `Ok(None)` when the provider reports the resource as missing.
    fn read(ctx: &OpContext<'_>, id: u64) -> Result<Option<Self::State>>;

    /// Converge an existing resource. `prior` is the last recorded state.
    fn update(ctx: &OpContext<'_>, spec: &Self::Spec, prior: &Self::State) -> Result<Self::State>;

    /// Delete a resource. Missing resources count as deleted.
    fn delete(ctx: &OpContext<'_>, id: u64) -> Result<()>;
}

/// Check that a schema validates a declared tree.
pub(crate) fn validate(schema: &ResourceSchema, declared: &Attributes, subject: Subject) -> Result<()> {
    schema
        .validate(declared)
        .map_err(|e| Error::validation(subject, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        for kind in Kind::ALL {
            assert_eq!(Kind::parse(kind.type_name()), Some(kind));
            assert_eq!(kind.schema().type_name, kind.type_name());
        }
        assert_eq!(Kind::parse("linode_volume"), None);
    }

    #[test]
    fn test_record_key() {
        let record = Record {
            kind: Kind::ObjectStorageKey,
            id: 9,
            attributes: Attributes::new(),
        };
        assert_eq!(record.key(), "linode_object_storage_key/9");
    }

    #[test]
    fn test_kind_serde_uses_type_name() {
        let json = serde_json::to_string(&Kind::Instance).unwrap();
        assert_eq!(json, "\"linode_instance\"");
    }
}
