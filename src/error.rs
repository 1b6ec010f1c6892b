//! Error types for the reconciliation engine.
//!
//! Every error names the resource it concerns so that a host can report
//! failures without extra context.

use crate::resource::{Kind, Record};
use converge::ValidationError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The resource an operation was acting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub kind: Kind,
    /// Provider-assigned id; `None` before creation succeeds
    pub id: Option<u64>,
}

impl Subject {
    pub fn new(kind: Kind, id: u64) -> Self {
        Self { kind, id: Some(id) }
    }

    /// A resource that has not been created yet.
    pub fn unassigned(kind: Kind) -> Self {
        Self { kind, id: None }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} {id}", self.kind),
            None => write!(f, "{} (unassigned)", self.kind),
        }
    }
}

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Declared input does not fit the schema. Raised before any remote call.
    #[error("{subject}: invalid configuration: {source}")]
    Validation {
        subject: Subject,
        #[source]
        source: ValidationError,
    },

    /// Two entries of a keyed list share a key. Raised before any remote call.
    #[error("{subject}: duplicate {attribute} entry for {key}")]
    DuplicateKey {
        subject: Subject,
        attribute: &'static str,
        key: String,
    },

    /// The provider rejected a call or could not be reached.
    #[error("{subject}: provider error{}: {message}", fmt_status(.status))]
    Provider {
        subject: Subject,
        status: Option<u16>,
        message: String,
    },

    /// The declared change cannot be applied in place.
    #[error("{subject}: change to {} requires replacing the resource", .attributes.join(", "))]
    ReplacementRequired {
        subject: Subject,
        attributes: Vec<String>,
    },

    /// A migration did not complete within the configured bounds.
    #[error("{subject}: migration to {target} did not complete after {polls} polls ({elapsed:?})")]
    MigrationTimeout {
        subject: Subject,
        target: String,
        polls: u32,
        elapsed: Duration,
    },

    /// A migration ended in a status other than the expected one.
    #[error("{subject}: migration failed, last status {last_status}")]
    MigrationFailed {
        subject: Subject,
        last_status: String,
    },

    /// The operation was cancelled by the caller.
    #[error("{subject}: cancelled")]
    Cancelled { subject: Subject },

    /// The provider offers no way to perform the operation.
    #[error("{subject}: {operation} is not supported")]
    Unsupported {
        subject: Subject,
        operation: &'static str,
    },

    /// The resource was created but could not be read back.
    ///
    /// `record` is built from the create response and holds any secret it
    /// carried. Hosts must persist it, or the resource is orphaned.
    #[error("{}: created but not read back: {source}", .record.subject())]
    PartiallyCreated {
        record: Box<Record>,
        #[source]
        source: Box<Error>,
    },
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" [{s}]")).unwrap_or_default()
}

impl Error {
    /// Translate a client error.
    pub fn provider(subject: Subject, err: linodekit::Error) -> Self {
        match err {
            linodekit::Error::Unsupported { operation } => Self::Unsupported { subject, operation },
            linodekit::Error::Interrupted => Self::Cancelled { subject },
            other => Self::Provider {
                subject,
                status: other.status(),
                message: other.message(),
            },
        }
    }

    pub fn validation(subject: Subject, source: ValidationError) -> Self {
        Self::Validation { subject, source }
    }

    /// The resource this error concerns.
    pub fn subject(&self) -> Subject {
        match self {
            Self::Validation { subject, .. }
            | Self::DuplicateKey { subject, .. }
            | Self::Provider { subject, .. }
            | Self::ReplacementRequired { subject, .. }
            | Self::MigrationTimeout { subject, .. }
            | Self::MigrationFailed { subject, .. }
            | Self::Cancelled { subject }
            | Self::Unsupported { subject, .. } => *subject,
            Self::PartiallyCreated { record, .. } => record.subject(),
        }
    }

    /// HTTP status of a provider error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Provider { status, .. } => *status,
            Self::PartiallyCreated { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Record of a resource that exists remotely despite the error.
    pub fn partial_record(&self) -> Option<&Record> {
        match self {
            Self::PartiallyCreated { record, .. } => Some(record),
            _ => None,
        }
    }

    /// Whether the error was raised locally, before any remote call.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::DuplicateKey { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Extension for attaching a subject to client results.
pub(crate) trait ProviderResultExt<T> {
    fn for_subject(self, subject: Subject) -> Result<T>;
}

impl<T> ProviderResultExt<T> for linodekit::Result<T> {
    fn for_subject(self, subject: Subject) -> Result<T> {
        self.map_err(|e| Error::provider(subject, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_kind_and_id() {
        let err = Error::provider(
            Subject::new(Kind::Instance, 42),
            linodekit::Error::from_response(400, r#"{"errors":[{"reason":"bad label","field":"label"}]}"#),
        );
        assert_eq!(
            err.to_string(),
            "linode_instance 42: provider error [400]: label: bad label"
        );
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn test_unassigned_subject() {
        let err = Error::Cancelled {
            subject: Subject::unassigned(Kind::ObjectStorageKey),
        };
        assert_eq!(
            err.to_string(),
            "linode_object_storage_key (unassigned): cancelled"
        );
    }

    #[test]
    fn test_replacement_lists_attributes() {
        let err = Error::ReplacementRequired {
            subject: Subject::new(Kind::Instance, 1),
            attributes: vec!["type".into(), "image".into()],
        };
        assert!(err.to_string().contains("type, image"));
    }

    #[test]
    fn test_unsupported_translation() {
        let err = Error::provider(
            Subject::new(Kind::ObjectStorageKey, 3),
            linodekit::Error::Unsupported {
                operation: "replace_bucket_access",
            },
        );
        assert!(matches!(err, Error::Unsupported { .. }));
        assert!(!err.is_local());
    }
}
