//! Resource controller
//!
//! Host-facing operations on attribute trees. Each call decodes the tree for
//! its kind, runs the typed operation and encodes the result as a
//! [`Record`]. Declared input is validated before any remote call.

use crate::codec::parse_id;
use crate::error::{Error, Result, Subject};
use crate::migration::MigrationConfig;
use crate::resource::{
    Capabilities, InstanceResource, Kind, ObjectStorageKeyResource, OpContext, ReadOutcome,
    Record, ResourceKind,
};
use converge::{Attributes, CancelToken, DiffSummary, ResourceDiff, ValidationError};
use linodekit::Client;
use linodekit::retry::Interrupt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// What applying a declaration would do.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Nothing to do
    NoOp,
    Create,
    /// Changes that can be applied in place
    Update(ResourceDiff),
    /// Changes that need the resource destroyed and recreated
    Replace(ResourceDiff),
    Delete,
}

/// Count plans by action.
pub fn summarize(plans: &[Plan]) -> DiffSummary {
    let mut summary = DiffSummary::default();
    for plan in plans {
        match plan {
            Plan::NoOp => {}
            Plan::Create => summary.additions += 1,
            Plan::Update(_) => summary.modifications += 1,
            Plan::Replace(_) => summary.replacements += 1,
            Plan::Delete => summary.removals += 1,
        }
    }
    summary
}

/// Ends client retry backoff when the token is cancelled.
struct CancelWait(CancelToken);

impl Interrupt for CancelWait {
    fn wait(&self, delay: Duration) -> bool {
        self.0.wait_timeout(delay)
    }
}

/// Runs resource operations against one provider account.
///
/// Cheap to clone. Holds no per-resource state, so clones may serve
/// independent resources concurrently.
#[derive(Clone)]
pub struct Controller {
    client: Client,
    migration: MigrationConfig,
    cancel: CancelToken,
    capabilities: BTreeMap<Kind, Capabilities>,
}

impl Controller {
    pub fn new(client: Client) -> Self {
        let cancel = CancelToken::new();
        Self {
            client: client.with_interrupt(Arc::new(CancelWait(cancel.clone()))),
            migration: MigrationConfig::default(),
            cancel,
            capabilities: BTreeMap::new(),
        }
    }

    pub fn with_migration_config(mut self, config: MigrationConfig) -> Self {
        self.migration = config;
        self
    }

    /// Override what the provider allows for a kind.
    pub fn with_capabilities(mut self, kind: Kind, caps: Capabilities) -> Self {
        self.capabilities.insert(kind, caps);
        self
    }

    /// Share a cancellation token with the caller.
    ///
    /// The token also interrupts retry backoff in the client.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.client = self
            .client
            .with_interrupt(Arc::new(CancelWait(cancel.clone())));
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn migration_config(&self) -> &MigrationConfig {
        &self.migration
    }

    /// Effective capabilities of a kind.
    pub fn capabilities(&self, kind: Kind) -> Capabilities {
        self.capabilities
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.capabilities())
    }

    fn ctx(&self, kind: Kind) -> OpContext<'_> {
        OpContext {
            client: &self.client,
            migration: &self.migration,
            cancel: &self.cancel,
            capabilities: self.capabilities(kind),
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Create a resource from a declared tree.
    ///
    /// If the resource was created but could not be read back, the error is
    /// [`Error::PartiallyCreated`] and carries the record to persist.
    pub fn create(&self, kind: Kind, declared: &Attributes) -> Result<Record> {
        match kind {
            Kind::Instance => self.create_as::<InstanceResource>(declared),
            Kind::ObjectStorageKey => self.create_as::<ObjectStorageKeyResource>(declared),
        }
    }

    /// Read a resource by id. Write-once and write-only values are unknown.
    pub fn read(&self, kind: Kind, id: &str) -> Result<ReadOutcome> {
        let id = parse_id(kind, id)?;
        match kind {
            Kind::Instance => self.read_as::<InstanceResource>(id, None),
            Kind::ObjectStorageKey => self.read_as::<ObjectStorageKeyResource>(id, None),
        }
    }

    /// Re-read a recorded resource, keeping values a read cannot return.
    pub fn refresh(&self, record: &Record) -> Result<ReadOutcome> {
        match record.kind {
            Kind::Instance => {
                let prior = InstanceResource::decode_state(&record.attributes)?;
                self.read_as::<InstanceResource>(record.id, Some(&prior))
            }
            Kind::ObjectStorageKey => {
                let prior = ObjectStorageKeyResource::decode_state(&record.attributes)?;
                self.read_as::<ObjectStorageKeyResource>(record.id, Some(&prior))
            }
        }
    }

    /// Converge a recorded resource to a declared tree.
    pub fn update(&self, declared: &Attributes, record: &Record) -> Result<Record> {
        match record.kind {
            Kind::Instance => self.update_as::<InstanceResource>(declared, record),
            Kind::ObjectStorageKey => self.update_as::<ObjectStorageKeyResource>(declared, record),
        }
    }

    /// Delete a resource. A resource that no longer exists counts as deleted.
    pub fn delete(&self, kind: Kind, id: &str) -> Result<()> {
        let id = parse_id(kind, id)?;
        let ctx = self.ctx(kind);
        match kind {
            Kind::Instance => InstanceResource::delete(&ctx, id),
            Kind::ObjectStorageKey => ObjectStorageKeyResource::delete(&ctx, id),
        }
    }

    /// Adopt an existing resource.
    ///
    /// Values the provider never returns are marked unknown in the record,
    /// never defaulted, so a later plan does not report them as drift.
    pub fn import(&self, kind: Kind, id: &str) -> Result<Record> {
        let id = parse_id(kind, id)?;
        let outcome = match kind {
            Kind::Instance => self.read_as::<InstanceResource>(id, None)?,
            Kind::ObjectStorageKey => self.read_as::<ObjectStorageKeyResource>(id, None)?,
        };
        let Some(mut record) = outcome.record() else {
            return Err(Error::Provider {
                subject: Subject::new(kind, id),
                status: Some(404),
                message: "cannot import a resource that does not exist".into(),
            });
        };

        for attr in kind.schema().unreadable() {
            if !record.attributes.is_unknown(attr.name) {
                log::debug!("{}: marking {} unknown", record.subject(), attr.name);
                record.attributes.set_unknown(attr.name);
            }
        }
        log::info!("{}: imported", record.subject());
        Ok(record)
    }

    /// Compare a declaration with a record without calling the provider.
    pub fn plan(
        &self,
        kind: Kind,
        declared: Option<&Attributes>,
        record: Option<&Record>,
    ) -> Result<Plan> {
        match (declared, record) {
            (None, None) => Ok(Plan::NoOp),
            (_, Some(record)) if record.kind != kind => Err(Error::validation(
                record.subject(),
                ValidationError::new(
                    "kind",
                    format!("record is a {} but {kind} was requested", record.kind),
                ),
            )),
            (None, Some(_)) => Ok(Plan::Delete),
            (Some(declared), None) => {
                kind.schema()
                    .validate(declared)
                    .map_err(|e| Error::validation(Subject::unassigned(kind), e))?;
                // Kind-specific checks such as duplicate grants
                match kind {
                    Kind::Instance => {
                        InstanceResource::decode(declared, Subject::unassigned(kind))?;
                    }
                    Kind::ObjectStorageKey => {
                        ObjectStorageKeyResource::decode(declared, Subject::unassigned(kind))?;
                    }
                }
                Ok(Plan::Create)
            }
            (Some(declared), Some(record)) => {
                let diff = match kind {
                    Kind::Instance => self.diff_as::<InstanceResource>(declared, record)?,
                    Kind::ObjectStorageKey => {
                        self.diff_as::<ObjectStorageKeyResource>(declared, record)?
                    }
                };
                Ok(if diff.is_empty() {
                    Plan::NoOp
                } else if diff.requires_replacement() {
                    Plan::Replace(diff)
                } else {
                    Plan::Update(diff)
                })
            }
        }
    }

    // =========================================================================
    // Typed implementations
    // =========================================================================

    fn create_as<K: ResourceKind>(&self, declared: &Attributes) -> Result<Record> {
        let spec = K::decode(declared, Subject::unassigned(K::KIND))?;
        let created = K::create(&self.ctx(K::KIND), &spec)?;
        let record = to_record::<K>(&created.state);
        match created.read_error {
            None => Ok(record),
            Some(source) => Err(Error::PartiallyCreated {
                record: Box::new(record),
                source: Box::new(source),
            }),
        }
    }

    fn read_as<K: ResourceKind>(&self, id: u64, prior: Option<&K::State>) -> Result<ReadOutcome> {
        match K::read(&self.ctx(K::KIND), id)? {
            Some(fresh) => {
                let state = match prior {
                    Some(prior) => K::carry_forward(prior, fresh),
                    None => fresh,
                };
                Ok(ReadOutcome::Found(to_record::<K>(&state)))
            }
            None => {
                log::warn!(
                    "removing {} from state because it no longer exists",
                    Subject::new(K::KIND, id)
                );
                Ok(ReadOutcome::Gone)
            }
        }
    }

    fn update_as<K: ResourceKind>(&self, declared: &Attributes, record: &Record) -> Result<Record> {
        let spec = K::decode(declared, record.subject())?;
        let prior = K::decode_state(&record.attributes)?;
        let state = K::update(&self.ctx(K::KIND), &spec, &prior)?;
        Ok(to_record::<K>(&state))
    }

    fn diff_as<K: ResourceKind>(&self, declared: &Attributes, record: &Record) -> Result<ResourceDiff> {
        let spec = K::decode(declared, record.subject())?;
        let prior = K::decode_state(&record.attributes)?;
        Ok(K::diff(&spec, &prior, self.capabilities(K::KIND)))
    }
}

fn to_record<K: ResourceKind>(state: &K::State) -> Record {
    Record {
        kind: K::KIND,
        id: K::id(state),
        attributes: K::encode(state),
    }
}
