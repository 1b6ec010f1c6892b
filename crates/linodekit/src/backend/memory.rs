//! In-memory backend for tests and dry runs.
//!
//! Behaves like the API in the ways the reconciliation engine depends on:
//! ids are never reused, missing resources answer 404, secrets are only
//! returned by the create call, and migrations progress one step per poll.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::types::{
    BucketAccess, Instance, InstanceCreateOptions, InstanceMigrateOptions, InstanceStatus,
    InstanceUpdateOptions, MigrationType, ObjectStorageKey, ObjectStorageKeyCreateOptions,
    ObjectStorageKeyUpdateOptions,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateInstance,
    GetInstance(u64),
    UpdateInstance(u64),
    DeleteInstance(u64),
    MigrateInstance {
        id: u64,
        region: String,
        migration_type: MigrationType,
    },
    CreateKey,
    GetKey(u64),
    UpdateKey(u64),
    DeleteKey(u64),
    ReplaceBucketAccess(u64),
}

impl Call {
    /// Whether the call changes remote state.
    pub fn is_write(&self) -> bool {
        !matches!(self, Call::GetInstance(_) | Call::GetKey(_))
    }
}

/// Operation selector for injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CreateInstance,
    GetInstance,
    UpdateInstance,
    DeleteInstance,
    MigrateInstance,
    CreateKey,
    GetKey,
    UpdateKey,
    DeleteKey,
    ReplaceBucketAccess,
}

/// How a migration started through this backend plays out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationScript {
    /// Report `migrating` for this many polls, then land in the target region
    CompleteAfter(u32),
    /// Stay `migrating` forever
    Stall,
    /// Report `migrating` for this many polls, then switch to the given status
    /// without changing region
    FailAfter(u32, InstanceStatus),
}

impl Default for MigrationScript {
    fn default() -> Self {
        MigrationScript::CompleteAfter(2)
    }
}

#[derive(Debug, Clone)]
struct PendingMigration {
    target: String,
    settled: InstanceStatus,
    remaining: u32,
    script: MigrationScript,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    instances: HashMap<u64, Instance>,
    keys: HashMap<u64, ObjectStorageKey>,
    migrations: HashMap<u64, PendingMigration>,
    script: MigrationScript,
    failures: HashMap<Op, VecDeque<Error>>,
    calls: Vec<Call>,
}

/// Thread-safe fake of the Linode API.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend. Ids start at 1.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic in another test thread must not hide this backend's state.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Set how migrations started from now on behave.
    pub fn set_migration_script(&self, script: MigrationScript) {
        self.lock().script = script;
    }

    /// Make the next call of `op` fail with `error`. Queued errors are used in order.
    pub fn fail_next(&self, op: Op, error: Error) {
        self.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Insert an instance as if it had been created out of band.
    pub fn seed_instance(&self, mut instance: Instance) -> u64 {
        let mut inner = self.lock();
        if instance.id == 0 {
            inner.next_id += 1;
            instance.id = inner.next_id;
        }
        inner.next_id = inner.next_id.max(instance.id);
        let id = instance.id;
        inner.instances.insert(id, instance);
        id
    }

    /// Insert an object storage key as if it had been created out of band.
    /// The secret is dropped, as it would be on any later read.
    pub fn seed_key(&self, mut key: ObjectStorageKey) -> u64 {
        let mut inner = self.lock();
        if key.id == 0 {
            inner.next_id += 1;
            key.id = inner.next_id;
        }
        inner.next_id = inner.next_id.max(key.id);
        key.secret_key = None;
        let id = key.id;
        inner.keys.insert(id, key);
        id
    }

    /// Change an instance behind the engine's back.
    pub fn mutate_instance(&self, id: u64, f: impl FnOnce(&mut Instance)) {
        if let Some(instance) = self.lock().instances.get_mut(&id) {
            f(instance);
        }
    }

    /// Remove a resource behind the engine's back.
    pub fn forget(&self, id: u64) {
        let mut inner = self.lock();
        inner.instances.remove(&id);
        inner.keys.remove(&id);
        inner.migrations.remove(&id);
    }

    /// Snapshot of an instance without recording a call.
    pub fn instance(&self, id: u64) -> Option<Instance> {
        self.lock().instances.get(&id).cloned()
    }

    /// Snapshot of a key without recording a call.
    pub fn key(&self, id: u64) -> Option<ObjectStorageKey> {
        self.lock().keys.get(&id).cloned()
    }

    /// All calls made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Calls that changed remote state.
    pub fn write_calls(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_write())
            .cloned()
            .collect()
    }

    /// Forget the call log.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn begin(&self, op: Op, call: Call) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        inner.calls.push(call);
        if let Some(err) = inner.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(inner)
    }
}

impl Inner {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Advance a pending migration by one poll.
    fn step_migration(&mut self, id: u64) {
        let Some(pending) = self.migrations.get_mut(&id) else {
            return;
        };
        let Some(instance) = self.instances.get_mut(&id) else {
            return;
        };

        if pending.remaining > 0 {
            pending.remaining -= 1;
            instance.status = InstanceStatus::Migrating;
            return;
        }

        match pending.script.clone() {
            MigrationScript::Stall => instance.status = InstanceStatus::Migrating,
            MigrationScript::CompleteAfter(_) => {
                instance.region.clone_from(&pending.target);
                instance.status = pending.settled;
                self.migrations.remove(&id);
            }
            MigrationScript::FailAfter(_, status) => {
                instance.status = status;
                self.migrations.remove(&id);
            }
        }
    }
}

impl Backend for MemoryBackend {
    fn create_instance(&self, opts: &InstanceCreateOptions) -> Result<Instance> {
        let mut inner = self.begin(Op::CreateInstance, Call::CreateInstance)?;
        let id = inner.allocate_id();
        let instance = Instance {
            id,
            label: opts.label.clone(),
            region: opts.region.clone(),
            instance_type: opts.instance_type.clone(),
            status: if opts.booted.unwrap_or(true) {
                InstanceStatus::Running
            } else {
                InstanceStatus::Offline
            },
            image: opts.image.clone(),
            group: opts.group.clone(),
            tags: opts.tags.clone(),
            ipv4: vec![format!("192.0.2.{}", id % 250 + 1)],
        };
        inner.instances.insert(id, instance.clone());
        Ok(instance)
    }

    fn get_instance(&self, id: u64) -> Result<Instance> {
        let mut inner = self.begin(Op::GetInstance, Call::GetInstance(id))?;
        inner.step_migration(id);
        inner
            .instances
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("linode {id}")))
    }

    fn update_instance(&self, id: u64, opts: &InstanceUpdateOptions) -> Result<Instance> {
        let mut inner = self.begin(Op::UpdateInstance, Call::UpdateInstance(id))?;
        let instance = inner
            .instances
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("linode {id}")))?;
        if let Some(label) = &opts.label {
            instance.label.clone_from(label);
        }
        if let Some(group) = &opts.group {
            instance.group.clone_from(group);
        }
        if let Some(tags) = &opts.tags {
            instance.tags.clone_from(tags);
        }
        Ok(instance.clone())
    }

    fn delete_instance(&self, id: u64) -> Result<()> {
        let mut inner = self.begin(Op::DeleteInstance, Call::DeleteInstance(id))?;
        inner.migrations.remove(&id);
        inner
            .instances
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("linode {id}")))
    }

    fn migrate_instance(&self, id: u64, opts: &InstanceMigrateOptions) -> Result<()> {
        let call = Call::MigrateInstance {
            id,
            region: opts.region.clone(),
            migration_type: opts.migration_type,
        };
        let mut inner = self.begin(Op::MigrateInstance, call)?;
        let script = inner.script.clone();
        if inner.migrations.contains_key(&id) {
            return Err(Error::Api {
                status: 400,
                message: "Linode busy: a migration is already in progress".into(),
            });
        }
        let instance = inner
            .instances
            .get(&id)
            .ok_or_else(|| Error::not_found(format!("linode {id}")))?;
        if instance.region == opts.region {
            return Err(Error::Api {
                status: 400,
                message: "region: Linode is already in this region".into(),
            });
        }
        let remaining = match script {
            MigrationScript::CompleteAfter(n) | MigrationScript::FailAfter(n, _) => n,
            MigrationScript::Stall => 0,
        };
        let pending = PendingMigration {
            target: opts.region.clone(),
            settled: instance.status,
            remaining,
            script,
        };
        inner.migrations.insert(id, pending);
        Ok(())
    }

    fn create_object_storage_key(
        &self,
        opts: &ObjectStorageKeyCreateOptions,
    ) -> Result<ObjectStorageKey> {
        let mut inner = self.begin(Op::CreateKey, Call::CreateKey)?;
        let id = inner.allocate_id();
        let grants = opts.bucket_access.clone().filter(|g| !g.is_empty());
        let key = ObjectStorageKey {
            id,
            label: opts.label.clone(),
            access_key: format!("AK{id:08}"),
            secret_key: Some(format!("SK-secret-{id:04}")),
            limited: grants.is_some(),
            bucket_access: grants,
        };
        let mut stored = key.clone();
        stored.secret_key = None;
        inner.keys.insert(id, stored);
        Ok(key)
    }

    fn get_object_storage_key(&self, id: u64) -> Result<ObjectStorageKey> {
        let inner = self.begin(Op::GetKey, Call::GetKey(id))?;
        inner
            .keys
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("object storage key {id}")))
    }

    fn update_object_storage_key(
        &self,
        id: u64,
        opts: &ObjectStorageKeyUpdateOptions,
    ) -> Result<ObjectStorageKey> {
        let mut inner = self.begin(Op::UpdateKey, Call::UpdateKey(id))?;
        let key = inner
            .keys
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("object storage key {id}")))?;
        if let Some(label) = &opts.label {
            key.label.clone_from(label);
        }
        Ok(key.clone())
    }

    fn delete_object_storage_key(&self, id: u64) -> Result<()> {
        let mut inner = self.begin(Op::DeleteKey, Call::DeleteKey(id))?;
        inner
            .keys
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("object storage key {id}")))
    }

    fn replace_bucket_access(&self, id: u64, grants: &[BucketAccess]) -> Result<()> {
        let mut inner = self.begin(Op::ReplaceBucketAccess, Call::ReplaceBucketAccess(id))?;
        let key = inner
            .keys
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("object storage key {id}")))?;
        key.limited = !grants.is_empty();
        key.bucket_access = (!grants.is_empty()).then(|| grants.to_vec());
        Ok(())
    }
}
