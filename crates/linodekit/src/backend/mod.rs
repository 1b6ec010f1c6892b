//! Backend abstraction for Linode API operations.
//!
//! The [`Backend`] trait defines the raw remote calls, allowing for different
//! implementations (real HTTP API, in-memory fake for testing).

pub mod http;
pub mod memory;

use crate::error::Result;
use crate::types::{
    BucketAccess, Instance, InstanceCreateOptions, InstanceMigrateOptions, InstanceUpdateOptions,
    ObjectStorageKey, ObjectStorageKeyCreateOptions, ObjectStorageKeyUpdateOptions,
};

/// Backend trait for Linode API operations.
///
/// Every method is one blocking request. Failures carry the HTTP status so
/// callers can tell a missing resource (404) from other rejections.
pub trait Backend: Send + Sync {
    /// Create an instance.
    fn create_instance(&self, opts: &InstanceCreateOptions) -> Result<Instance>;

    /// Fetch an instance.
    fn get_instance(&self, id: u64) -> Result<Instance>;

    /// Update mutable instance fields.
    fn update_instance(&self, id: u64, opts: &InstanceUpdateOptions) -> Result<Instance>;

    /// Delete an instance.
    fn delete_instance(&self, id: u64) -> Result<()>;

    /// Start relocating an instance. Returns once the API accepted the request.
    fn migrate_instance(&self, id: u64, opts: &InstanceMigrateOptions) -> Result<()>;

    /// Create an object storage key. The only response carrying the secret.
    fn create_object_storage_key(
        &self,
        opts: &ObjectStorageKeyCreateOptions,
    ) -> Result<ObjectStorageKey>;

    /// Fetch an object storage key.
    fn get_object_storage_key(&self, id: u64) -> Result<ObjectStorageKey>;

    /// Update mutable key fields.
    fn update_object_storage_key(
        &self,
        id: u64,
        opts: &ObjectStorageKeyUpdateOptions,
    ) -> Result<ObjectStorageKey>;

    /// Delete an object storage key.
    fn delete_object_storage_key(&self, id: u64) -> Result<()>;

    /// Replace the whole bucket grant list of a key.
    fn replace_bucket_access(&self, id: u64, grants: &[BucketAccess]) -> Result<()>;
}
