//! # linodekit
//!
//! Blocking Rust client for the parts of the Linode API v4 that a
//! reconciliation engine drives: compute instances (including region
//! migration) and object storage access keys.
//!
//! ## Example
//!
//! ```no_run
//! use linodekit::{Client, InstanceUpdateOptions};
//!
//! let client = Client::new("my-token");
//! let instance = client.get_instance(123).expect("lookup failed");
//! println!("{} runs in {}", instance.label, instance.region);
//!
//! let opts = InstanceUpdateOptions {
//!     label: Some("renamed".into()),
//!     ..Default::default()
//! };
//! client.update_instance(instance.id, &opts).expect("update failed");
//! ```
//!
//! ## Retry Logic
//!
//! Transient failures (network errors, HTTP 429 and 5xx) are retried with
//! exponential backoff. Calls that are not idempotent (create, migrate) are
//! only re-sent after a 429. Configure retry behavior with [`RetryConfig`].
//!
//! ## Testing
//!
//! [`backend::memory::MemoryBackend`] is a scripted in-memory fake of the API
//! that records every call.

#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod retry;
pub mod types;

pub use error::{Error, ErrorCategory, Result};
pub use types::{
    BucketAccess, Instance, InstanceCreateOptions, InstanceMigrateOptions, InstanceStatus,
    InstanceUpdateOptions, MigrationType, ObjectStorageKey, ObjectStorageKeyCreateOptions,
    ObjectStorageKeyUpdateOptions, Permission, REDACTED, RetryConfig,
};

use backend::Backend;
use backend::http::HttpBackend;
use retry::{Idempotency, Interrupt, LogCallback};
use std::sync::Arc;

/// High-level client for Linode API operations.
///
/// The client wraps a backend and applies the retry policy to every call.
/// It is cheap to clone and safe to share between worker threads.
#[derive(Clone)]
pub struct Client {
    backend: Arc<dyn Backend>,
    retry: RetryConfig,
    interrupt: Option<Arc<dyn Interrupt>>,
}

impl Client {
    /// Create a client for the public API.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_backend(Arc::new(HttpBackend::new(token)))
    }

    /// Create a client with a custom backend (useful for testing).
    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            retry: RetryConfig::default(),
            interrupt: None,
        }
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The active retry policy.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Let `interrupt` cut retry backoff short.
    pub fn with_interrupt(mut self, interrupt: Arc<dyn Interrupt>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    fn call<T>(&self, idempotency: Idempotency, op: impl FnMut() -> Result<T>) -> Result<T> {
        retry::with_retry_until(
            &self.retry,
            idempotency,
            Some(&LogCallback),
            self.interrupt.as_deref(),
            op,
        )
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Create an instance.
    pub fn create_instance(&self, opts: &InstanceCreateOptions) -> Result<Instance> {
        self.call(Idempotency::NonIdempotent, || {
            self.backend.create_instance(opts)
        })
    }

    /// Fetch an instance.
    pub fn get_instance(&self, id: u64) -> Result<Instance> {
        self.call(Idempotency::Idempotent, || self.backend.get_instance(id))
    }

    /// Update mutable instance fields.
    pub fn update_instance(&self, id: u64, opts: &InstanceUpdateOptions) -> Result<Instance> {
        self.call(Idempotency::Idempotent, || {
            self.backend.update_instance(id, opts)
        })
    }

    /// Delete an instance.
    pub fn delete_instance(&self, id: u64) -> Result<()> {
        self.call(Idempotency::Idempotent, || self.backend.delete_instance(id))
    }

    /// Start relocating an instance to another region.
    pub fn migrate_instance(&self, id: u64, opts: &InstanceMigrateOptions) -> Result<()> {
        self.call(Idempotency::NonIdempotent, || {
            self.backend.migrate_instance(id, opts)
        })
    }

    // =========================================================================
    // Object Storage Keys
    // =========================================================================

    /// Create an object storage key. The response is the only one carrying the secret.
    pub fn create_object_storage_key(
        &self,
        opts: &ObjectStorageKeyCreateOptions,
    ) -> Result<ObjectStorageKey> {
        self.call(Idempotency::NonIdempotent, || {
            self.backend.create_object_storage_key(opts)
        })
    }

    /// Fetch an object storage key. The secret is never included.
    pub fn get_object_storage_key(&self, id: u64) -> Result<ObjectStorageKey> {
        self.call(Idempotency::Idempotent, || {
            self.backend.get_object_storage_key(id)
        })
        .map(ObjectStorageKey::normalize_secret)
    }

    /// Update mutable key fields.
    pub fn update_object_storage_key(
        &self,
        id: u64,
        opts: &ObjectStorageKeyUpdateOptions,
    ) -> Result<ObjectStorageKey> {
        self.call(Idempotency::Idempotent, || {
            self.backend.update_object_storage_key(id, opts)
        })
        .map(ObjectStorageKey::normalize_secret)
    }

    /// Delete an object storage key.
    pub fn delete_object_storage_key(&self, id: u64) -> Result<()> {
        self.call(Idempotency::Idempotent, || {
            self.backend.delete_object_storage_key(id)
        })
    }

    /// Replace the whole bucket grant list of a key.
    pub fn replace_bucket_access(&self, id: u64, grants: &[BucketAccess]) -> Result<()> {
        self.call(Idempotency::Idempotent, || {
            self.backend.replace_bucket_access(id, grants)
        })
    }
}
