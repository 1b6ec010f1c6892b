//! HTTP backend for the Linode API v4.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::types::{
    BucketAccess, Instance, InstanceCreateOptions, InstanceMigrateOptions, InstanceUpdateOptions,
    ObjectStorageKey, ObjectStorageKeyCreateOptions, ObjectStorageKeyUpdateOptions,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Default API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.linode.com/v4";

/// Backend that talks to the real Linode API.
///
/// # Example
///
/// ```no_run
/// use linodekit::backend::Backend;
/// use linodekit::backend::http::HttpBackend;
///
/// let backend = HttpBackend::new("my-token");
/// let instance = backend.get_instance(123).unwrap();
/// println!("{} is {}", instance.label, instance.status);
/// ```
pub struct HttpBackend {
    /// HTTP agent for requests.
    agent: ureq::Agent,
    /// API base URL, without trailing slash.
    api_base: String,
    /// Personal access token.
    token: String,
    user_agent: String,
}

impl HttpBackend {
    /// Create a backend for the public API.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_base(DEFAULT_API_BASE, token)
    }

    /// Create a backend with a custom API base (for testing or proxies).
    pub fn with_api_base(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        // Status handling is done here so that error bodies can be read.
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            user_agent: concat!("linodekit/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Override the User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Get the current API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        log::debug!("GET {path}");
        let response = self
            .agent
            .get(&self.url(path))
            .header("Authorization", &format!("Bearer {}", self.token))
            .header("User-Agent", &self.user_agent)
            .call()?;
        read_json(response)
    }

    fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        body: &B,
    ) -> Result<T> {
        log::debug!("{method} {path}");
        let url = self.url(path);
        let auth = format!("Bearer {}", self.token);
        let response = match method {
            "POST" => self
                .agent
                .post(&url)
                .header("Authorization", &auth)
                .header("User-Agent", &self.user_agent)
                .send_json(body)?,
            _ => self
                .agent
                .put(&url)
                .header("Authorization", &auth)
                .header("User-Agent", &self.user_agent)
                .send_json(body)?,
        };
        read_json(response)
    }

    fn delete(&self, path: &str) -> Result<()> {
        log::debug!("DELETE {path}");
        let response = self
            .agent
            .delete(&self.url(path))
            .header("Authorization", &format!("Bearer {}", self.token))
            .header("User-Agent", &self.user_agent)
            .call()?;
        let _: serde_json::Value = read_json(response)?;
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(mut response: ureq::http::Response<ureq::Body>) -> Result<T> {
    let status = response.status().as_u16();
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| Error::InvalidResponse(e.to_string()))?;

    if !(200..300).contains(&status) {
        return Err(Error::from_response(status, &body));
    }

    let body = if body.trim().is_empty() { "{}" } else { &body };
    Ok(serde_json::from_str(body)?)
}

impl Backend for HttpBackend {
    fn create_instance(&self, opts: &InstanceCreateOptions) -> Result<Instance> {
        self.send("POST", "linode/instances", opts)
    }

    fn get_instance(&self, id: u64) -> Result<Instance> {
        self.get(&format!("linode/instances/{id}"))
    }

    fn update_instance(&self, id: u64, opts: &InstanceUpdateOptions) -> Result<Instance> {
        self.send("PUT", &format!("linode/instances/{id}"), opts)
    }

    fn delete_instance(&self, id: u64) -> Result<()> {
        self.delete(&format!("linode/instances/{id}"))
    }

    fn migrate_instance(&self, id: u64, opts: &InstanceMigrateOptions) -> Result<()> {
        let _: serde_json::Value = self.send("POST", &format!("linode/instances/{id}/migrate"), opts)?;
        Ok(())
    }

    fn create_object_storage_key(
        &self,
        opts: &ObjectStorageKeyCreateOptions,
    ) -> Result<ObjectStorageKey> {
        self.send("POST", "object-storage/keys", opts)
    }

    fn get_object_storage_key(&self, id: u64) -> Result<ObjectStorageKey> {
        let key: ObjectStorageKey = self.get(&format!("object-storage/keys/{id}"))?;
        Ok(key.normalize_secret())
    }

    fn update_object_storage_key(
        &self,
        id: u64,
        opts: &ObjectStorageKeyUpdateOptions,
    ) -> Result<ObjectStorageKey> {
        let key: ObjectStorageKey = self.send("PUT", &format!("object-storage/keys/{id}"), opts)?;
        Ok(key.normalize_secret())
    }

    fn delete_object_storage_key(&self, id: u64) -> Result<()> {
        self.delete(&format!("object-storage/keys/{id}"))
    }

    fn replace_bucket_access(&self, _id: u64, _grants: &[BucketAccess]) -> Result<()> {
        // Grants are fixed when the key is created.
        Err(Error::Unsupported {
            operation: "replace_bucket_access",
        })
    }
}
