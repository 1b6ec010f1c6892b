//! Core types for the Linode instance and object storage key APIs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placeholder the API returns in place of a secret key after creation.
pub const REDACTED: &str = "[REDACTED]";

/// Status of a Linode instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Offline,
    Booting,
    Rebooting,
    ShuttingDown,
    Provisioning,
    Deleting,
    Migrating,
    Rebuilding,
    Cloning,
    Restoring,
    Resizing,
    Stopped,
    BillingSuspension,
    /// Any status this client does not know about
    #[serde(other)]
    Unknown,
}

impl InstanceStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Offline => "offline",
            InstanceStatus::Booting => "booting",
            InstanceStatus::Rebooting => "rebooting",
            InstanceStatus::ShuttingDown => "shutting_down",
            InstanceStatus::Provisioning => "provisioning",
            InstanceStatus::Deleting => "deleting",
            InstanceStatus::Migrating => "migrating",
            InstanceStatus::Rebuilding => "rebuilding",
            InstanceStatus::Cloning => "cloning",
            InstanceStatus::Restoring => "restoring",
            InstanceStatus::Resizing => "resizing",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::BillingSuspension => "billing_suspension",
            InstanceStatus::Unknown => "unknown",
        }
    }

    /// Parse a wire name. Unrecognized names map to [`InstanceStatus::Unknown`].
    pub fn parse(s: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .unwrap_or(InstanceStatus::Unknown)
    }

    /// Whether the instance is on its way from one settled status to another.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Booting
                | InstanceStatus::Rebooting
                | InstanceStatus::ShuttingDown
                | InstanceStatus::Provisioning
                | InstanceStatus::Migrating
                | InstanceStatus::Rebuilding
                | InstanceStatus::Cloning
                | InstanceStatus::Restoring
                | InstanceStatus::Resizing
        )
    }

    /// Whether the API accepts configuration changes in this status.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Running | InstanceStatus::Offline | InstanceStatus::Stopped
        )
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A Linode compute instance as returned by `GET /linode/instances/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: u64,
    pub label: String,
    pub region: String,
    /// Plan id, e.g. `g6-nanode-1`
    #[serde(rename = "type")]
    pub instance_type: String,
    pub status: InstanceStatus,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub ipv4: Vec<String>,
}

/// Body of `POST /linode/instances`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstanceCreateOptions {
    pub label: String,
    pub region: String,
    #[serde(rename = "type")]
    pub instance_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_pass: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authorized_keys: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booted: Option<bool>,
}

/// Body of `PUT /linode/instances/{id}`. Only set fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstanceUpdateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl InstanceUpdateOptions {
    /// Whether the update would send no fields at all.
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.group.is_none() && self.tags.is_none()
    }
}

/// How an instance is relocated between regions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationType {
    /// Instance is powered off for the transfer
    #[default]
    Cold,
    /// Live migration, the instance keeps running
    Warm,
}

impl MigrationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationType::Cold => "cold",
            MigrationType::Warm => "warm",
        }
    }

    /// Parse a migration type name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cold" => Some(MigrationType::Cold),
            "warm" => Some(MigrationType::Warm),
            _ => None,
        }
    }
}

impl std::fmt::Display for MigrationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Body of `POST /linode/instances/{id}/migrate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceMigrateOptions {
    pub region: String,
    #[serde(rename = "type")]
    pub migration_type: MigrationType,
}

/// Permission level of a bucket grant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    #[default]
    None,
    ReadOnly,
    ReadWrite,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::None => "none",
            Permission::ReadOnly => "read_only",
            Permission::ReadWrite => "read_write",
        }
    }

    /// Parse a permission name. Hyphenated spellings are accepted too.
    pub fn parse(s: &str) -> Option<Self> {
        match s.replace('-', "_").as_str() {
            "none" => Some(Permission::None),
            "read_only" => Some(Permission::ReadOnly),
            "read_write" => Some(Permission::ReadWrite),
            _ => None,
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single bucket grant of a limited access key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketAccess {
    pub bucket_name: String,
    pub cluster: String,
    pub permissions: Permission,
}

/// An object storage access key as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStorageKey {
    pub id: u64,
    pub label: String,
    pub access_key: String,
    /// Present only in the create response; later reads are normalized to `None`.
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub limited: bool,
    #[serde(default)]
    pub bucket_access: Option<Vec<BucketAccess>>,
}

impl ObjectStorageKey {
    /// Drop the secret if the API sent a redaction placeholder.
    pub fn normalize_secret(mut self) -> Self {
        if self
            .secret_key
            .as_deref()
            .is_some_and(|s| s.is_empty() || s == REDACTED)
        {
            self.secret_key = None;
        }
        self
    }
}

/// Body of `POST /object-storage/keys`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectStorageKeyCreateOptions {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_access: Option<Vec<BucketAccess>>,
}

/// Body of `PUT /object-storage/keys/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectStorageKeyUpdateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_deserialize() {
        let json = r#"{
            "id": 123,
            "label": "web-1",
            "region": "us-east",
            "type": "g6-nanode-1",
            "status": "running",
            "image": "linode/ubuntu22.04",
            "group": "",
            "tags": ["prod"],
            "ipv4": ["192.0.2.10"],
            "specs": {"disk": 25600}
        }"#;
        let instance: Instance = serde_json::from_str(json).unwrap();
        assert_eq!(instance.id, 123);
        assert_eq!(instance.instance_type, "g6-nanode-1");
        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(instance.tags, vec!["prod"]);
    }

    #[test]
    fn test_unknown_status() {
        let status: InstanceStatus = serde_json::from_str(r#""teleporting""#).unwrap();
        assert_eq!(status, InstanceStatus::Unknown);
        assert_eq!(InstanceStatus::parse("shutting_down"), InstanceStatus::ShuttingDown);
        assert_eq!(InstanceStatus::parse("nope"), InstanceStatus::Unknown);
    }

    #[test]
    fn test_status_classes() {
        assert!(InstanceStatus::Migrating.is_transitional());
        assert!(InstanceStatus::Booting.is_transitional());
        assert!(!InstanceStatus::Running.is_transitional());
        assert!(InstanceStatus::Offline.is_settled());
        assert!(!InstanceStatus::Deleting.is_settled());
        assert!(!InstanceStatus::Deleting.is_transitional());
    }

    #[test]
    fn test_migrate_options_wire_format() {
        let opts = InstanceMigrateOptions {
            region: "us-west".into(),
            migration_type: MigrationType::Cold,
        };
        let json = serde_json::to_value(&opts).unwrap();
        assert_eq!(json["region"], "us-west");
        assert_eq!(json["type"], "cold");
    }

    #[test]
    fn test_update_options_skip_unset_fields() {
        let opts = InstanceUpdateOptions {
            label: Some("renamed".into()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&opts).unwrap(), r#"{"label":"renamed"}"#);
        assert!(InstanceUpdateOptions::default().is_empty());
    }

    #[test]
    fn test_permission_parse() {
        assert_eq!(Permission::parse("read_only"), Some(Permission::ReadOnly));
        assert_eq!(Permission::parse("read-write"), Some(Permission::ReadWrite));
        assert_eq!(Permission::parse("admin"), None);
    }

    #[test]
    fn test_redacted_secret_is_dropped() {
        let json = r#"{"id":7,"label":"k","access_key":"AK","secret_key":"[REDACTED]","limited":false,"bucket_access":null}"#;
        let key: ObjectStorageKey = serde_json::from_str(json).unwrap();
        assert_eq!(key.normalize_secret().secret_key, None);
    }

    #[test]
    fn test_retry_delay_calculation() {
        let config = RetryConfig::new(5, Duration::from_secs(1), 2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(30));
    }
}
