//! Engine configuration.
//!
//! Read from `~/.config/linode-converge/config.toml`. Every section and key
//! is optional:
//!
//! ```toml
//! [api]
//! url = "https://api.linode.com/v4"
//! token_env = "LINODE_TOKEN"
//!
//! [migration]
//! poll_interval_secs = 5
//! timeout_secs = 1800
//! default_mode = "cold"
//!
//! [retry]
//! max_attempts = 4
//!
//! [state]
//! path = "~/.local/state/linode-converge/state.json"
//! ```

use crate::controller::Controller;
use crate::migration::MigrationConfig;
use anyhow::{Context, Result, bail};
use linodekit::backend::http::{DEFAULT_API_BASE, HttpBackend};
use linodekit::{Client, MigrationType, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TOKEN_ENV: &str = "LINODE_TOKEN";

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("linode-converge"))
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub api: ApiConfig,
    pub migration: MigrationSection,
    pub retry: RetrySection,
    pub state: StateSection,
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub url: String,
    /// Inline token. Prefer `token_env`.
    pub token: Option<String>,
    /// Environment variable holding the token
    pub token_env: String,
    pub user_agent: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_API_BASE.to_string(),
            token: None,
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationSection {
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    pub max_polls: Option<u32>,
    pub default_mode: MigrationType,
}

impl Default for MigrationSection {
    fn default() -> Self {
        let defaults = MigrationConfig::default();
        Self {
            poll_interval_secs: defaults.poll_interval.as_secs(),
            timeout_secs: defaults.timeout.as_secs(),
            max_polls: defaults.max_polls,
            default_mode: defaults.default_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: u64::try_from(defaults.base_delay.as_millis()).unwrap_or(u64::MAX),
            backoff_factor: defaults.backoff_factor,
            max_delay_ms: u64::try_from(defaults.max_delay.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateSection {
    /// State file location; `~` is expanded
    pub path: Option<String>,
}

// ============================================================================
// Loading
// ============================================================================

impl EngineConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Invalid engine configuration")?;
        config.check()?;
        Ok(config)
    }

    /// Load configuration from a file. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Failed to load {}", path.display()))
    }

    /// Load configuration from the default location
    pub fn load_default() -> Result<Self> {
        Self::load(&config_dir()?.join("config.toml"))
    }

    fn check(&self) -> Result<()> {
        if self.migration.poll_interval_secs == 0 {
            bail!("migration.poll_interval_secs must be at least 1");
        }
        if self.migration.timeout_secs == 0 {
            bail!("migration.timeout_secs must be at least 1");
        }
        if self.migration.max_polls == Some(0) {
            bail!("migration.max_polls must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.backoff_factor < 1.0 {
            bail!("retry.backoff_factor must be at least 1.0");
        }
        Ok(())
    }

    // ========================================================================
    // Derived settings
    // ========================================================================

    /// API token, from the inline value or the configured environment variable
    pub fn token(&self) -> Result<String> {
        if let Some(token) = self.api.token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }
        match std::env::var(&self.api.token_env) {
            Ok(token) if !token.is_empty() => Ok(token),
            _ => bail!(
                "No API token: set {} or api.token in the configuration",
                self.api.token_env
            ),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            backoff_factor: self.retry.backoff_factor,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn migration_config(&self) -> MigrationConfig {
        MigrationConfig {
            poll_interval: Duration::from_secs(self.migration.poll_interval_secs),
            timeout: Duration::from_secs(self.migration.timeout_secs),
            max_polls: self.migration.max_polls,
            default_mode: self.migration.default_mode,
        }
    }

    /// Expanded state file path, if one is configured
    pub fn state_path(&self) -> Option<PathBuf> {
        self.state
            .path
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
    }

    /// HTTP client for the configured API
    pub fn client(&self) -> Result<Client> {
        let mut backend = HttpBackend::with_api_base(&self.api.url, self.token()?);
        if let Some(ua) = &self.api.user_agent {
            backend = backend.user_agent(ua);
        }
        Ok(Client::with_backend(Arc::new(backend)).with_retry(self.retry_config()))
    }

    /// Controller for the configured API and migration bounds
    pub fn controller(&self) -> Result<Controller> {
        Ok(Controller::new(self.client()?).with_migration_config(self.migration_config()))
    }
}
