//! Reconciliation engine for Linode resources
//!
//! Converges declared attribute trees for two resource kinds:
//!
//! - `linode_instance` - compute instances, including in-place region
//!   migration
//! - `linode_object_storage_key` - access keys with nested bucket grants
//!
//! The host owns the declaration and the recorded state. The engine decodes
//! declarations, talks to the provider through [`linodekit`] and hands back
//! updated [`Record`]s.
//!
//! # Example
//!
//! ```ignore
//! use linode_converge::{Controller, Kind, config::EngineConfig};
//!
//! let controller = EngineConfig::load_default()?.controller()?;
//! let record = controller.create(Kind::ObjectStorageKey, &declared)?;
//! let record = controller.update(&changed, &record)?;
//! ```

pub mod codec;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod grants;
pub mod migration;
pub mod resource;
pub mod state;

pub use codec::Tracked;
pub use controller::{Controller, Plan};
pub use engine::{Engine, Request, Response};
pub use error::{Error, Result, Subject};
pub use migration::{MigrationConfig, MigrationPhase};
pub use resource::{Capabilities, Kind, ReadOutcome, Record};
