//! # Converge
//!
//! Generic building blocks for reconciling declared state against a remote
//! system.
//!
//! ## Core Concepts
//!
//! - **Attributes**: A JSON-shaped attribute tree where each value is known,
//!   unknown or absent
//! - **ResourceSchema**: Which attributes a kind accepts and who owns them
//! - **KeyedDiff**: Order-insensitive comparison of keyed collections
//! - **Job / ExecutionPlan**: Independent operations run by the executor
//! - **CancelToken**: Cooperative cancellation shared by jobs and pollers
//!
//! ## Example
//!
//! ```ignore
//! use converge::{execute, Applied, ApplyContext, CancelToken, ExecuteOptions,
//!     ExecutionPlan, Job, NoProgress, Outcome};
//!
//! #[derive(Debug)]
//! struct Touch(String);
//!
//! impl Job for Touch {
//!     type Output = ();
//!     fn id(&self) -> String { self.0.clone() }
//!     fn kind(&self) -> &'static str { "touch" }
//!     fn description(&self) -> String { format!("Touch {}", self.0) }
//!     fn run(&self, _ctx: &ApplyContext<'_>) -> anyhow::Result<Applied<()>> {
//!         Ok(Applied::bare(Outcome::Updated))
//!     }
//! }
//!
//! let mut plan = ExecutionPlan::new();
//! plan.add(Touch("a".into()));
//! let report = execute(&plan, &ExecuteOptions::default(), &CancelToken::new(), &mut NoProgress)?;
//! ```

pub mod attr;
pub mod context;
pub mod diff;
pub mod executor;
pub mod job;
pub mod planner;
pub mod schema;
pub mod types;

// Re-export main types at crate root
pub use attr::{Attr, Attributes};
pub use context::{ApplyContext, CancelToken, LogProgress, NoProgress, ProgressCallback};
pub use diff::{find_duplicate, keyed_diff, DiffSummary, FieldChange, KeyedDiff, ResourceDiff};
pub use executor::{execute, ExecuteReport, JobReport};
pub use job::{Applied, Job};
pub use planner::ExecutionPlan;
pub use schema::{AttrType, AttributeSchema, Mode, ResourceSchema, ValidationError};
pub use types::{ExecuteOptions, ExecuteSummary, Outcome};
