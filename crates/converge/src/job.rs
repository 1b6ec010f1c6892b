//! The unit of work the executor runs.

use crate::context::ApplyContext;
use crate::types::Outcome;
use anyhow::Result;
use std::fmt::Debug;

/// Result of a successful job run.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied<T> {
    pub outcome: Outcome,
    /// Value handed back to the caller, e.g. the refreshed record
    pub output: Option<T>,
}

impl<T> Applied<T> {
    pub fn new(outcome: Outcome, output: T) -> Self {
        Self {
            outcome,
            output: Some(output),
        }
    }

    /// Outcome with nothing to hand back.
    pub fn bare(outcome: Outcome) -> Self {
        Self {
            outcome,
            output: None,
        }
    }
}

/// One operation against one remote resource.
///
/// Jobs in a batch must target distinct resources; the executor runs them
/// concurrently.
pub trait Job: Send + Sync + Debug {
    type Output: Send;

    /// Unique identifier of the job within its batch
    fn id(&self) -> String;

    /// Resource kind name, used for target filtering
    fn kind(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> String;

    /// Perform the operation
    fn run(&self, ctx: &ApplyContext<'_>) -> Result<Applied<Self::Output>>;
}
