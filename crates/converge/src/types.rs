//! Core types for converging remote resources

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a single job did to its resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Observed state already matched the declaration
    NoChange,
    /// Resource was created
    Created,
    /// Resource was modified in place (including a migration)
    Updated,
    /// Resource was deleted
    Deleted,
    /// Resource no longer exists remotely
    Gone,
    /// State was re-read without changes
    Refreshed,
    /// Existing resource was adopted
    Imported,
    /// Job failed
    Failed { error: String },
    /// Job was not started, or stopped, because the batch was cancelled
    Cancelled,
}

impl Outcome {
    /// Check if the outcome represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. } | Self::Cancelled)
    }

    /// Check if the outcome represents a remote change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Deleted)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoChange => write!(f, "no change"),
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
            Self::Gone => write!(f, "gone"),
            Self::Refreshed => write!(f, "refreshed"),
            Self::Imported => write!(f, "imported"),
            Self::Failed { error } => write!(f, "failed: {error}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub gone: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl ExecuteSummary {
    /// Total number of remote changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Check if execution was fully successful
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    /// Total number of jobs processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.gone + self.unchanged + self.failed + self.cancelled
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &ExecuteSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.gone += other.gone;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }

    /// Add an outcome to the summary
    pub fn add_result(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Deleted => self.deleted += 1,
            Outcome::Gone => self.gone += 1,
            Outcome::NoChange | Outcome::Refreshed | Outcome::Imported => self.unchanged += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Cancelled => self.cancelled += 1,
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of jobs run in parallel
    pub jobs: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self { jobs: 4 }
    }
}
