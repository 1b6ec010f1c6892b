//! Persisted resource records.
//!
//! The engine keeps no state of its own between runs. Hosts that want to
//! remember what was created can keep records in a [`StateFile`] and feed
//! each engine report back through [`StateFile::absorb`].

use crate::engine::Response;
use crate::resource::{Kind, Record, record_key};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use converge::ExecuteReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Records keyed by `kind/id`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StateFile {
    #[serde(default)]
    pub records: BTreeMap<String, Record>,

    /// Last time the state was updated
    pub last_updated: DateTime<Utc>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

impl StateFile {
    /// Load state from disk. A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("State file does not exist, using empty state");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;

        let state: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        log::debug!("Loaded {} records from {}", state.records.len(), path.display());
        Ok(state)
    }

    /// Save state to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize state to JSON")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }

    // ========================================================================
    // Records
    // ========================================================================

    pub fn get(&self, kind: Kind, id: u64) -> Option<&Record> {
        self.records.get(&record_key(kind, id))
    }

    /// Insert or replace a record
    pub fn upsert(&mut self, record: Record) {
        self.records.insert(record.key(), record);
        self.last_updated = Utc::now();
    }

    /// Remove a record, returning it if it was present
    pub fn remove(&mut self, kind: Kind, id: u64) -> Option<Record> {
        let removed = self.records.remove(&record_key(kind, id));
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Records of one kind
    pub fn of_kind(&self, kind: Kind) -> impl Iterator<Item = &Record> {
        self.records.values().filter(move |r| r.kind == kind)
    }

    /// Apply the results of an engine run.
    ///
    /// Any job that hands back a record is stored, including a create that
    /// failed after the resource came into existence. Other failed and
    /// cancelled jobs leave their records untouched.
    pub fn absorb(&mut self, report: &ExecuteReport<Response>) {
        for job in &report.jobs {
            match &job.output {
                Some(Response::Record(record)) => self.upsert(record.clone()),
                Some(Response::Removed { kind, id }) => {
                    if self.remove(*kind, *id).is_some() {
                        log::debug!("Dropped {kind} {id} from state");
                    }
                }
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{Attributes, ExecuteSummary, JobReport, Outcome};
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: u64, label: &str) -> Record {
        let mut attributes = Attributes::from_json(json!({"id": id, "label": label}));
        attributes.set_unknown("secret_key");
        Record {
            kind: Kind::ObjectStorageKey,
            id,
            attributes,
        }
    }

    fn report(jobs: Vec<(Outcome, Option<Response>)>) -> ExecuteReport<Response> {
        ExecuteReport {
            jobs: jobs
                .into_iter()
                .enumerate()
                .map(|(i, (outcome, output))| JobReport {
                    id: i.to_string(),
                    kind: "linode_object_storage_key",
                    outcome,
                    output,
                    error: None,
                })
                .collect(),
            summary: ExecuteSummary::default(),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let state = StateFile::load(&dir.path().join("state.json")).unwrap();
        assert!(state.records.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut state = StateFile::default();
        state.upsert(record(4, "backup"));
        state.save(&path).unwrap();

        let loaded = StateFile::load(&path).unwrap();
        assert_eq!(loaded, state);
        let kept = loaded.get(Kind::ObjectStorageKey, 4).unwrap();
        assert!(kept.attributes.is_unknown("secret_key"));
    }

    #[test]
    fn test_corrupt_file_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let err = StateFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse state file"));
    }

    #[test]
    fn test_absorb() {
        let mut state = StateFile::default();
        state.upsert(record(1, "old"));
        state.upsert(record(2, "doomed"));
        state.upsert(record(3, "kept"));

        state.absorb(&report(vec![
            (Outcome::Updated, Some(Response::Record(record(1, "new")))),
            (
                Outcome::Gone,
                Some(Response::Removed {
                    kind: Kind::ObjectStorageKey,
                    id: 2,
                }),
            ),
            (
                Outcome::Failed {
                    error: "boom".into(),
                },
                None,
            ),
        ]));

        assert_eq!(
            state.get(Kind::ObjectStorageKey, 1).unwrap().attributes.str("label"),
            Some("new")
        );
        assert!(state.get(Kind::ObjectStorageKey, 2).is_none());
        assert!(state.get(Kind::ObjectStorageKey, 3).is_some());
        assert_eq!(state.of_kind(Kind::ObjectStorageKey).count(), 2);
        assert_eq!(state.of_kind(Kind::Instance).count(), 0);
    }
}
