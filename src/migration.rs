//! Region migration state machine.
//!
//! ```text
//! Stable -> Requested -> InProgress -> Completed
//!                             \-----> Failed
//! ```
//!
//! A migration is started with one initiate call and then observed by
//! polling the instance. The engine never retries or rolls back a migration;
//! a timeout, failure or cancellation leaves the provider-side operation as
//! it is, and the next update resumes polling.

use crate::error::{Error, Result, Subject};
use crate::resource::Kind;
use converge::CancelToken;
use linodekit::{Client, Instance, InstanceMigrateOptions, InstanceStatus, MigrationType};
use std::fmt;
use std::time::{Duration, Instant};

/// Bounds on migration polling.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    /// Wait between polls
    pub poll_interval: Duration,
    /// Give up after this long
    pub timeout: Duration,
    /// Give up after this many polls
    pub max_polls: Option<u32>,
    /// Mode used when the declaration does not name one
    pub default_mode: MigrationType,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(30 * 60),
            max_polls: None,
            default_mode: MigrationType::Cold,
        }
    }
}

/// Phase of a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    Stable,
    Requested,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationPhase::Stable => "stable",
            MigrationPhase::Requested => "requested",
            MigrationPhase::InProgress => "in progress",
            MigrationPhase::Completed => "completed",
            MigrationPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a single poll observed.
enum Poll {
    Continue,
    Done,
    Fail,
}

/// One migration of one instance.
pub struct Migration<'a> {
    client: &'a Client,
    config: &'a MigrationConfig,
    cancel: &'a CancelToken,
    subject: Subject,
    id: u64,
    target: String,
    mode: MigrationType,
    history: Vec<MigrationPhase>,
}

impl<'a> Migration<'a> {
    pub fn new(
        client: &'a Client,
        config: &'a MigrationConfig,
        cancel: &'a CancelToken,
        id: u64,
        target: impl Into<String>,
        mode: MigrationType,
    ) -> Self {
        Self {
            client,
            config,
            cancel,
            subject: Subject::new(Kind::Instance, id),
            id,
            target: target.into(),
            mode,
            history: vec![MigrationPhase::Stable],
        }
    }

    /// Current phase.
    pub fn phase(&self) -> MigrationPhase {
        self.history
            .last()
            .copied()
            .unwrap_or(MigrationPhase::Stable)
    }

    /// Every phase entered so far, in order.
    pub fn history(&self) -> &[MigrationPhase] {
        &self.history
    }

    fn enter(&mut self, phase: MigrationPhase) {
        let from = self.phase();
        if from != phase {
            log::info!("{}: migration to {} {from} -> {phase}", self.subject, self.target);
            self.history.push(phase);
        }
    }

    /// Drive the migration from a settled instance to completion.
    ///
    /// Returns the instance as observed in the target region. An instance
    /// already in the target region completes without an initiate call.
    pub fn run(&mut self, current: &Instance) -> Result<Instance> {
        if current.region == self.target {
            log::debug!("{}: already in {}", self.subject, self.target);
            self.enter(MigrationPhase::Completed);
            return Ok(current.clone());
        }

        let expected = current.status;
        self.enter(MigrationPhase::Requested);
        if self.mode == MigrationType::Warm {
            log::info!(
                "{}: warm migration requested; completion is judged by observation only",
                self.subject
            );
        }

        let opts = InstanceMigrateOptions {
            region: self.target.clone(),
            migration_type: self.mode,
        };
        if let Err(e) = self.client.migrate_instance(self.id, &opts) {
            self.enter(MigrationPhase::Failed);
            return Err(Error::provider(self.subject, e));
        }
        self.enter(MigrationPhase::InProgress);

        let target = self.target.clone();
        let mut seen_migrating = false;
        let landed = self.poll(|instance| match instance.status {
            InstanceStatus::Migrating => {
                seen_migrating = true;
                Poll::Continue
            }
            status if status.is_transitional() => Poll::Continue,
            status if status.is_settled() => {
                if instance.region == target {
                    if status == expected {
                        Poll::Done
                    } else {
                        Poll::Fail
                    }
                } else if seen_migrating {
                    // Settled again without moving
                    Poll::Fail
                } else {
                    // Provider has not picked the migration up yet
                    Poll::Continue
                }
            }
            _ => Poll::Fail,
        })?;
        self.enter(MigrationPhase::Completed);
        Ok(landed)
    }

    /// Wait for a migration started earlier to settle.
    ///
    /// Ends `Completed` if the instance landed in the target region. If it
    /// settled anywhere else the machine returns to `Stable` so that
    /// [`Migration::run`] can start a new one.
    pub fn resume(&mut self) -> Result<Instance> {
        log::info!("{}: resuming migration toward {}", self.subject, self.target);
        self.enter(MigrationPhase::InProgress);

        let settled = self.settle()?;
        if settled.region == self.target {
            self.enter(MigrationPhase::Completed);
        } else {
            log::info!(
                "{}: previous migration settled in {}, not {}",
                self.subject,
                settled.region,
                self.target
            );
            self.enter(MigrationPhase::Stable);
        }
        Ok(settled)
    }

    /// Read the instance until it reports a settled status.
    ///
    /// The first read happens immediately. Statuses that are neither
    /// settled nor transitional fail the migration.
    pub fn settle(&mut self) -> Result<Instance> {
        self.poll_from(false, |instance| {
            if instance.status.is_settled() {
                Poll::Done
            } else if instance.status.is_transitional() {
                Poll::Continue
            } else {
                Poll::Fail
            }
        })
    }

    fn poll(&mut self, check: impl FnMut(&Instance) -> Poll) -> Result<Instance> {
        self.poll_from(true, check)
    }

    fn poll_from(
        &mut self,
        wait_first: bool,
        mut check: impl FnMut(&Instance) -> Poll,
    ) -> Result<Instance> {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            let elapsed = started.elapsed();
            let exhausted = self.config.max_polls.is_some_and(|max| polls >= max);
            if exhausted || elapsed >= self.config.timeout {
                self.enter(MigrationPhase::Failed);
                return Err(Error::MigrationTimeout {
                    subject: self.subject,
                    target: self.target.clone(),
                    polls,
                    elapsed,
                });
            }

            let wait = if polls == 0 && !wait_first {
                Duration::ZERO
            } else {
                self.config.poll_interval.min(self.config.timeout - elapsed)
            };
            if self.cancel.wait_timeout(wait) {
                log::info!("{}: stopped polling migration (cancelled)", self.subject);
                return Err(Error::Cancelled {
                    subject: self.subject,
                });
            }

            polls += 1;
            let instance = match self.client.get_instance(self.id) {
                Ok(instance) => instance,
                Err(e) if e.is_not_found() => {
                    self.enter(MigrationPhase::Failed);
                    return Err(Error::MigrationFailed {
                        subject: self.subject,
                        last_status: "deleted".into(),
                    });
                }
                Err(e) => return Err(Error::provider(self.subject, e)),
            };
            log::debug!(
                "{}: poll {polls}: status {} in {}",
                self.subject,
                instance.status,
                instance.region
            );

            match check(&instance) {
                Poll::Continue => {}
                Poll::Done => return Ok(instance),
                Poll::Fail => {
                    self.enter(MigrationPhase::Failed);
                    return Err(Error::MigrationFailed {
                        subject: self.subject,
                        last_status: instance.status.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linodekit::backend::memory::{Call, MemoryBackend, MigrationScript};
    use linodekit::{Error as ClientError, RetryConfig, backend::memory::Op};
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryBackend>, Client, u64) {
        let _ = env_logger::builder().is_test(true).try_init();
        let backend = Arc::new(MemoryBackend::new());
        let client = Client::with_backend(backend.clone()).with_retry(RetryConfig::no_retry());
        let id = backend.seed_instance(Instance {
            id: 0,
            label: "web".into(),
            region: "us-east".into(),
            instance_type: "g6-standard-1".into(),
            status: InstanceStatus::Running,
            image: None,
            group: String::new(),
            tags: Vec::new(),
            ipv4: Vec::new(),
        });
        (backend, client, id)
    }

    fn fast() -> MigrationConfig {
        MigrationConfig {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
            max_polls: Some(20),
            default_mode: MigrationType::Cold,
        }
    }

    #[test]
    fn test_cold_migration_completes() {
        let (backend, client, id) = setup();
        let config = fast();
        let cancel = CancelToken::new();
        let current = backend.instance(id).unwrap();

        let mut migration = Migration::new(&client, &config, &cancel, id, "us-west", MigrationType::Cold);
        let done = migration.run(&current).unwrap();

        assert_eq!(done.region, "us-west");
        assert_eq!(done.status, InstanceStatus::Running);
        assert_eq!(
            migration.history(),
            &[
                MigrationPhase::Stable,
                MigrationPhase::Requested,
                MigrationPhase::InProgress,
                MigrationPhase::Completed
            ]
        );
    }

    #[test]
    fn test_same_region_short_circuits() {
        let (backend, client, id) = setup();
        let config = fast();
        let cancel = CancelToken::new();
        let current = backend.instance(id).unwrap();

        let mut migration = Migration::new(&client, &config, &cancel, id, "us-east", MigrationType::Cold);
        migration.run(&current).unwrap();

        assert_eq!(migration.phase(), MigrationPhase::Completed);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_stall_times_out_by_poll_count() {
        let (backend, client, id) = setup();
        backend.set_migration_script(MigrationScript::Stall);
        let config = MigrationConfig {
            max_polls: Some(3),
            ..fast()
        };
        let cancel = CancelToken::new();
        let current = backend.instance(id).unwrap();

        let mut migration = Migration::new(&client, &config, &cancel, id, "us-west", MigrationType::Cold);
        let err = migration.run(&current).unwrap_err();

        assert!(matches!(err, Error::MigrationTimeout { polls: 3, .. }));
        assert_eq!(migration.phase(), MigrationPhase::Failed);
        assert_eq!(backend.instance(id).unwrap().status, InstanceStatus::Migrating);
    }

    #[test]
    fn test_stall_times_out_by_duration() {
        let (backend, client, id) = setup();
        backend.set_migration_script(MigrationScript::Stall);
        let config = MigrationConfig {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(30),
            max_polls: None,
            default_mode: MigrationType::Cold,
        };
        let cancel = CancelToken::new();
        let current = backend.instance(id).unwrap();

        let err = Migration::new(&client, &config, &cancel, id, "us-west", MigrationType::Cold)
            .run(&current)
            .unwrap_err();
        assert!(matches!(err, Error::MigrationTimeout { .. }));
    }

    #[test]
    fn test_error_status_fails() {
        let (backend, client, id) = setup();
        backend.set_migration_script(MigrationScript::FailAfter(1, InstanceStatus::Deleting));
        let config = fast();
        let cancel = CancelToken::new();
        let current = backend.instance(id).unwrap();

        let err = Migration::new(&client, &config, &cancel, id, "us-west", MigrationType::Cold)
            .run(&current)
            .unwrap_err();
        match err {
            Error::MigrationFailed { last_status, .. } => assert_eq!(last_status, "deleting"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_settling_back_in_source_region_fails() {
        let (backend, client, id) = setup();
        backend.set_migration_script(MigrationScript::FailAfter(1, InstanceStatus::Running));
        let config = fast();
        let cancel = CancelToken::new();
        let current = backend.instance(id).unwrap();

        let err = Migration::new(&client, &config, &cancel, id, "us-west", MigrationType::Cold)
            .run(&current)
            .unwrap_err();
        assert!(matches!(err, Error::MigrationFailed { .. }));
    }

    #[test]
    fn test_deleted_during_poll() {
        let (backend, client, id) = setup();
        backend.set_migration_script(MigrationScript::Stall);
        backend.fail_next(Op::GetInstance, ClientError::not_found("linode"));
        let config = fast();
        let cancel = CancelToken::new();
        let current = backend.instance(id).unwrap();

        let err = Migration::new(&client, &config, &cancel, id, "us-west", MigrationType::Cold)
            .run(&current)
            .unwrap_err();
        match err {
            Error::MigrationFailed { last_status, .. } => assert_eq!(last_status, "deleted"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_initiate_rejected() {
        let (backend, client, id) = setup();
        backend.fail_next(Op::MigrateInstance, ClientError::from_response(400, "busy"));
        let config = fast();
        let cancel = CancelToken::new();
        let current = backend.instance(id).unwrap();

        let mut migration = Migration::new(&client, &config, &cancel, id, "us-west", MigrationType::Cold);
        let err = migration.run(&current).unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(migration.phase(), MigrationPhase::Failed);
    }

    #[test]
    fn test_cancel_stops_polling_without_rollback() {
        let (backend, client, id) = setup();
        backend.set_migration_script(MigrationScript::Stall);
        let config = MigrationConfig {
            poll_interval: Duration::from_secs(60),
            ..fast()
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let current = backend.instance(id).unwrap();

        let mut migration = Migration::new(&client, &config, &cancel, id, "us-west", MigrationType::Cold);
        let err = migration.run(&current).unwrap_err();

        assert!(matches!(err, Error::Cancelled { .. }));
        assert_eq!(migration.phase(), MigrationPhase::InProgress);
        let migrate_calls = backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::MigrateInstance { .. }))
            .count();
        assert_eq!(migrate_calls, 1);
    }

    #[test]
    fn test_warm_mode_forwarded() {
        let (backend, client, id) = setup();
        let config = fast();
        let cancel = CancelToken::new();
        let current = backend.instance(id).unwrap();

        Migration::new(&client, &config, &cancel, id, "us-west", MigrationType::Warm)
            .run(&current)
            .unwrap();
        assert_eq!(
            backend.calls()[0],
            Call::MigrateInstance {
                id,
                region: "us-west".into(),
                migration_type: MigrationType::Warm,
            }
        );
    }

    #[test]
    fn test_resume_waits_for_landing() {
        let (backend, client, id) = setup();
        backend.set_migration_script(MigrationScript::CompleteAfter(2));
        client
            .migrate_instance(
                id,
                &InstanceMigrateOptions {
                    region: "us-west".into(),
                    migration_type: MigrationType::Cold,
                },
            )
            .unwrap();
        backend.clear_calls();

        let config = fast();
        let cancel = CancelToken::new();
        let mut migration = Migration::new(&client, &config, &cancel, id, "us-west", MigrationType::Cold);
        let settled = migration.resume().unwrap();

        assert_eq!(settled.region, "us-west");
        assert_eq!(migration.phase(), MigrationPhase::Completed);
        assert!(backend.write_calls().is_empty());
    }

    #[test]
    fn test_settle_reads_immediately() {
        let (backend, client, id) = setup();
        backend.mutate_instance(id, |i| i.status = InstanceStatus::Offline);
        let config = MigrationConfig {
            poll_interval: Duration::from_secs(60),
            ..fast()
        };
        let cancel = CancelToken::new();

        let mut migration = Migration::new(&client, &config, &cancel, id, "us-west", MigrationType::Cold);
        let settled = migration.settle().unwrap();

        assert_eq!(settled.status, InstanceStatus::Offline);
        assert_eq!(migration.phase(), MigrationPhase::Stable);
        assert_eq!(backend.calls(), vec![Call::GetInstance(id)]);
    }
}
