//! Batch engine
//!
//! Runs a batch of requests against distinct resources concurrently:
//! 1. Planning - One job per request, optionally filtered by target
//! 2. Executing - Jobs run on a worker pool sharing one cancel token
//! 3. Reporting - Each job yields an outcome and, on success, a response

use crate::codec::parse_id;
use crate::controller::{Controller, Plan, summarize};
use crate::error::Error;
use crate::resource::{Kind, ReadOutcome, Record};
use converge::{
    Applied, ApplyContext, Attributes, CancelToken, DiffSummary, ExecuteOptions, ExecuteReport,
    ExecutionPlan, Job, Outcome, ProgressCallback, execute,
};
use std::fmt;

/// One host request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Create { kind: Kind, declared: Attributes },
    Read { kind: Kind, id: String },
    Refresh { record: Record },
    Update { declared: Attributes, record: Record },
    Delete { kind: Kind, id: String },
    Import { kind: Kind, id: String },
}

impl Request {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Create { kind, .. }
            | Self::Read { kind, .. }
            | Self::Delete { kind, .. }
            | Self::Import { kind, .. } => *kind,
            Self::Refresh { record } | Self::Update { record, .. } => record.kind,
        }
    }

    /// Resource id, if the request names one. Numeric ids are canonical.
    pub fn target_id(&self) -> Option<String> {
        match self {
            Self::Create { .. } => None,
            Self::Read { id, .. } | Self::Delete { id, .. } | Self::Import { id, .. } => Some(
                id.trim()
                    .parse::<u64>()
                    .map_or_else(|_| id.clone(), |n| n.to_string()),
            ),
            Self::Refresh { record } | Self::Update { record, .. } => Some(record.id.to_string()),
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Read { .. } => "read",
            Self::Refresh { .. } => "refresh",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Import { .. } => "import",
        }
    }
}

/// What a successful request hands back to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Current record of the resource
    Record(Record),
    /// The resource no longer exists and should leave state
    Removed { kind: Kind, id: u64 },
}

/// A request bound to a controller.
pub struct RequestJob {
    controller: Controller,
    request: Request,
    seq: usize,
}

impl fmt::Debug for RequestJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestJob")
            .field("seq", &self.seq)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

impl RequestJob {
    fn apply(&self, controller: &Controller) -> crate::error::Result<Applied<Response>> {
        match &self.request {
            Request::Create { kind, declared } => match controller.create(*kind, declared) {
                Ok(record) => Ok(Applied::new(Outcome::Created, Response::Record(record))),
                // The resource exists; hand the record back so it reaches state
                Err(e) => match e.partial_record().cloned() {
                    Some(record) => {
                        log::error!("{e}");
                        Ok(Applied::new(
                            Outcome::Failed {
                                error: e.to_string(),
                            },
                            Response::Record(record),
                        ))
                    }
                    None => Err(e),
                },
            },
            Request::Read { kind, id } => {
                let id = parse_id(*kind, id)?;
                Ok(read_result(
                    *kind,
                    id,
                    Outcome::Refreshed,
                    controller.read(*kind, &id.to_string())?,
                ))
            }
            Request::Refresh { record } => Ok(read_result(
                record.kind,
                record.id,
                Outcome::Refreshed,
                controller.refresh(record)?,
            )),
            Request::Update { declared, record } => {
                let updated = controller.update(declared, record)?;
                let outcome = if updated == *record {
                    Outcome::NoChange
                } else {
                    Outcome::Updated
                };
                Ok(Applied::new(outcome, Response::Record(updated)))
            }
            Request::Delete { kind, id } => {
                let id = parse_id(*kind, id)?;
                controller.delete(*kind, &id.to_string())?;
                Ok(Applied::new(
                    Outcome::Deleted,
                    Response::Removed { kind: *kind, id },
                ))
            }
            Request::Import { kind, id } => {
                let id = parse_id(*kind, id)?;
                let record = controller.import(*kind, &id.to_string())?;
                Ok(Applied::new(Outcome::Imported, Response::Record(record)))
            }
        }
    }
}

fn read_result(kind: Kind, id: u64, found: Outcome, outcome: ReadOutcome) -> Applied<Response> {
    match outcome {
        ReadOutcome::Found(record) => Applied::new(found, Response::Record(record)),
        ReadOutcome::Gone => Applied::new(Outcome::Gone, Response::Removed { kind, id }),
    }
}

impl Job for RequestJob {
    type Output = Response;

    fn id(&self) -> String {
        match self.request.target_id() {
            Some(id) => format!("{}.{}", self.request.kind(), id),
            None => format!("{}.new-{}", self.request.kind(), self.seq),
        }
    }

    fn kind(&self) -> &'static str {
        self.request.kind().type_name()
    }

    fn description(&self) -> String {
        format!("{} {}", self.request.verb(), self.id())
    }

    fn run(&self, ctx: &ApplyContext<'_>) -> anyhow::Result<Applied<Response>> {
        if ctx.cancel.is_cancelled() {
            log::debug!("skipping {}: cancelled", self.id());
            return Ok(Applied::bare(Outcome::Cancelled));
        }
        let controller = self.controller.clone().with_cancel(ctx.cancel.clone());
        match self.apply(&controller) {
            Ok(applied) => Ok(applied),
            Err(Error::Cancelled { subject }) => {
                log::warn!("{subject}: cancelled");
                Ok(Applied::bare(Outcome::Cancelled))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Runs request batches against one controller.
pub struct Engine {
    controller: Controller,
    options: ExecuteOptions,
}

impl Engine {
    pub fn new(controller: Controller) -> Self {
        Self {
            controller,
            options: ExecuteOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Build the job plan for a batch.
    ///
    /// `target` limits the batch to one kind (`linode_instance`) or one
    /// resource (`linode_instance.42`).
    pub fn plan(&self, requests: Vec<Request>, target: Option<&str>) -> ExecutionPlan<RequestJob> {
        let mut plan = ExecutionPlan::new();
        for (seq, request) in requests.into_iter().enumerate() {
            plan.add(RequestJob {
                controller: self.controller.clone(),
                request,
                seq,
            });
        }
        plan.filter_by_target(target)
    }

    /// Run a batch. Each request gets its own outcome; one failure does not
    /// stop the others. Cancelling `cancel` stops polling and skips requests
    /// that have not started.
    pub fn run_batch<P: ProgressCallback>(
        &self,
        requests: Vec<Request>,
        target: Option<&str>,
        cancel: &CancelToken,
        progress: &mut P,
    ) -> anyhow::Result<ExecuteReport<Response>> {
        let plan = self.plan(requests, target);
        log::info!("running {} requests", plan.len());
        execute(&plan, &self.options, cancel, progress)
    }

    /// Preview a batch of declarations without calling the provider.
    pub fn preview(
        &self,
        entries: &[(Kind, Option<&Attributes>, Option<&Record>)],
    ) -> crate::error::Result<(Vec<Plan>, DiffSummary)> {
        let plans = entries
            .iter()
            .map(|(kind, declared, record)| self.controller.plan(*kind, *declared, *record))
            .collect::<crate::error::Result<Vec<_>>>()?;
        let summary = summarize(&plans);
        Ok((plans, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::MigrationConfig;
    use crate::state::StateFile;
    use converge::NoProgress;
    use linodekit::backend::memory::{Call, MemoryBackend, Op};
    use linodekit::{Client, Error as ClientError, RetryConfig};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup(jobs: usize) -> (Arc<MemoryBackend>, Engine) {
        let _ = env_logger::builder().is_test(true).try_init();
        let backend = Arc::new(MemoryBackend::new());
        let client = Client::with_backend(backend.clone()).with_retry(RetryConfig::no_retry());
        let controller = Controller::new(client).with_migration_config(MigrationConfig {
            poll_interval: Duration::from_millis(1),
            max_polls: Some(20),
            ..MigrationConfig::default()
        });
        let engine = Engine::new(controller).with_options(ExecuteOptions { jobs });
        (backend, engine)
    }

    fn instance(label: &str, region: &str) -> Attributes {
        Attributes::from_json(json!({
            "label": label,
            "region": region,
            "type": "g6-nanode-1",
        }))
    }

    fn key(label: &str) -> Attributes {
        Attributes::from_json(json!({"label": label}))
    }

    fn records(report: &ExecuteReport<Response>) -> Vec<Record> {
        report
            .jobs
            .iter()
            .filter_map(|j| match &j.output {
                Some(Response::Record(r)) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_batch_create_in_parallel() {
        let (backend, engine) = setup(4);
        let requests = vec![
            Request::Create {
                kind: Kind::Instance,
                declared: instance("a", "us-east"),
            },
            Request::Create {
                kind: Kind::Instance,
                declared: instance("b", "us-west"),
            },
            Request::Create {
                kind: Kind::ObjectStorageKey,
                declared: key("c"),
            },
        ];

        let report = engine
            .run_batch(requests, None, &CancelToken::new(), &mut NoProgress)
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.summary.created, 3);
        assert_eq!(records(&report).len(), 3);
        let creates = backend
            .write_calls()
            .into_iter()
            .filter(|c| matches!(c, Call::CreateInstance | Call::CreateKey))
            .count();
        assert_eq!(creates, 3);
    }

    #[test]
    fn test_failure_is_isolated() {
        let (_backend, engine) = setup(2);
        let requests = vec![
            Request::Create {
                kind: Kind::ObjectStorageKey,
                declared: key("good"),
            },
            Request::Create {
                kind: Kind::ObjectStorageKey,
                declared: Attributes::from_json(json!({"label": "bad", "secret_key": "x"})),
            },
        ];

        let report = engine
            .run_batch(requests, None, &CancelToken::new(), &mut NoProgress)
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.summary.created, 1);
        assert_eq!(report.summary.failed, 1);
        let failed = report.jobs.iter().find(|j| j.error.is_some()).unwrap();
        assert!(matches!(&failed.outcome, Outcome::Failed { error } if error.contains("secret_key")));
    }

    #[test]
    fn test_cancelled_batch_skips_jobs() {
        let (backend, engine) = setup(1);
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = engine
            .run_batch(
                vec![Request::Create {
                    kind: Kind::Instance,
                    declared: instance("a", "us-east"),
                }],
                None,
                &cancel,
                &mut NoProgress,
            )
            .unwrap();

        assert_eq!(report.summary.cancelled, 1);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_update_reports_no_change() {
        let (backend, engine) = setup(1);
        let record = engine
            .controller()
            .create(Kind::Instance, &instance("a", "us-east"))
            .unwrap();
        backend.clear_calls();

        let report = engine
            .run_batch(
                vec![Request::Update {
                    declared: instance("a", "us-east"),
                    record,
                }],
                None,
                &CancelToken::new(),
                &mut NoProgress,
            )
            .unwrap();

        assert_eq!(report.jobs[0].outcome, Outcome::NoChange);
        assert!(backend.write_calls().is_empty());
    }

    #[test]
    fn test_gone_and_deleted_leave_state() {
        let (backend, engine) = setup(2);
        let kept = engine.controller().create(Kind::ObjectStorageKey, &key("kept")).unwrap();
        let vanished = engine.controller().create(Kind::ObjectStorageKey, &key("vanished")).unwrap();
        let doomed = engine.controller().create(Kind::Instance, &instance("d", "us-east")).unwrap();
        backend.forget(vanished.id);

        let mut state = StateFile::default();
        for record in [&kept, &vanished, &doomed] {
            state.upsert(record.clone());
        }

        let report = engine
            .run_batch(
                vec![
                    Request::Refresh { record: kept.clone() },
                    Request::Refresh {
                        record: vanished.clone(),
                    },
                    Request::Delete {
                        kind: Kind::Instance,
                        id: doomed.id.to_string(),
                    },
                ],
                None,
                &CancelToken::new(),
                &mut NoProgress,
            )
            .unwrap();
        state.absorb(&report);

        assert_eq!(report.summary.gone, 1);
        assert_eq!(report.summary.deleted, 1);
        assert_eq!(state.records.len(), 1);
        assert!(state.get(Kind::ObjectStorageKey, kept.id).is_some());
    }

    #[test]
    fn test_delete_with_padded_id_leaves_state() {
        let (backend, engine) = setup(1);
        let record = engine.controller().create(Kind::Instance, &instance("a", "us-east")).unwrap();
        assert_eq!(record.id, 1);
        let mut state = StateFile::default();
        state.upsert(record);

        let report = engine
            .run_batch(
                vec![Request::Delete {
                    kind: Kind::Instance,
                    id: "01".into(),
                }],
                None,
                &CancelToken::new(),
                &mut NoProgress,
            )
            .unwrap();
        state.absorb(&report);

        assert_eq!(report.jobs[0].id, "linode_instance.1");
        assert_eq!(
            report.jobs[0].output,
            Some(Response::Removed {
                kind: Kind::Instance,
                id: 1
            })
        );
        assert!(state.records.is_empty());
        assert!(backend.instance(1).is_none());
    }

    #[test]
    fn test_partial_create_reaches_state() {
        let (backend, engine) = setup(1);
        backend.fail_next(Op::GetKey, ClientError::from_response(503, ""));

        let report = engine
            .run_batch(
                vec![Request::Create {
                    kind: Kind::ObjectStorageKey,
                    declared: key("backup"),
                }],
                None,
                &CancelToken::new(),
                &mut NoProgress,
            )
            .unwrap();
        let mut state = StateFile::default();
        state.absorb(&report);

        assert_eq!(report.summary.failed, 1);
        assert!(matches!(&report.jobs[0].outcome, Outcome::Failed { error } if error.contains("not read back")));
        let kept = state.get(Kind::ObjectStorageKey, 1).unwrap();
        assert_eq!(kept.attributes.str("secret_key"), Some("SK-secret-0001"));
    }

    #[test]
    fn test_job_started_after_cancel_is_cancelled() {
        let (backend, engine) = setup(1);
        let plan = engine.plan(
            vec![Request::Create {
                kind: Kind::Instance,
                declared: instance("a", "us-east"),
            }],
            None,
        );
        let cancel = CancelToken::new();
        cancel.cancel();

        let applied = plan.jobs[0].run(&ApplyContext::new(&cancel)).unwrap();

        assert_eq!(applied.outcome, Outcome::Cancelled);
        assert!(applied.output.is_none());
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_target_filter() {
        let (backend, engine) = setup(1);
        let requests = vec![
            Request::Create {
                kind: Kind::Instance,
                declared: instance("a", "us-east"),
            },
            Request::Create {
                kind: Kind::ObjectStorageKey,
                declared: key("c"),
            },
        ];

        let report = engine
            .run_batch(
                requests,
                Some("linode_object_storage_key"),
                &CancelToken::new(),
                &mut NoProgress,
            )
            .unwrap();

        assert_eq!(report.jobs.len(), 1);
        assert_eq!(backend.write_calls(), vec![Call::CreateKey]);
    }

    #[test]
    fn test_preview() {
        let (backend, engine) = setup(1);
        let record = engine
            .controller()
            .create(Kind::Instance, &instance("a", "us-east"))
            .unwrap();
        backend.clear_calls();
        let moved = instance("a", "us-west");
        let fresh = key("k");

        let (plans, summary) = engine
            .preview(&[
                (Kind::Instance, Some(&moved), Some(&record)),
                (Kind::ObjectStorageKey, Some(&fresh), None),
            ])
            .unwrap();

        assert!(matches!(plans[0], Plan::Update(_)));
        assert_eq!(plans[1], Plan::Create);
        assert_eq!(summary.total(), 2);
        assert!(backend.calls().is_empty());
    }
}
