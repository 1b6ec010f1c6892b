//! Execution engine - runs independent jobs in parallel

use crate::context::{ApplyContext, CancelToken, ProgressCallback};
use crate::job::{Applied, Job};
use crate::planner::ExecutionPlan;
use crate::types::{ExecuteOptions, ExecuteSummary, Outcome};
use anyhow::Result;
use rayon::prelude::*;

/// Result of one job within a batch
#[derive(Debug)]
pub struct JobReport<T> {
    pub id: String,
    pub kind: &'static str,
    pub outcome: Outcome,
    pub output: Option<T>,
    pub error: Option<anyhow::Error>,
}

/// Results of a batch, in plan order
#[derive(Debug)]
pub struct ExecuteReport<T> {
    pub jobs: Vec<JobReport<T>>,
    pub summary: ExecuteSummary,
}

impl<T> ExecuteReport<T> {
    /// Check if every job succeeded
    pub fn is_success(&self) -> bool {
        self.summary.is_success()
    }
}

/// Execute a plan.
///
/// Jobs run on a thread pool sized by `opts.jobs`. Once `cancel` fires, jobs
/// that have not started are reported as cancelled; running jobs observe the
/// token through their context. Job failures are recorded in the report and
/// never abort the batch.
pub fn execute<J, P>(
    plan: &ExecutionPlan<J>,
    opts: &ExecuteOptions,
    cancel: &CancelToken,
    progress: &mut P,
) -> Result<ExecuteReport<J::Output>>
where
    J: Job,
    P: ProgressCallback,
{
    let mut summary = ExecuteSummary::default();
    if plan.is_empty() {
        return Ok(ExecuteReport {
            jobs: Vec::new(),
            summary,
        });
    }

    progress.on_batch_start(plan.len());

    let reports = if opts.jobs <= 1 || plan.len() == 1 {
        plan.jobs
            .iter()
            .map(|job| run_job(job, cancel))
            .collect::<Vec<_>>()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.jobs)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create thread pool: {e}"))?;

        pool.install(|| {
            plan.jobs
                .par_iter()
                .map(|job| run_job(job, cancel))
                .collect::<Vec<_>>()
        })
    };

    // Progress is reported after the parallel section; callbacks are not
    // required to be thread-safe.
    for report in &reports {
        progress.on_job_complete(&report.id, &report.outcome);
        summary.add_result(&report.outcome);
    }
    progress.on_batch_complete();

    Ok(ExecuteReport {
        jobs: reports,
        summary,
    })
}

fn run_job<J: Job>(job: &J, cancel: &CancelToken) -> JobReport<J::Output> {
    let id = job.id();
    let kind = job.kind();

    if cancel.is_cancelled() {
        return JobReport {
            id,
            kind,
            outcome: Outcome::Cancelled,
            output: None,
            error: None,
        };
    }

    log::debug!("running {}", job.description());
    let ctx = ApplyContext::new(cancel);
    match job.run(&ctx) {
        Ok(Applied { outcome, output }) => JobReport {
            id,
            kind,
            outcome,
            output,
            error: None,
        },
        Err(e) => JobReport {
            id,
            kind,
            outcome: Outcome::Failed {
                error: format!("{e:#}"),
            },
            output: None,
            error: Some(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;

    #[derive(Debug)]
    struct TestJob {
        id: String,
        fail: bool,
    }

    impl Job for TestJob {
        type Output = String;

        fn id(&self) -> String {
            self.id.clone()
        }

        fn kind(&self) -> &'static str {
            "test"
        }

        fn description(&self) -> String {
            format!("Test job {}", self.id)
        }

        fn run(&self, _ctx: &ApplyContext<'_>) -> Result<Applied<String>> {
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(Applied::new(Outcome::Created, self.id.to_uppercase()))
        }
    }

    fn plan(specs: &[(&str, bool)]) -> ExecutionPlan<TestJob> {
        let mut plan = ExecutionPlan::new();
        for (id, fail) in specs {
            plan.add(TestJob {
                id: (*id).to_string(),
                fail: *fail,
            });
        }
        plan
    }

    #[test]
    fn test_execute_empty_plan() {
        let report = execute(
            &ExecutionPlan::<TestJob>::new(),
            &ExecuteOptions::default(),
            &CancelToken::new(),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(report.summary.total(), 0);
    }

    #[test]
    fn test_parallel_keeps_plan_order() {
        let plan = plan(&[("a", false), ("b", false), ("c", false)]);
        let report = execute(
            &plan,
            &ExecuteOptions { jobs: 3 },
            &CancelToken::new(),
            &mut NoProgress,
        )
        .unwrap();

        let outputs: Vec<_> = report.jobs.iter().filter_map(|j| j.output.clone()).collect();
        assert_eq!(outputs, vec!["A", "B", "C"]);
        assert_eq!(report.summary.created, 3);
    }

    #[test]
    fn test_failure_does_not_abort_batch() {
        let plan = plan(&[("a", true), ("b", false)]);
        let report = execute(
            &plan,
            &ExecuteOptions { jobs: 1 },
            &CancelToken::new(),
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.created, 1);
        assert!(report.jobs[0].error.is_some());
        assert!(!report.is_success());
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = execute(
            &plan(&[("a", false), ("b", false)]),
            &ExecuteOptions::default(),
            &cancel,
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(report.summary.cancelled, 2);
    }
}
