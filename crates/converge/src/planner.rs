//! Execution planner - collects jobs for a batch

use crate::job::Job;

/// An ordered set of jobs to run together
#[derive(Debug)]
pub struct ExecutionPlan<J> {
    pub jobs: Vec<J>,
}

impl<J: Job> ExecutionPlan<J> {
    /// Create a new empty plan
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    /// Add a job to the plan
    pub fn add(&mut self, job: J) {
        self.jobs.push(job);
    }

    /// Filter plan to only include jobs matching a predicate
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&J) -> bool,
    {
        Self {
            jobs: self.jobs.into_iter().filter(|j| predicate(j)).collect(),
        }
    }

    /// Filter plan to only include jobs matching a target pattern
    ///
    /// Target format: "kind" or "kind.id"
    pub fn filter_by_target(self, target: Option<&str>) -> Self {
        match target {
            None => self,
            Some(t) => {
                let (kind, id) = parse_target(t);
                self.filter(|j| matches_filter(j, kind.as_deref(), id.as_deref()))
            }
        }
    }

    /// Number of jobs in the plan
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Check if plan is empty
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl<J: Job> Default for ExecutionPlan<J> {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a target string like "kind.id" into (kind, id)
fn parse_target(target: &str) -> (Option<String>, Option<String>) {
    let parts: Vec<&str> = target.split('.').collect();
    match parts.len() {
        1 => (Some(parts[0].to_string()), None),
        2 => (Some(parts[0].to_string()), Some(parts[1].to_string())),
        _ => (None, Some(target.to_string())),
    }
}

fn matches_filter<J: Job>(job: &J, kind: Option<&str>, id: Option<&str>) -> bool {
    if let Some(k) = kind
        && job.kind() != k
    {
        return false;
    }

    if let Some(i) = id
        && !job.id().contains(i)
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ApplyContext;
    use crate::job::Applied;
    use crate::types::Outcome;

    #[derive(Debug)]
    struct Named(&'static str, &'static str);

    impl Job for Named {
        type Output = ();

        fn id(&self) -> String {
            self.1.to_string()
        }

        fn kind(&self) -> &'static str {
            self.0
        }

        fn description(&self) -> String {
            format!("{}.{}", self.0, self.1)
        }

        fn run(&self, _ctx: &ApplyContext<'_>) -> anyhow::Result<Applied<()>> {
            Ok(Applied::bare(Outcome::NoChange))
        }
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("linode_instance"),
            (Some("linode_instance".to_string()), None)
        );
        assert_eq!(
            parse_target("linode_instance.123"),
            (Some("linode_instance".to_string()), Some("123".to_string()))
        );
        assert_eq!(parse_target("a.b.c"), (None, Some("a.b.c".to_string())));
    }

    #[test]
    fn test_filter_by_target() {
        let mut plan = ExecutionPlan::new();
        plan.add(Named("linode_instance", "1"));
        plan.add(Named("linode_instance", "2"));
        plan.add(Named("linode_object_storage_key", "1"));

        assert_eq!(plan.filter_by_target(Some("linode_instance.2")).len(), 1);

        let mut plan = ExecutionPlan::new();
        plan.add(Named("linode_instance", "1"));
        plan.add(Named("linode_object_storage_key", "1"));
        assert_eq!(plan.filter_by_target(Some("linode_object_storage_key")).len(), 1);
    }
}
