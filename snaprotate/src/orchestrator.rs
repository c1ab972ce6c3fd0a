//! Runs every configured job in name order and tallies the results.
//!
//! Each enabled job goes through resolve → initialise (locate) → create →
//! list → prune. A failure at any stage ends that job only; the remaining
//! jobs still run.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{is_job_enabled, resolve_job, ConfigValue, JobDefinition};
use crate::modules::ModuleFactory;
use crate::rotation::{CreatedBackup, PruneAction, PruneDecision};
use crate::utils::Result;

/// What one job did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub targets: usize,
    pub created: Vec<CreatedBackup>,
    pub decisions: Vec<PruneDecision>,
}

impl JobReport {
    pub fn deleted(&self) -> usize {
        self.count(PruneAction::Delete)
    }

    pub fn kept(&self) -> usize {
        self.count(PruneAction::Keep)
    }

    fn count(&self, action: PruneAction) -> usize {
        self.decisions.iter().filter(|d| d.action == action).count()
    }
}

#[derive(Debug)]
pub enum JobStatus {
    Succeeded(JobReport),
    Failed(String),
    /// Disabled in the configuration.
    Skipped,
}

#[derive(Debug)]
pub struct JobOutcome {
    pub name: String,
    pub status: JobStatus,
}

/// Per-run tally.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<JobOutcome>,
}

impl RunSummary {
    /// Jobs that were run, successfully or not.
    pub fn attempted(&self) -> usize {
        self.succeeded() + self.failed()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, JobStatus::Succeeded(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, JobStatus::Failed(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, JobStatus::Skipped))
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, name: &str) -> Option<&JobStatus> {
        self.outcomes
            .iter()
            .find(|o| o.name == name)
            .map(|o| &o.status)
    }
}

pub struct Orchestrator {
    factory: Arc<dyn ModuleFactory>,
}

impl Orchestrator {
    pub fn new(factory: Arc<dyn ModuleFactory>) -> Self {
        Self { factory }
    }

    /// Run all jobs. `jobs` is keyed by name, so iteration is lexicographic.
    pub async fn run(&self, jobs: &BTreeMap<String, ConfigValue>) -> RunSummary {
        if jobs.is_empty() {
            warn!("Have not found any job definition in the configuration, there is nothing to do");
        }

        let mut summary = RunSummary::default();
        for (name, raw) in jobs {
            let status = self.run_job(name, raw).await;
            summary.outcomes.push(JobOutcome {
                name: name.clone(),
                status,
            });
        }

        if summary.is_success() {
            info!(
                attempted = summary.attempted(),
                skipped = summary.skipped(),
                "Have successfully executed all jobs"
            );
        } else {
            error!(
                failed = summary.failed(),
                attempted = summary.attempted(),
                "Have finished running jobs with failures"
            );
        }
        summary
    }

    /// Resolve and run a single job section. The `enabled` flag is read
    /// before anything else, so a disabled job is never resolved.
    pub async fn run_job(&self, name: &str, raw: &ConfigValue) -> JobStatus {
        let resolved = match is_job_enabled(name, raw) {
            Ok(false) => {
                info!(job = %name, "Skipping job as it is disabled in the configuration");
                return JobStatus::Skipped;
            }
            Ok(true) => resolve_job(name, raw),
            Err(e) => Err(e),
        };
        let job = match resolved {
            Ok(job) => job,
            Err(e) => {
                error!(job = %name, error = %e, "Failed to execute job");
                return JobStatus::Failed(e.to_string());
            }
        };

        info!(job = %name, module = %job.module, dry_run = job.dry_run, "Running job");
        match self.execute(&job).await {
            Ok(report) => {
                info!(
                    job = %name,
                    volumes = report.targets,
                    created = report.created.len(),
                    deleted = report.deleted(),
                    kept = report.kept(),
                    "Job completed"
                );
                JobStatus::Succeeded(report)
            }
            Err(e) => {
                error!(job = %name, error = %e, "Failed to execute job");
                JobStatus::Failed(e.to_string())
            }
        }
    }

    async fn execute(&self, job: &JobDefinition) -> Result<JobReport> {
        let mut module = self.factory.create(job.module);
        module.load(job)?;
        module.initialise().await?;
        let created = module.create_backup().await?;
        let items = module.list_backups().await?;
        let decisions = module.prune_backups(items).await?;

        Ok(JobReport {
            targets: module.target_count(),
            created,
            decisions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::DefaultModuleFactory;
    use crate::provider::memory::{MemoryConnector, MemoryProvider};
    use crate::rotation::FixedClock;
    use chrono::DateTime;

    fn orchestrator(provider: Arc<MemoryProvider>) -> Orchestrator {
        let clock = Arc::new(FixedClock(
            DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z").unwrap(),
        ));
        let factory = DefaultModuleFactory::new(Arc::new(MemoryConnector::new(provider)), clock);
        Orchestrator::new(Arc::new(factory))
    }

    fn jobs(yaml: &str) -> BTreeMap<String, ConfigValue> {
        crate::config::ConfigDocument::from_yaml_str(yaml).unwrap().jobs
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_the_next() {
        let provider = Arc::new(
            MemoryProvider::new()
                .with_instance("i-0123456789abcdef0", &[])
                .with_volume("i-0123456789abcdef0", "vol-1", &[]),
        );
        let summary = orchestrator(provider.clone())
            .run(&jobs(
                r#"
jobs:
  beta:
    module: ebs-snapshot
    aws_region: eu-west-1
  alpha:
    module: ebs-snapshot
"#,
            ))
            .await;

        let order: Vec<&str> = summary.outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(order, vec!["alpha", "beta"]);
        assert!(matches!(summary.outcome("alpha"), Some(JobStatus::Failed(_))));
        assert!(matches!(summary.outcome("beta"), Some(JobStatus::Succeeded(_))));
        assert_eq!(summary.attempted(), 2);
        assert_eq!(summary.failed(), 1);
        assert!(!summary.is_success());
        assert_eq!(provider.created().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_job_is_skipped() {
        let provider = Arc::new(
            MemoryProvider::new()
                .with_instance("i-0123456789abcdef0", &[])
                .with_volume("i-0123456789abcdef0", "vol-1", &[]),
        );
        let summary = orchestrator(provider.clone())
            .run(&jobs(
                "jobs:\n  off:\n    module: ebs-snapshot\n    aws_region: eu-west-1\n    enabled: false\n",
            ))
            .await;

        assert_eq!(summary.attempted(), 0);
        assert_eq!(summary.skipped(), 1);
        assert!(summary.is_success());
        assert!(provider.created().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_incomplete_job_is_skipped() {
        let provider = Arc::new(MemoryProvider::new());
        let summary = orchestrator(provider.clone())
            .run(&jobs(
                "jobs:\n  draft:\n    module: ebs-snapshot\n    enabled: false\n",
            ))
            .await;

        assert!(matches!(summary.outcome("draft"), Some(JobStatus::Skipped)));
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.attempted(), 0);
        assert!(summary.is_success());
        assert!(provider.instance_queries().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_enabled_flag_fails_job() {
        let summary = orchestrator(Arc::new(MemoryProvider::new()))
            .run(&jobs(
                "jobs:\n  draft:\n    module: ebs-snapshot\n    enabled: \"off\"\n",
            ))
            .await;

        match summary.outcome("draft") {
            Some(JobStatus::Failed(msg)) => assert!(msg.contains("\"enabled\"")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(summary.failed(), 1);
    }

    #[tokio::test]
    async fn test_no_jobs_is_success() {
        let summary = orchestrator(Arc::new(MemoryProvider::new()))
            .run(&BTreeMap::new())
            .await;
        assert_eq!(summary.attempted(), 0);
        assert!(summary.is_success());
    }

    #[tokio::test]
    async fn test_provider_failure_fails_only_that_job() {
        let provider = Arc::new(MemoryProvider::new().fail_queries());
        let summary = orchestrator(provider)
            .run(&jobs(
                "jobs:\n  web:\n    module: ebs-snapshot\n    aws_region: eu-west-1\n",
            ))
            .await;

        match summary.outcome("web") {
            Some(JobStatus::Failed(msg)) => assert!(msg.contains("DescribeInstances")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_job_matching_nothing_succeeds() {
        let summary = orchestrator(Arc::new(MemoryProvider::new()))
            .run(&jobs(
                "jobs:\n  empty:\n    module: ebs-snapshot\n    aws_region: eu-west-1\n",
            ))
            .await;

        match summary.outcome("empty") {
            Some(JobStatus::Succeeded(report)) => {
                assert_eq!(report.targets, 0);
                assert!(report.created.is_empty());
                assert!(report.decisions.is_empty());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
