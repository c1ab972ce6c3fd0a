//! End-to-end runs from YAML text to a `RunSummary`, using the in-memory
//! provider and a fixed clock.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, SecondsFormat, TimeZone, Utc};
use snaprotate::config::ConfigDocument;
use snaprotate::modules::DefaultModuleFactory;
use snaprotate::orchestrator::{JobStatus, Orchestrator};
use snaprotate::provider::memory::{MemoryConnector, MemoryProvider};
use snaprotate::rotation::{FixedClock, SECONDS_PER_DAY};

const INSTANCE: &str = "i-0123456789abcdef0";

fn now() -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z").unwrap()
}

fn orchestrator(provider: Arc<MemoryProvider>) -> Orchestrator {
    let factory = DefaultModuleFactory::new(
        Arc::new(MemoryConnector::new(provider)),
        Arc::new(FixedClock(now())),
    );
    Orchestrator::new(Arc::new(factory))
}

fn description(volume: &str, created_at: i64) -> String {
    let at = Utc.timestamp_opt(created_at, 0).unwrap();
    format!("{}-{}", volume, at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Three volumes with one snapshot per day aged 0 to 6 days.
fn seeded_provider() -> MemoryProvider {
    let mut provider = MemoryProvider::new().with_instance(INSTANCE, &[("Name", "web")]);
    for volume in ["vol-a", "vol-b", "vol-c"] {
        provider = provider.with_volume(INSTANCE, volume, &[("Name", volume)]);
        for age in 0..7 {
            let created_at = now().timestamp() - age * SECONDS_PER_DAY - 3600;
            provider = provider.with_snapshot(
                volume,
                &format!("snap-{}-{}", volume, age),
                &description(volume, created_at),
                created_at,
            );
        }
    }
    provider
}

#[tokio::test]
async fn test_retention_rotates_every_volume() {
    let provider = Arc::new(seeded_provider());
    let document = ConfigDocument::from_yaml_str(
        r#"
global:
  loglevel: debug
jobs:
  nightly:
    module: ebs-snapshot
    aws_region: eu-west-1
    retention: 5
"#,
    )
    .unwrap();

    let summary = orchestrator(provider.clone()).run(&document.jobs).await;
    assert!(summary.is_success());
    assert_eq!(summary.attempted(), 1);

    let report = match summary.outcome("nightly") {
        Some(JobStatus::Succeeded(report)) => report,
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(report.targets, 3);
    assert_eq!(report.created.len(), 3);
    assert_eq!(report.deleted(), 3);
    // six surviving daily snapshots plus the new one, per volume
    assert_eq!(report.kept(), 21);

    let mut deleted = provider.deleted();
    deleted.sort();
    assert_eq!(deleted, vec!["snap-vol-a-6", "snap-vol-b-6", "snap-vol-c-6"]);
    assert_eq!(provider.snapshot_ids().len(), 21);
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let provider = Arc::new(seeded_provider());
    let document = ConfigDocument::from_yaml_str(
        "jobs:\n  nightly:\n    module: ebs-snapshot\n    aws_region: eu-west-1\n    retention: 5\n    dryrun: true\n",
    )
    .unwrap();

    let summary = orchestrator(provider.clone()).run(&document.jobs).await;
    assert!(summary.is_success());

    let report = match summary.outcome("nightly") {
        Some(JobStatus::Succeeded(report)) => report,
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(report.created.len(), 3);
    assert!(report.created.iter().all(|c| c.snapshot_id.is_none()));
    assert_eq!(report.deleted(), 3);
    assert!(provider.created().is_empty());
    assert!(provider.deleted().is_empty());
    assert_eq!(provider.snapshot_ids().len(), 21);
}

#[tokio::test]
async fn test_bad_job_does_not_block_good_job() {
    let provider = Arc::new(seeded_provider());
    let document = ConfigDocument::from_yaml_str(
        r#"
jobs:
  broken:
    module: ebs-snapshot
    aws_region: eu-west-1
    retention: "five"
  nightly:
    module: ebs-snapshot
    aws_region: eu-west-1
    retention: 5
  paused:
    module: ebs-snapshot
    enabled: false
"#,
    )
    .unwrap();

    let summary = orchestrator(provider).run(&document.jobs).await;
    assert_eq!(summary.attempted(), 2);
    assert_eq!(summary.succeeded(), 1);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.skipped(), 1);
    assert!(!summary.is_success());

    match summary.outcome("broken") {
        Some(JobStatus::Failed(msg)) => assert!(msg.contains("retention")),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_volume_tag_narrows_targets() {
    let provider = Arc::new(
        MemoryProvider::new()
            .with_instance(INSTANCE, &[("Role", "db")])
            .with_volume(INSTANCE, "vol-data", &[("Backup", "yes")])
            .with_volume(INSTANCE, "vol-scratch", &[]),
    );
    let document = ConfigDocument::from_yaml_str(
        r#"
jobs:
  db:
    module: ebs-snapshot
    aws_region: eu-west-1
    instance_tag: Role=db
    volume_tag:
      Backup: "yes"
"#,
    )
    .unwrap();

    let summary = orchestrator(provider.clone()).run(&document.jobs).await;
    assert!(summary.is_success());

    let created = provider.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].volume_id, "vol-data");
}

#[tokio::test]
async fn test_unknown_top_level_key_is_rejected() {
    let result = ConfigDocument::from_yaml_str("jobs: {}\nschedule: daily\n");
    assert!(result.is_err());
}
