//! Tests for a full backup run
//!
//! A run dumps every (server, database) pair, then sweeps both roots.

use chrono::Local;
use pg_backup_manager::managers::backup::sweep_clock;
use rstest::rstest;
use std::time::Duration;
use test_utils::{
    list_files, read_run_log, AggregateStatus, BackupOrchestrator, ConfigBuilder, FakeDumpInvoker,
    FakeFailure, JobId, OptionAssertions, RunExit, RunPhase, TestContext, DAY,
};

#[rstest]
#[case(1, 1)]
#[case(2, 3)]
#[case(3, 2)]
fn test_one_outcome_per_target(#[case] servers: usize, #[case] databases: usize) {
    let ctx = TestContext::from_builder(ConfigBuilder::grid(servers, databases));
    let invoker = FakeDumpInvoker::new();

    let report = BackupOrchestrator::with_invoker(ctx.config().unwrap().clone(), invoker.clone()).run();

    assert_eq!(report.outcomes.len(), servers * databases);
    assert_eq!(invoker.call_count(), servers * databases);
    assert_eq!(list_files(&ctx.backup_root()).len(), servers * databases);
    assert_eq!(report.status, AggregateStatus::Success);
    assert_eq!(report.exit(), RunExit::Success);
}

#[test]
fn test_two_by_two_with_one_failure() {
    let ctx = TestContext::from_builder(ConfigBuilder::grid(2, 2));
    let invoker = FakeDumpInvoker::new().fail(
        "db1",
        "app2",
        FakeFailure::ProcessError {
            exit_code: 1,
            stderr: "FATAL: password authentication failed".to_string(),
        },
    );

    let mut orchestrator = BackupOrchestrator::with_invoker(ctx.config().unwrap().clone(), invoker);
    let report = orchestrator.run();

    assert_eq!(orchestrator.phase(), RunPhase::Done);
    assert_eq!(
        report.status,
        AggregateStatus::PartialFailure {
            failed: vec![JobId::new("db1", 5432, "app2")]
        }
    );
    assert_eq!(report.exit(), RunExit::JobsFailed);
    assert_eq!(report.exit().code(), 2);

    let artifacts = list_files(&ctx.backup_root());
    assert_eq!(artifacts.len(), 3);
    assert!(!artifacts.iter().any(|name| name.starts_with("db1_app2_")));

    let lines = read_run_log(&report.run_log.assert_some()).unwrap();
    assert_eq!(lines.len(), 5);
    assert!(lines[..4].iter().all(|line| line["kind"] == "outcome"));
    assert_eq!(lines[1]["database"], "app2");
    assert_eq!(lines[1]["status"], "failed");
    assert_eq!(lines[4]["kind"], "summary");
    assert_eq!(lines[4]["status"], "partial_failure");
    assert_eq!(lines[4]["succeeded"], 3);
    assert_eq!(lines[4]["servers"][0]["server"], "db1:5432");
    assert_eq!(lines[4]["servers"][0]["failed"], 1);
    assert_eq!(lines[4]["servers"][1]["server"], "db2:5432");
    assert_eq!(lines[4]["servers"][1]["succeeded"], 2);
}

#[test]
fn test_every_job_failing_is_still_partial_failure() {
    let ctx = TestContext::from_builder(ConfigBuilder::grid(1, 2));
    let invoker = FakeDumpInvoker::new()
        .fail("db1", "app1", FakeFailure::Timeout)
        .fail("db1", "app2", FakeFailure::EmptyOutput);

    let report = BackupOrchestrator::with_invoker(ctx.config().unwrap().clone(), invoker).run();

    assert!(matches!(report.status, AggregateStatus::PartialFailure { ref failed } if failed.len() == 2));
    assert_eq!(report.exit(), RunExit::JobsFailed);
    assert!(list_files(&ctx.backup_root()).is_empty());
}

#[test]
fn test_retention_during_run() {
    let ctx = TestContext::from_builder(ConfigBuilder::grid(1, 1).retention_days(7));
    let started_at = Local::now();
    let clock = sweep_clock(started_at);

    for age in [1, 6, 7, 8, 30] {
        ctx.create_aged_file(&ctx.backup_root(), &format!("old_{age:02}.tar.gz"), DAY * age, clock);
        ctx.create_aged_file(&ctx.log_root(), &format!("backup_run_{age:02}.log"), DAY * age, clock);
    }

    let report = BackupOrchestrator::with_invoker(ctx.config().unwrap().clone(), FakeDumpInvoker::new())
        .run_at(started_at);

    assert_eq!(report.exit(), RunExit::Success);
    assert_eq!(report.deleted(), 6);

    let backups = list_files(&ctx.backup_root());
    assert_eq!(backups.len(), 3);
    assert!(backups.contains(&"old_01.tar.gz".to_string()));
    assert!(backups.contains(&"old_06.tar.gz".to_string()));

    let logs = list_files(&ctx.log_root());
    assert!(logs.contains(&"backup_run_01.log".to_string()));
    assert!(logs.contains(&"backup_run_06.log".to_string()));
    assert!(!logs.contains(&"backup_run_07.log".to_string()));
}

#[test]
fn test_zero_retention_keeps_this_runs_output() {
    let ctx = TestContext::from_builder(ConfigBuilder::grid(2, 1).retention_days(0));
    let now = std::time::SystemTime::now();
    ctx.create_aged_file(&ctx.backup_root(), "yesterday.tar.gz", DAY, now);

    let report = BackupOrchestrator::with_invoker(ctx.config().unwrap().clone(), FakeDumpInvoker::new()).run();

    assert_eq!(report.exit(), RunExit::Success);
    let backups = list_files(&ctx.backup_root());
    assert_eq!(backups.len(), 2);
    assert!(!backups.contains(&"yesterday.tar.gz".to_string()));
    assert!(report.run_log.assert_some().exists());
}

#[test]
fn test_concurrent_run_matches_sequential_order() {
    let builder = ConfigBuilder::grid(4, 2).max_concurrency(3);
    let ctx = TestContext::from_builder(builder);
    let config = ctx.config().unwrap().clone();
    let invoker = FakeDumpInvoker::new().with_delay(Duration::from_millis(10));

    let orchestrator = BackupOrchestrator::with_invoker(config, invoker.clone());
    let planned: Vec<JobId> = orchestrator.plan().into_iter().map(|job| job.id).collect();
    let mut orchestrator = orchestrator;
    let report = orchestrator.run();

    let outcomes: Vec<JobId> = report.outcomes.iter().map(|o| o.job.clone()).collect();
    assert_eq!(outcomes, planned);
    assert!(invoker.peak_in_flight() <= 3);

    let lines = read_run_log(&report.run_log.assert_some()).unwrap();
    let logged: Vec<String> = lines[..8]
        .iter()
        .map(|l| format!("{}/{}", l["host"].as_str().unwrap(), l["database"].as_str().unwrap()))
        .collect();
    let expected: Vec<String> = planned.iter().map(|id| format!("{}/{}", id.host, id.database)).collect();
    assert_eq!(logged, expected);
}
