//! Tests for dry runs
//!
//! A dry run plans jobs and lists expired entries, executing nothing.

use std::time::SystemTime;
use test_utils::{list_files, BackupOrchestrator, ConfigBuilder, FakeDumpInvoker, RunPhase, TestContext, DAY};

#[test]
fn test_dry_run_plans_in_configuration_order() {
    let ctx = TestContext::from_builder(
        ConfigBuilder::new()
            .server_with_databases("postgres://u@db2", &["b", "a"])
            .server_with_databases("postgres://u@db1:6543", &["c"]),
    );
    let invoker = FakeDumpInvoker::new();
    let orchestrator = BackupOrchestrator::with_invoker(ctx.config().unwrap().clone(), invoker.clone());

    let plan = orchestrator.dry_run(SystemTime::now());
    let jobs: Vec<String> = plan.jobs.iter().map(|job| job.id.to_string()).collect();

    assert_eq!(jobs, ["db2:5432/b", "db2:5432/a", "db1:6543/c"]);
    assert_eq!(invoker.call_count(), 0);
    assert_eq!(orchestrator.phase(), RunPhase::Idle);
    assert!(!ctx.backup_root().exists());
}

#[test]
fn test_dry_run_lists_but_keeps_expired_entries() {
    let ctx = TestContext::with_minimal_config();
    let now = SystemTime::now();
    ctx.create_aged_file(&ctx.backup_root(), "old.tar.gz", DAY * 8, now);
    ctx.create_aged_file(&ctx.backup_root(), "new.tar.gz", DAY, now);
    ctx.create_aged_file(&ctx.log_root(), "backup_run_old.log", DAY * 30, now);

    let orchestrator = BackupOrchestrator::with_invoker(ctx.config().unwrap().clone(), FakeDumpInvoker::new());
    let plan = orchestrator.dry_run(now);

    assert_eq!(
        plan.expired,
        vec![ctx.backup_root().join("old.tar.gz"), ctx.log_root().join("backup_run_old.log")]
    );
    assert!(plan.sweep_errors.is_empty());
    assert_eq!(list_files(&ctx.backup_root()), ["new.tar.gz", "old.tar.gz"]);
}
