//! Unit tests for retention sweeps against a fixed clock

use pg_backup_manager::managers::retention::{expired_entries, sweep};
use rstest::rstest;
use std::time::{Duration, SystemTime};
use test_utils::{list_files, TestContext, DAY};

fn fixed_now() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_750_000_000)
}

#[rstest]
#[case::younger(6, 7, false)]
#[case::exactly_at_boundary(7, 7, true)]
#[case::older(8, 7, true)]
#[case::zero_retention_today(0, 0, true)]
#[case::zero_retention_old(30, 0, true)]
#[case::long_retention(30, 90, false)]
fn test_expiry(#[case] age_days: u32, #[case] retention_days: u32, #[case] expired: bool) {
    let ctx = TestContext::new();
    let path = ctx.create_aged_file(ctx.temp_dir(), "x.tar.gz", DAY * age_days, fixed_now());

    let plan = expired_entries(ctx.temp_dir(), retention_days, fixed_now());
    assert_eq!(plan.expired.contains(&path), expired);
}

#[test]
fn test_seven_day_window() {
    let ctx = TestContext::new();
    let dir = ctx.create_subdir("backups");
    for age in [1, 6, 7, 8, 30] {
        ctx.create_aged_file(&dir, &format!("db1_app_{age:02}.tar.gz"), DAY * age, fixed_now());
    }

    let report = sweep(&dir, 7, fixed_now());
    assert!(report.is_clean());
    assert_eq!(list_files(&dir), ["db1_app_01.tar.gz", "db1_app_06.tar.gz"]);

    // Same clock, nothing left to do
    let again = sweep(&dir, 7, fixed_now());
    assert!(again.deleted.is_empty());
    assert_eq!(list_files(&dir).len(), 2);
}

#[test]
fn test_future_entries_are_kept() {
    let ctx = TestContext::new();
    let path = ctx.temp_dir().join("future.log");
    let file = std::fs::File::create(&path).unwrap();
    file.set_modified(fixed_now() + DAY).unwrap();

    let report = sweep(ctx.temp_dir(), 0, fixed_now());
    assert!(report.deleted.is_empty());
    assert!(path.exists());
}

#[test]
fn test_logs_and_backups_share_the_policy() {
    let ctx = TestContext::new();
    let logs = ctx.create_subdir("logs");
    ctx.create_aged_file(&logs, "backup_run_20240101-020000.log", DAY * 10, fixed_now());
    ctx.create_aged_file(&logs, "pg-backup-manager.log.2024-01-01", DAY * 10, fixed_now());
    ctx.create_aged_file(&logs, "backup_run_20240109-020000.log", DAY * 2, fixed_now());

    let report = sweep(&logs, 7, fixed_now());
    assert_eq!(report.deleted.len(), 2);
    assert_eq!(list_files(&logs), ["backup_run_20240109-020000.log"]);
}
