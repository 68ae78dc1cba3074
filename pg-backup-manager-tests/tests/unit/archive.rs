//! Unit tests for artifact naming and archive contents

use chrono::{Local, TimeZone};
use flate2::read::GzDecoder;
use pg_backup_manager::managers::job::{BackupJob, JobId};
use pg_backup_manager::utils::archive::Compressor;
use rstest::rstest;
use std::fs::File;
use std::io::Read;
use test_utils::{list_files, DumpInvoker, FakeDumpInvoker, TestContext};

fn compressor() -> Compressor {
    Compressor::for_run(Local.with_ymd_and_hms(2024, 11, 2, 23, 5, 9).unwrap())
}

#[rstest]
#[case("db1", 5432, "app", "db1_app_20241102-230509.tar.gz")]
#[case("db1", 6543, "app", "db1-6543_app_20241102-230509.tar.gz")]
#[case("10.0.0.5", 5432, "sales$eu", "10.0.0.5_sales-eu_20241102-230509.tar.gz")]
#[case("db1", 5432, "Ünïcode", "db1_-n-code_20241102-230509.tar.gz")]
fn test_artifact_names(#[case] host: &str, #[case] port: u16, #[case] database: &str, #[case] expected: &str) {
    assert_eq!(compressor().artifact_name(&JobId::new(host, port, database)), expected);
}

#[test]
fn test_archive_holds_the_dump() {
    let ctx = TestContext::new();
    let destination = ctx.create_subdir("backups");
    let job = BackupJob {
        id: JobId::new("db1", 5432, "app"),
        credentials: None,
    };

    let raw = FakeDumpInvoker::new().dump(&job).unwrap();
    let artifact = compressor().compress(&raw, &destination).unwrap();
    drop(raw);

    assert_eq!(list_files(&destination), ["db1_app_20241102-230509.tar.gz"]);

    let mut archive = tar::Archive::new(GzDecoder::new(File::open(&artifact.path).unwrap()));
    let entries: Vec<_> = archive.entries().unwrap().map(|e| e.unwrap()).collect();
    assert_eq!(entries.len(), 1);

    let mut archive = tar::Archive::new(GzDecoder::new(File::open(&artifact.path).unwrap()));
    let mut entry = archive.entries().unwrap().next().unwrap().unwrap();
    assert_eq!(entry.path().unwrap().to_string_lossy(), "app.dump");
    let mut content = String::new();
    entry.read_to_string(&mut content).unwrap();
    assert_eq!(content, "-- fake dump of db1:5432/app\n");
}
