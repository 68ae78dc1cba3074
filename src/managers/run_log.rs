//! Append-only run log, one JSON line per job outcome plus one summary line

use super::backup::{RunReport, ServerTally};
use super::job::{BackupOutcome, OutcomeStatus};
use crate::utils::archive::run_stamp;
use chrono::{DateTime, Local, SecondsFormat};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogLine<'a> {
    Outcome {
        timestamp: String,
        host: &'a str,
        port: u16,
        database: &'a str,
        status: OutcomeStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        artifact: Option<&'a Path>,
        #[serde(skip_serializing_if = "Option::is_none")]
        size_bytes: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_kind: Option<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
    },
    Summary {
        started_at: String,
        finished_at: String,
        status: &'static str,
        total: usize,
        succeeded: usize,
        failed: usize,
        failed_jobs: Vec<String>,
        servers: Vec<ServerTally>,
        deleted: usize,
        sweep_errors: Vec<String>,
    },
}

fn timestamp(at: DateTime<Local>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// `backup_run_<YYYYMMDD-HHMMSS>.log` under the log root
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: File,
}

impl RunLog {
    pub fn file_name(started_at: DateTime<Local>) -> String {
        format!("backup_run_{}.log", run_stamp(started_at))
    }

    pub fn create(log_root: &Path, started_at: DateTime<Local>) -> io::Result<Self> {
        let path = log_root.join(Self::file_name(started_at));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Run log: {:?}", path);
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the outcome of one job
    pub fn record(&mut self, outcome: &BackupOutcome) -> io::Result<()> {
        let artifact = outcome.artifact();
        self.append(&LogLine::Outcome {
            timestamp: timestamp(Local::now()),
            host: &outcome.job.host,
            port: outcome.job.port,
            database: &outcome.job.database,
            status: outcome.status(),
            artifact: artifact.map(|a| a.path.as_path()),
            size_bytes: artifact.map(|a| a.size_bytes),
            error_kind: outcome.error().map(|e| e.kind()),
            error: outcome.error().map(|e| e.to_string()),
            duration_ms: u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Append the run summary; the last line of every run log
    pub fn summarize(&mut self, report: &RunReport) -> io::Result<()> {
        self.append(&LogLine::Summary {
            started_at: timestamp(report.started_at),
            finished_at: timestamp(report.finished_at),
            status: report.status.as_str(),
            total: report.outcomes.len(),
            succeeded: report.succeeded(),
            failed: report.failed(),
            failed_jobs: report.failed_jobs().map(ToString::to_string).collect(),
            servers: report.servers(),
            deleted: report.deleted(),
            sweep_errors: report.sweep_errors().map(ToString::to_string).collect(),
        })
    }

    fn append(&mut self, line: &LogLine<'_>) -> io::Result<()> {
        let mut text = serde_json::to_string(line)?;
        text.push('\n');
        self.file.write_all(text.as_bytes())?;
        self.file.flush()
    }
}
