//! Backup jobs and their outcomes
//!
//! Planning and aggregation are pure so they can be tested without I/O.

use crate::config::{ConfigModel, Credentials, ServerTarget, DEFAULT_PORT};
use crate::utils::archive::{Artifact, CompressionFailure};
use crate::utils::pg_dump::DumpFailure;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Identity of a (server, database) target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobId {
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl JobId {
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
        }
    }

    /// File-name-safe server part: the host, plus the port when it is not 5432
    pub fn server_label(&self) -> String {
        let host = sanitize_file_component(&self.host);
        if self.port == DEFAULT_PORT {
            host
        } else {
            format!("{}-{}", host, self.port)
        }
    }

    /// `<server>_<database>`, the part of artifact names naming the target
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.server_label(), sanitize_file_component(&self.database))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` with `-`
pub fn sanitize_file_component(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// One unit of work for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupJob {
    pub id: JobId,
    pub credentials: Option<Credentials>,
}

/// Jobs for one server, in configuration order
pub fn plan_server_jobs(server: &ServerTarget) -> Vec<BackupJob> {
    server
        .databases
        .iter()
        .map(|database| BackupJob {
            id: JobId::new(&server.host, server.port, &database.name),
            credentials: server.credentials_for(database).cloned(),
        })
        .collect()
}

/// Every job of a run, server-major in configuration order
pub fn plan_jobs(config: &ConfigModel) -> Vec<BackupJob> {
    config.servers.iter().flat_map(plan_server_jobs).collect()
}

/// Why a job failed
#[derive(Debug, thiserror::Error)]
pub enum JobFailure {
    #[error(transparent)]
    Dump(#[from] DumpFailure),

    #[error(transparent)]
    Compression(#[from] CompressionFailure),
}

impl JobFailure {
    /// Short, stable name of the failure kind for logs
    pub fn kind(&self) -> &'static str {
        match self {
            JobFailure::Dump(failure) => failure.kind(),
            JobFailure::Compression(_) => "compression",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Result of one job
#[derive(Debug)]
pub struct BackupOutcome {
    pub job: JobId,
    pub result: Result<Artifact, JobFailure>,
    pub duration: Duration,
}

impl BackupOutcome {
    pub fn status(&self) -> OutcomeStatus {
        match self.result {
            Ok(_) => OutcomeStatus::Success,
            Err(_) => OutcomeStatus::Failed,
        }
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&JobFailure> {
        self.result.as_ref().err()
    }
}

/// Status of a whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateStatus {
    Success,
    /// At least one job failed; lists them in configuration order
    PartialFailure { failed: Vec<JobId> },
}

impl AggregateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateStatus::Success => "success",
            AggregateStatus::PartialFailure { .. } => "partial_failure",
        }
    }
}

pub fn aggregate(outcomes: &[BackupOutcome]) -> AggregateStatus {
    let failed: Vec<JobId> = outcomes
        .iter()
        .filter(|o| o.status() == OutcomeStatus::Failed)
        .map(|o| o.job.clone())
        .collect();

    if failed.is_empty() {
        AggregateStatus::Success
    } else {
        AggregateStatus::PartialFailure { failed }
    }
}
