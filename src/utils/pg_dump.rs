//! pg_dump subprocess wrapper

use super::command::{self, CommandError};
use crate::config::ConfigModel;
use crate::managers::job::{BackupJob, JobId};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Characters of stderr kept in a failure
const STDERR_TAIL_CHARS: usize = 2000;

/// Why a dump produced no usable output
#[derive(Debug, thiserror::Error)]
pub enum DumpFailure {
    #[error("dump timed out after {0:?}")]
    Timeout(Duration),

    #[error("dump exited with {}: {stderr}", describe_exit(.exit_code))]
    ProcessError {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("dump exited successfully but wrote no output")]
    EmptyOutput,

    #[error("failed to launch dump: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to prepare dump staging directory: {0}")]
    Staging(#[source] io::Error),
}

impl DumpFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            DumpFailure::Timeout(_) => "timeout",
            DumpFailure::ProcessError { .. } => "process_error",
            DumpFailure::EmptyOutput => "empty_output",
            DumpFailure::Spawn(_) => "spawn",
            DumpFailure::Staging(_) => "staging",
        }
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("status {code}"),
        None => "no status (killed by signal)".to_string(),
    }
}

/// A finished dump, staged in a private temporary directory.
///
/// The directory and the dump inside it are removed when this is dropped.
#[derive(Debug)]
pub struct RawDump {
    job: JobId,
    path: PathBuf,
    size_bytes: u64,
    _staging: TempDir,
}

impl RawDump {
    /// Create a process-unique staging directory for one dump
    pub fn staging_dir() -> io::Result<TempDir> {
        tempfile::Builder::new()
            .prefix("pg-backup-manager-")
            .tempdir()
    }

    /// Take ownership of a dump written to `staging/file_name`.
    ///
    /// A missing or empty file is a failure; the staging directory is dropped with it.
    pub fn from_staged(job: JobId, staging: TempDir, file_name: &str) -> Result<Self, DumpFailure> {
        let path = staging.path().join(file_name);
        let size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if size_bytes == 0 {
            return Err(DumpFailure::EmptyOutput);
        }

        Ok(Self {
            job,
            path,
            size_bytes,
            _staging: staging,
        })
    }

    pub fn job(&self) -> &JobId {
        &self.job
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Name of the dump inside the archive
    pub fn entry_name(&self) -> String {
        dump_file_name(&self.job.database)
    }
}

pub fn dump_file_name(database: &str) -> String {
    format!("{database}.dump")
}

/// Runs `pg_dump` in custom format for one database at a time
#[derive(Debug, Clone)]
pub struct PgDumpInvoker {
    executable: PathBuf,
    timeout: Duration,
}

impl PgDumpInvoker {
    pub fn new(program: &str, timeout: Duration) -> Self {
        let executable = match which::which(program) {
            Ok(path) => path,
            Err(_) => {
                warn!("Dump program '{}' not found in PATH", program);
                PathBuf::from(program)
            }
        };

        Self { executable, timeout }
    }

    pub fn from_config(config: &ConfigModel) -> Self {
        Self::new(&config.dump_program, config.dump_timeout)
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Whether the dump program can be found
    pub fn is_available(&self) -> bool {
        which::which(&self.executable).is_ok()
    }

    /// Build the command line; the password only travels in `PGPASSWORD`
    fn command(&self, job: &BackupJob, output: &Path) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("--host")
            .arg(&job.id.host)
            .arg("--port")
            .arg(job.id.port.to_string());

        if let Some(credentials) = &job.credentials {
            cmd.arg("--username").arg(&credentials.user);
            if let Some(password) = &credentials.password {
                cmd.env("PGPASSWORD", password.expose());
            }
        }

        cmd.arg("--no-password")
            .arg("--format=custom")
            .arg("--compress=0")
            .arg("--file")
            .arg(output)
            .arg(&job.id.database);
        cmd
    }

    /// Dump one database into a fresh staging directory
    pub fn dump_database(&self, job: &BackupJob) -> Result<RawDump, DumpFailure> {
        let staging = RawDump::staging_dir().map_err(DumpFailure::Staging)?;
        let file_name = dump_file_name(&job.id.database);
        let output_path = staging.path().join(&file_name);

        info!("Dumping {}", job.id);
        debug!("Staging dump at {:?}", output_path);

        let output = match command::run_command(self.command(job, &output_path), self.timeout) {
            Ok(output) => output,
            Err(CommandError::TimedOut(after)) => return Err(DumpFailure::Timeout(after)),
            Err(CommandError::Spawn { source, .. }) => return Err(DumpFailure::Spawn(source)),
        };

        if !output.status.success() {
            return Err(DumpFailure::ProcessError {
                exit_code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        let raw = RawDump::from_staged(job.id.clone(), staging, &file_name)?;
        debug!("Dump of {} is {} bytes", job.id, raw.size_bytes());
        Ok(raw)
    }
}

/// Last part of stderr, trimmed
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    text.chars().skip(skip).collect()
}
