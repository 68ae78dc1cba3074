//! Backup orchestrator - runs every configured job, then enforces retention

use super::job::{aggregate, plan_jobs, plan_server_jobs, AggregateStatus, BackupJob, BackupOutcome, JobFailure, JobId, OutcomeStatus};
use super::retention::{self, SweepError, SweepReport};
use super::run_log::RunLog;
use crate::config::ConfigModel;
use crate::utils::archive::Compressor;
use crate::utils::dump_ops::DumpInvoker;
use crate::utils::pg_dump::PgDumpInvoker;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{error, info, warn};

/// Lifecycle of one run; sweeping always happens, even when every job failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Sweeping,
    Done,
}

/// Process exit status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Success = 0,
    ConfigInvalid = 1,
    JobsFailed = 2,
    SweepFailed = 3,
    LockHeld = 4,
}

impl RunExit {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<RunExit> for ExitCode {
    fn from(exit: RunExit) -> Self {
        ExitCode::from(exit.code())
    }
}

/// Job failures take precedence over sweep errors
pub fn run_exit(status: &AggregateStatus, sweeps: &[SweepReport]) -> RunExit {
    match status {
        AggregateStatus::PartialFailure { .. } => RunExit::JobsFailed,
        AggregateStatus::Success if sweeps.iter().all(SweepReport::is_clean) => RunExit::Success,
        AggregateStatus::Success => RunExit::SweepFailed,
    }
}

/// Job counts of one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerTally {
    /// `host:port`
    pub server: String,
    pub succeeded: usize,
    pub failed: usize,
}

/// Everything a run did
#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    /// One per job, in configuration order
    pub outcomes: Vec<BackupOutcome>,
    pub status: AggregateStatus,
    pub sweeps: Vec<SweepReport>,
    /// `None` when the run log could not be created
    pub run_log: Option<PathBuf>,
}

impl RunReport {
    pub fn exit(&self) -> RunExit {
        run_exit(&self.status, &self.sweeps)
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status() == OutcomeStatus::Success)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn failed_jobs(&self) -> impl Iterator<Item = &JobId> {
        self.outcomes
            .iter()
            .filter(|o| o.status() == OutcomeStatus::Failed)
            .map(|o| &o.job)
    }

    /// Per-server counts, servers in configuration order
    pub fn servers(&self) -> Vec<ServerTally> {
        let mut tallies: Vec<ServerTally> = Vec::new();
        for outcome in &self.outcomes {
            let server = format!("{}:{}", outcome.job.host, outcome.job.port);
            let index = match tallies.iter().position(|t| t.server == server) {
                Some(index) => index,
                None => {
                    tallies.push(ServerTally {
                        server,
                        succeeded: 0,
                        failed: 0,
                    });
                    tallies.len() - 1
                }
            };
            match outcome.status() {
                OutcomeStatus::Success => tallies[index].succeeded += 1,
                OutcomeStatus::Failed => tallies[index].failed += 1,
            }
        }
        tallies
    }

    /// Entries removed by retention across all swept directories
    pub fn deleted(&self) -> usize {
        self.sweeps.iter().map(|s| s.deleted.len()).sum()
    }

    pub fn sweep_errors(&self) -> impl Iterator<Item = &SweepError> {
        self.sweeps.iter().flat_map(|s| s.errors.iter())
    }
}

/// What a run would do, computed without side effects
#[derive(Debug)]
pub struct DryRunPlan {
    pub jobs: Vec<BackupJob>,
    pub expired: Vec<PathBuf>,
    pub sweep_errors: Vec<SweepError>,
}

/// Clock used for retention: the start second minus one, so nothing written
/// by the run itself can be old enough to delete
pub fn sweep_clock(started_at: DateTime<Local>) -> SystemTime {
    let secs = u64::try_from(started_at.timestamp() - 1).unwrap_or(0);
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

pub struct BackupOrchestrator<D: DumpInvoker = PgDumpInvoker> {
    config: ConfigModel,
    invoker: D,
    phase: RunPhase,
}

impl BackupOrchestrator<PgDumpInvoker> {
    /// Orchestrator that dumps with the configured `pg_dump`
    pub fn new(config: ConfigModel) -> Self {
        let invoker = PgDumpInvoker::from_config(&config);
        Self::with_invoker(config, invoker)
    }
}

impl<D: DumpInvoker> BackupOrchestrator<D> {
    pub fn with_invoker(config: ConfigModel, invoker: D) -> Self {
        Self {
            config,
            invoker,
            phase: RunPhase::Idle,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn config(&self) -> &ConfigModel {
        &self.config
    }

    pub fn invoker(&self) -> &D {
        &self.invoker
    }

    /// Jobs of a run, in the order they execute when sequential
    pub fn plan(&self) -> Vec<BackupJob> {
        plan_jobs(&self.config)
    }

    pub fn dry_run(&self, now: SystemTime) -> DryRunPlan {
        let mut plan = DryRunPlan {
            jobs: self.plan(),
            expired: Vec::new(),
            sweep_errors: Vec::new(),
        };

        for directory in self.swept_directories() {
            let sweep = retention::expired_entries(directory, self.config.retention.retention_days, now);
            plan.expired.extend(sweep.expired);
            plan.sweep_errors.extend(sweep.errors);
        }

        plan
    }

    pub fn run(&mut self) -> RunReport {
        self.run_at(Local::now())
    }

    /// Run every job, then sweep, using `started_at` for names and retention.
    ///
    /// Never fails as a whole: problems end up in the report.
    pub fn run_at(&mut self, started_at: DateTime<Local>) -> RunReport {
        self.phase = RunPhase::Running;
        info!(
            "Starting backup run: {} servers, {} databases",
            self.config.servers.len(),
            self.config.target_count()
        );

        for directory in [&self.config.backup_root, &self.config.log_root] {
            if let Err(e) = fs::create_dir_all(directory) {
                warn!("Failed to create directory {:?}: {}", directory, e);
            }
        }

        let mut run_log = match RunLog::create(&self.config.log_root, started_at) {
            Ok(log) => Some(log),
            Err(e) => {
                warn!("Failed to create run log in {:?}: {}", self.config.log_root, e);
                None
            }
        };

        let compressor = Compressor::for_run(started_at);
        let outcomes = if self.config.max_concurrency > 1 && self.config.servers.len() > 1 {
            let outcomes = self.execute_concurrent(&compressor);
            for outcome in &outcomes {
                record(&mut run_log, outcome);
            }
            outcomes
        } else {
            self.execute_sequential(&compressor, &mut run_log)
        };
        let status = aggregate(&outcomes);

        self.phase = RunPhase::Sweeping;
        let now = sweep_clock(started_at);
        let sweeps: Vec<SweepReport> = self
            .swept_directories()
            .into_iter()
            .map(|directory| retention::sweep(directory, self.config.retention.retention_days, now))
            .collect();

        let report = RunReport {
            started_at,
            finished_at: Local::now(),
            outcomes,
            status,
            sweeps,
            run_log: run_log.as_ref().map(|log| log.path().to_path_buf()),
        };

        if let Some(log) = run_log.as_mut() {
            if let Err(e) = log.summarize(&report) {
                warn!("Failed to write run summary to {:?}: {}", log.path(), e);
            }
        }

        self.phase = RunPhase::Done;
        log_summary(&report);
        report
    }

    /// Backup and log roots, once each
    fn swept_directories(&self) -> Vec<&Path> {
        let mut directories = vec![self.config.backup_root.as_path()];
        if self.config.log_root != self.config.backup_root {
            directories.push(self.config.log_root.as_path());
        }
        directories
    }

    /// Dump, then compress only if the dump succeeded
    fn execute_job(&self, job: &BackupJob, compressor: &Compressor) -> BackupOutcome {
        let started = Instant::now();
        info!("Backing up {}", job.id);

        let result = self
            .invoker
            .dump(job)
            .map_err(JobFailure::from)
            .and_then(|raw| {
                compressor
                    .compress(&raw, &self.config.backup_root)
                    .map_err(JobFailure::from)
            });

        let outcome = BackupOutcome {
            job: job.id.clone(),
            result,
            duration: started.elapsed(),
        };

        match &outcome.result {
            Ok(artifact) => info!(
                "Backup of {} succeeded in {:.1}s: {:?}",
                job.id,
                outcome.duration.as_secs_f64(),
                artifact.path
            ),
            Err(e) => error!("Backup of {} failed ({}): {}", job.id, e.kind(), e),
        }

        outcome
    }

    fn execute_sequential(&self, compressor: &Compressor, run_log: &mut Option<RunLog>) -> Vec<BackupOutcome> {
        plan_jobs(&self.config)
            .iter()
            .map(|job| {
                let outcome = self.execute_job(job, compressor);
                record(run_log, &outcome);
                outcome
            })
            .collect()
    }

    /// Workers take whole servers from a shared queue, so a server's
    /// databases are still dumped one at a time
    fn execute_concurrent(&self, compressor: &Compressor) -> Vec<BackupOutcome> {
        let groups: Vec<Vec<BackupJob>> = self.config.servers.iter().map(plan_server_jobs).collect();
        let workers = self.config.max_concurrency.min(groups.len());
        let next = AtomicUsize::new(0);
        info!("Running {} servers on {} workers", groups.len(), workers);

        let mut finished: Vec<(usize, Vec<BackupOutcome>)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut done: Vec<(usize, Vec<BackupOutcome>)> = Vec::new();
                        loop {
                            let index = next.fetch_add(1, Ordering::SeqCst);
                            let Some(jobs) = groups.get(index) else {
                                break;
                            };
                            let outcomes: Vec<BackupOutcome> = jobs
                                .iter()
                                .map(|job| self.execute_job(job, compressor))
                                .collect();
                            done.push((index, outcomes));
                        }
                        done
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        });

        finished.sort_by_key(|(index, _)| *index);
        finished.into_iter().flat_map(|(_, outcomes)| outcomes).collect()
    }
}

fn record(run_log: &mut Option<RunLog>, outcome: &BackupOutcome) {
    if let Some(log) = run_log.as_mut() {
        if let Err(e) = log.record(outcome) {
            warn!("Failed to append to run log {:?}: {}", log.path(), e);
        }
    }
}

fn log_summary(report: &RunReport) {
    let elapsed = (report.finished_at - report.started_at).num_seconds();
    match &report.status {
        AggregateStatus::Success => info!(
            "Backup run finished: {} of {} jobs succeeded in {}s",
            report.succeeded(),
            report.outcomes.len(),
            elapsed
        ),
        AggregateStatus::PartialFailure { failed } => {
            let failed: Vec<String> = failed.iter().map(ToString::to_string).collect();
            error!(
                "Backup run finished with failures: {} of {} jobs failed in {}s: {}",
                failed.len(),
                report.outcomes.len(),
                elapsed,
                failed.join(", ")
            );
        }
    }

    for tally in report.servers() {
        info!("  {}: {} succeeded, {} failed", tally.server, tally.succeeded, tally.failed);
    }

    for e in report.sweep_errors() {
        warn!("Retention: {}", e);
    }
    info!("Retention removed {} expired entries", report.deleted());
}
