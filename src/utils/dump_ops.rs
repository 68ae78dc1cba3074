//! Dump operations abstraction for testability
//!
//! The orchestrator only sees [`DumpInvoker`], so partial-failure handling can
//! be exercised with [`mock::FakeDumpInvoker`] instead of a real `pg_dump`.

use super::pg_dump::{DumpFailure, PgDumpInvoker, RawDump};
use crate::managers::job::BackupJob;

/// Produces a raw dump for one job; failure is a value, never a panic
pub trait DumpInvoker: Send + Sync {
    fn dump(&self, job: &BackupJob) -> Result<RawDump, DumpFailure>;
}

impl DumpInvoker for PgDumpInvoker {
    fn dump(&self, job: &BackupJob) -> Result<RawDump, DumpFailure> {
        self.dump_database(job)
    }
}

/// A fake invoker that writes small dumps and fails on request.
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use crate::managers::job::JobId;
    use crate::utils::pg_dump::dump_file_name;
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::time::Duration;

    /// Failure to simulate for a target
    #[derive(Clone, Debug)]
    pub enum FakeFailure {
        Timeout,
        ProcessError { exit_code: i32, stderr: String },
        EmptyOutput,
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[derive(Clone, Default)]
    pub struct FakeDumpInvoker {
        calls: Arc<Mutex<Vec<JobId>>>,
        staged: Arc<Mutex<Vec<PathBuf>>>,
        failures: Arc<Mutex<HashMap<(String, String), FakeFailure>>>,
        delay: Option<Duration>,
        in_flight: Arc<AtomicUsize>,
        peak_in_flight: Arc<AtomicUsize>,
    }

    impl FakeDumpInvoker {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every dump of `database` on `host` fail
        pub fn fail(self, host: &str, database: &str, failure: FakeFailure) -> Self {
            lock(&self.failures).insert((host.to_string(), database.to_string()), failure);
            self
        }

        /// Sleep this long inside every dump
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Jobs dumped so far, in call order
        pub fn calls(&self) -> Vec<JobId> {
            lock(&self.calls).clone()
        }

        pub fn call_count(&self) -> usize {
            lock(&self.calls).len()
        }

        /// Staging directories handed out so far
        pub fn staged_dirs(&self) -> Vec<PathBuf> {
            lock(&self.staged).clone()
        }

        /// Highest number of dumps that ran at the same time
        pub fn peak_in_flight(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }

        fn run(&self, job: &BackupJob) -> Result<RawDump, DumpFailure> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }

            let staging = RawDump::staging_dir().map_err(DumpFailure::Staging)?;
            lock(&self.staged).push(staging.path().to_path_buf());

            let file_name = dump_file_name(&job.id.database);
            let failure = lock(&self.failures)
                .get(&(job.id.host.clone(), job.id.database.clone()))
                .cloned();

            match failure {
                Some(FakeFailure::Timeout) => Err(DumpFailure::Timeout(Duration::from_secs(1))),
                Some(FakeFailure::ProcessError { exit_code, stderr }) => {
                    Err(DumpFailure::ProcessError {
                        exit_code: Some(exit_code),
                        stderr,
                    })
                }
                Some(FakeFailure::EmptyOutput) => {
                    fs::write(staging.path().join(&file_name), b"").map_err(DumpFailure::Staging)?;
                    RawDump::from_staged(job.id.clone(), staging, &file_name)
                }
                None => {
                    let content = format!("-- fake dump of {}\n", job.id);
                    fs::write(staging.path().join(&file_name), content).map_err(DumpFailure::Staging)?;
                    RawDump::from_staged(job.id.clone(), staging, &file_name)
                }
            }
        }
    }

    impl DumpInvoker for FakeDumpInvoker {
        fn dump(&self, job: &BackupJob) -> Result<RawDump, DumpFailure> {
            lock(&self.calls).push(job.id.clone());

            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
            let result = self.run(job);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            result
        }
    }
}
