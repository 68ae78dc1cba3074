//! Age-based retention for backup and log directories

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Failed to list {}: {source}", .directory.display())]
    List {
        directory: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to inspect {}: {source}", .path.display())]
    Inspect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to delete {}: {source}", .path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Entries a sweep would delete, without touching anything
#[derive(Debug, Default)]
pub struct SweepPlan {
    pub expired: Vec<PathBuf>,
    pub errors: Vec<SweepError>,
}

#[derive(Debug)]
pub struct SweepReport {
    pub directory: PathBuf,
    pub deleted: Vec<PathBuf>,
    pub errors: Vec<SweepError>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Newest modification time that is expired.
///
/// `None` when the window reaches back before the clock's range, in which
/// case nothing is expired.
pub fn cutoff(retention_days: u32, now: SystemTime) -> Option<SystemTime> {
    now.checked_sub(Duration::from_secs(u64::from(retention_days) * SECONDS_PER_DAY))
}

/// Expired iff `modified <= now - retention_days`
pub fn is_expired(modified: SystemTime, retention_days: u32, now: SystemTime) -> bool {
    cutoff(retention_days, now).is_some_and(|cutoff| modified <= cutoff)
}

/// Hidden entries hold in-flight archives and the run lock
fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

/// Regular files directly under `directory` that have aged out.
///
/// A missing directory has nothing to sweep.
pub fn expired_entries(directory: &Path, retention_days: u32, now: SystemTime) -> SweepPlan {
    let mut plan = SweepPlan::default();

    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Nothing to sweep, {:?} does not exist", directory);
            return plan;
        }
        Err(source) => {
            plan.errors.push(SweepError::List {
                directory: directory.to_path_buf(),
                source,
            });
            return plan;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) => {
                plan.errors.push(SweepError::List {
                    directory: directory.to_path_buf(),
                    source,
                });
                continue;
            }
        };

        let path = entry.path();
        if is_hidden(&path) {
            continue;
        }

        // symlink_metadata so links are skipped rather than followed
        let modified = fs::symlink_metadata(&path).and_then(|metadata| {
            if metadata.file_type().is_file() {
                metadata.modified().map(Some)
            } else {
                Ok(None)
            }
        });

        match modified {
            Ok(Some(modified)) if is_expired(modified, retention_days, now) => {
                plan.expired.push(path)
            }
            Ok(_) => {}
            Err(source) => plan.errors.push(SweepError::Inspect { path, source }),
        }
    }

    plan.expired.sort();
    plan
}

/// Delete every expired entry, collecting failures instead of stopping.
///
/// Running it twice with the same `now` deletes nothing the second time.
pub fn sweep(directory: &Path, retention_days: u32, now: SystemTime) -> SweepReport {
    delete_expired(directory, expired_entries(directory, retention_days, now))
}

/// Delete the entries of `plan`; one failed deletion does not stop the rest
pub fn delete_expired(directory: &Path, plan: SweepPlan) -> SweepReport {
    let mut report = SweepReport {
        directory: directory.to_path_buf(),
        deleted: Vec::with_capacity(plan.expired.len()),
        errors: plan.errors,
    };

    for path in plan.expired {
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted expired entry {:?}", path);
                report.deleted.push(path);
            }
            // Already gone counts as swept
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                warn!("Failed to delete {:?}: {}", path, source);
                report.errors.push(SweepError::Delete { path, source });
            }
        }
    }

    info!(
        "Retention sweep of {:?}: {} deleted, {} errors",
        directory,
        report.deleted.len(),
        report.errors.len()
    );
    report
}
