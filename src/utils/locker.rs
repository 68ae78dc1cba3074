//! File-based locking to prevent concurrent runs against one backup root

use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Hidden, so retention sweeps leave it alone
pub const LOCK_FILE_NAME: &str = ".pg-backup-manager.lock";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Another run holds the lock {}", .path.display())]
    Held {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open lock file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub fn lock_path(backup_root: &Path) -> PathBuf {
    backup_root.join(LOCK_FILE_NAME)
}

/// Run `f` while holding an exclusive lock on `path`.
///
/// Fails immediately with [`LockError::Held`] if another process (or another
/// handle in this one) holds the lock. The lock file itself is left in place.
pub fn with_run_lock<T>(path: &Path, f: impl FnOnce() -> T) -> Result<T, LockError> {
    debug!("Attempting to acquire lock: {:?}", path);

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let mut lock = RwLock::new(file);
    let guard = lock.try_write().map_err(|source| LockError::Held {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Acquired run lock: {:?}", path);

    let result = f();

    drop(guard);
    info!("Released run lock: {:?}", path);
    Ok(result)
}
