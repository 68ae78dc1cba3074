//! Configuration module for pg-backup-manager
//!
//! Configuration is a flat key/value map, resolved once at startup from an env
//! file merged with the process environment, then validated into an immutable
//! [`ConfigModel`].
//!
//! ## Keys
//!
//! - `SERVER_<N>`: `postgres://[user[:password]@]host[:port]`, ordered by `<N>`
//! - `SERVER_<N>_DATABASES`: comma separated databases for that server
//! - `DB_<i>_NAME` / `DB_<i>_USER` / `DB_<i>_PASS`: default database list and
//!   per-database credentials
//! - `BACKUP_ROOT`, `LOG_ROOT`, `RETENTION_DAYS`: required
//! - `DUMP_TIMEOUT_SECONDS`, `MAX_CONCURRENCY`, `DUMP_PROGRAM`, `LOG_LEVEL`: optional
//!
//! ## Example Usage
//!
//! ```no_run
//! use pg_backup_manager::config;
//!
//! let config = config::load_config(Some(std::path::Path::new("backup.env")))?;
//!
//! for server in &config.servers {
//!     println!("Server: {}, databases: {}", server.identity(), server.databases.len());
//! }
//! # Ok::<(), config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{load_config, load_vars, ConfigError, RawVars, Result, DEFAULT_ENV_FILE};
pub use types::*;

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
