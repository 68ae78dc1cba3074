//! PostgreSQL Backup Manager Library
//!
//! Dumps every configured (server, database) pair with `pg_dump`, packs each
//! dump into a `.tar.gz` artifact and deletes artifacts and logs that have
//! aged past the retention window.

pub mod config;
pub mod managers;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, ConfigError, ConfigModel};
pub use managers::backup::{BackupOrchestrator, RunExit, RunPhase, RunReport};
pub use managers::job::{AggregateStatus, BackupOutcome, JobId};
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
