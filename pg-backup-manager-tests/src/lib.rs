//! Test utilities for pg-backup-manager
//!
//! This crate provides shared test utilities, fixtures and helper functions
//! for testing the pg-backup-manager application.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{ConfigBuilder, FakeDumpInvoker, TestContext};
//!
//! #[test]
//! fn my_test() {
//!     let ctx = TestContext::from_builder(
//!         ConfigBuilder::new().server_with_databases("postgres://u@db1", &["app"]),
//!     );
//!     let config = ctx.config().unwrap().clone();
//!     // ... test code
//! }
//! ```

pub mod config_builder;
pub mod fixtures;
pub mod test_context;

// Re-export commonly used items
pub use config_builder::ConfigBuilder;
pub use fixtures::*;
pub use test_context::{list_files, read_run_log, OptionAssertions, ResultAssertions, TestContext, DAY};

// Re-export types from the main crate for convenience
pub use pg_backup_manager::config::{ConfigError, ConfigModel, RawVars};
pub use pg_backup_manager::managers::backup::{BackupOrchestrator, RunExit, RunPhase, RunReport};
pub use pg_backup_manager::managers::job::{AggregateStatus, JobId};

// Re-export the fake invoker from the main crate
pub use pg_backup_manager::utils::dump_ops::mock::{FakeDumpInvoker, FakeFailure};
pub use pg_backup_manager::utils::dump_ops::DumpInvoker;
