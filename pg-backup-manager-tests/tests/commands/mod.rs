//! Command tests for pg-backup-manager
//!
//! These tests drive whole runs, with the fake invoker or a scripted `pg_dump`.

mod dry_run;
mod run;
