//! Unit tests for pg-backup-manager
//!
//! Configuration, retention and archive behavior, without external programs.

mod archive;
mod config;
mod retention;
