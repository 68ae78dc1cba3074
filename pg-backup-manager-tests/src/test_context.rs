//! Test context and harness for run-level testing
//!
//! Provides a unified context for setting up and tearing down test environments.

use crate::config_builder::ConfigBuilder;
use anyhow::Result;
use pg_backup_manager::config::ConfigModel;
use serde_json::Value;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

pub const DAY: Duration = Duration::from_secs(86_400);

/// Test context that manages test resources and provides common utilities
pub struct TestContext {
    /// Temporary directory for test files
    temp_dir: TempDir,
    /// The test configuration
    config: Option<ConfigModel>,
}

impl TestContext {
    /// Create a new test context with a temporary directory
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
            config: None,
        }
    }

    /// Create a test context with a minimal configuration
    pub fn with_minimal_config() -> Self {
        Self::from_builder(ConfigBuilder::minimal())
    }

    /// Create a test context from a ConfigBuilder
    pub fn from_builder(builder: ConfigBuilder) -> Self {
        let (config, temp_dir) = builder.persist();

        Self {
            temp_dir,
            config: Some(config),
        }
    }

    /// Get the temporary directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Get the configuration
    pub fn config(&self) -> Option<&ConfigModel> {
        self.config.as_ref()
    }

    /// Backup root of the configuration
    pub fn backup_root(&self) -> PathBuf {
        self.config
            .as_ref()
            .map(|c| c.backup_root.clone())
            .unwrap_or_else(|| self.temp_dir.path().join("backups"))
    }

    /// Log root of the configuration
    pub fn log_root(&self) -> PathBuf {
        self.config
            .as_ref()
            .map(|c| c.log_root.clone())
            .unwrap_or_else(|| self.temp_dir.path().join("logs"))
    }

    /// Create a subdirectory in the temp dir
    pub fn create_subdir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::create_dir_all(&path).expect("Failed to create subdirectory");
        path
    }

    /// Create a file in the temp dir
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Create `dir/name` with a modification time `age` before `now`
    pub fn create_aged_file(&self, dir: &Path, name: &str, age: Duration, now: SystemTime) -> PathBuf {
        fs::create_dir_all(dir).expect("Failed to create directory");
        let path = dir.join(name);
        let file = File::create(&path).expect("Failed to create file");
        file.set_modified(now - age).expect("Failed to set modification time");
        path
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Visible file names directly under `dir`, sorted
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| !name.starts_with('.'))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Parsed JSON lines of a run log
pub fn read_run_log(path: &Path) -> Result<Vec<Value>> {
    fs::read_to_string(path)?
        .lines()
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}

/// Extension trait for assertion helpers
pub trait ResultAssertions<T> {
    /// Assert that the result is Ok and return the value
    fn assert_ok(self) -> T;

    /// Assert that the result is Err and the error message contains the given string
    fn assert_err_contains(self, needle: &str);
}

impl<T: std::fmt::Debug, E: std::fmt::Display + std::fmt::Debug> ResultAssertions<T> for Result<T, E> {
    fn assert_ok(self) -> T {
        match self {
            Ok(v) => v,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    }

    fn assert_err_contains(self, needle: &str) {
        match self {
            Ok(v) => panic!("Expected Err containing '{}', got Ok: {:?}", needle, v),
            Err(e) => {
                let err_msg = e.to_string();
                assert!(
                    err_msg.contains(needle),
                    "Error '{}' does not contain '{}'",
                    err_msg,
                    needle
                );
            }
        }
    }
}

/// Extension trait for Option assertions
pub trait OptionAssertions<T> {
    /// Assert that the option is Some and return the value
    fn assert_some(self) -> T;
}

impl<T: std::fmt::Debug> OptionAssertions<T> for Option<T> {
    fn assert_some(self) -> T {
        match self {
            Some(v) => v,
            None => panic!("Expected Some, got None"),
        }
    }
}
