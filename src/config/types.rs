use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default PostgreSQL port, omitted from artifact names
pub const DEFAULT_PORT: u16 = 5432;

/// Password that never shows up in `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw value, only meant for the child process environment
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"***\"")
    }
}

/// User and optional password used to connect to a database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: Option<Password>,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: Option<&str>) -> Self {
        Self {
            user: user.into(),
            password: password.map(Password::new),
        }
    }
}

/// A database to back up, in configuration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    pub name: String,

    /// Overrides the server's admin credentials for this database
    pub credentials: Option<Credentials>,
}

/// A database server and the databases it owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    pub host: String,
    pub port: u16,

    /// Credentials taken from the server URI
    pub admin: Option<Credentials>,

    pub databases: Vec<DatabaseTarget>,
}

impl ServerTarget {
    /// `host:port`, the server's identity
    pub fn identity(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Credentials a database on this server connects with
    pub fn credentials_for<'a>(&'a self, database: &'a DatabaseTarget) -> Option<&'a Credentials> {
        database.credentials.as_ref().or(self.admin.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Entries this many days old or older are deleted; 0 expires everything
    /// that predates the sweep
    pub retention_days: u32,
}

/// Validated configuration for one backup run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigModel {
    pub servers: Vec<ServerTarget>,
    pub backup_root: PathBuf,
    pub log_root: PathBuf,
    pub retention: RetentionPolicy,

    /// Maximum duration of a single dump
    pub dump_timeout: Duration,

    /// Servers processed in parallel; 1 keeps the run sequential
    pub max_concurrency: usize,

    pub dump_program: String,
    pub log_level: String,
}

impl ConfigModel {
    /// Total number of (server, database) targets
    pub fn target_count(&self) -> usize {
        self.servers.iter().map(|s| s.databases.len()).sum()
    }
}

// Default value functions

pub fn default_dump_timeout() -> Duration {
    Duration::from_secs(3600)
}
pub fn default_max_concurrency() -> usize { 1 }
pub fn default_dump_program() -> String { "pg_dump".to_string() }
pub fn default_log_level() -> String { "info".to_string() }
