use super::expand_tilde;
use super::types::*;
use crate::managers::job::JobId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Raw key/value configuration, as resolved from the env file and environment
pub type RawVars = BTreeMap<String, String>;

/// Env file read when no `--config` path is given
pub const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read env file {}: {source}", .path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("Missing required key: {0}")]
    Missing(String),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Load the raw configuration map and validate it.
///
/// Without an explicit path, `.env` in the working directory is used if present.
pub fn load_config(env_file: Option<&Path>) -> Result<ConfigModel> {
    let default_file = Path::new(DEFAULT_ENV_FILE);
    let env_file = match env_file {
        Some(path) => Some(path),
        None if default_file.exists() => Some(default_file),
        None => None,
    };

    let vars = load_vars(env_file)?;
    ConfigModel::from_vars(&vars)
}

/// Merge the env file (if any) with the process environment.
///
/// Variables already set in the environment win over the file, and `${VAR}`
/// references inside the file are expanded.
pub fn load_vars(env_file: Option<&Path>) -> Result<RawVars> {
    let mut vars = RawVars::new();

    if let Some(path) = env_file {
        let env_error = |source| ConfigError::EnvFile {
            path: path.to_path_buf(),
            source,
        };
        for entry in dotenvy::from_path_iter(path).map_err(env_error)? {
            let (key, value) = entry.map_err(env_error)?;
            vars.insert(key, value);
        }
    }

    vars.extend(
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
    );

    Ok(vars)
}

impl ConfigModel {
    /// Validate a raw key/value map. Pure: nothing is read or created.
    pub fn from_vars(vars: &RawVars) -> Result<Self> {
        let backup_root = required_path(vars, "BACKUP_ROOT")?;
        let log_root = required_path(vars, "LOG_ROOT")?;

        let retention_days = match optional(vars, "RETENTION_DAYS") {
            Some(raw) => parse_number::<u32>("RETENTION_DAYS", raw, "a non-negative integer")?,
            None => return Err(ConfigError::Missing("RETENTION_DAYS".to_string())),
        };

        let dump_timeout = match optional(vars, "DUMP_TIMEOUT_SECONDS") {
            Some(raw) => {
                let secs = parse_number::<u64>("DUMP_TIMEOUT_SECONDS", raw, "a positive integer")?;
                if secs == 0 {
                    return Err(invalid("DUMP_TIMEOUT_SECONDS", "must be greater than zero"));
                }
                Duration::from_secs(secs)
            }
            None => default_dump_timeout(),
        };

        let max_concurrency = match optional(vars, "MAX_CONCURRENCY") {
            Some(raw) => {
                let workers = parse_number::<usize>("MAX_CONCURRENCY", raw, "a positive integer")?;
                if workers == 0 {
                    return Err(invalid("MAX_CONCURRENCY", "must be at least 1"));
                }
                workers
            }
            None => default_max_concurrency(),
        };

        let dump_program = optional(vars, "DUMP_PROGRAM")
            .map(str::to_string)
            .unwrap_or_else(default_dump_program);
        let log_level = optional(vars, "LOG_LEVEL")
            .map(str::to_lowercase)
            .unwrap_or_else(default_log_level);

        let global_databases = global_databases(vars)?;
        let servers = servers(vars, &global_databases)?;

        Ok(ConfigModel {
            servers,
            backup_root,
            log_root,
            retention: RetentionPolicy { retention_days },
            dump_timeout,
            max_concurrency,
            dump_program,
            log_level,
        })
    }
}

/// Trimmed value of a key; blank values count as unset
fn optional<'a>(vars: &'a RawVars, key: &str) -> Option<&'a str> {
    vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn required_path(vars: &RawVars, key: &str) -> Result<PathBuf> {
    optional(vars, key)
        .map(|raw| expand_tilde(Path::new(raw)))
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn parse_number<T: FromStr>(key: &str, raw: &str, expected: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| invalid(key, format!("expected {expected}, got '{raw}'")))
}

/// Database names end up as a `pg_dump` argument and inside file names
fn check_database_name(key: &str, name: &str) -> Result<()> {
    if name.starts_with('-') {
        return Err(invalid(key, format!("database name '{name}' must not start with '-'")));
    }
    if name.contains(['/', '\\', '\0']) || name.chars().any(char::is_whitespace) {
        return Err(invalid(key, format!("database name '{name}' contains invalid characters")));
    }
    Ok(())
}

/// Entry of the global `DB_<i>_*` list
struct GlobalDatabase {
    index: usize,
    target: DatabaseTarget,
}

/// Read `DB_1_NAME`, `DB_2_NAME`, ... up to the first gap
fn global_databases(vars: &RawVars) -> Result<Vec<GlobalDatabase>> {
    let mut databases: Vec<GlobalDatabase> = Vec::new();

    for index in 1.. {
        let name_key = format!("DB_{index}_NAME");
        let Some(name) = optional(vars, &name_key) else {
            break;
        };
        check_database_name(&name_key, name)?;

        if databases.iter().any(|d| d.target.name == name) {
            return Err(invalid(&name_key, format!("database '{name}' is listed twice")));
        }

        let user_key = format!("DB_{index}_USER");
        let credentials = match (optional(vars, &user_key), optional(vars, &format!("DB_{index}_PASS"))) {
            (Some(user), password) => Some(Credentials::new(user, password)),
            (None, Some(_)) => {
                return Err(invalid(&user_key, format!("required when DB_{index}_PASS is set")));
            }
            (None, None) => None,
        };

        databases.push(GlobalDatabase {
            index,
            target: DatabaseTarget {
                name: name.to_string(),
                credentials,
            },
        });
    }

    Ok(databases)
}

/// Collect `SERVER_<N>` entries in ascending `<N>` order
fn servers(vars: &RawVars, global_databases: &[GlobalDatabase]) -> Result<Vec<ServerTarget>> {
    let mut uris: Vec<(u32, &str, &str)> = Vec::new();
    let mut database_lists: Vec<(u32, &str)> = Vec::new();

    for (key, value) in vars {
        let Some(suffix) = key.strip_prefix("SERVER_") else {
            continue;
        };
        let (index, setting) = match suffix.split_once('_') {
            Some((index, setting)) => (index, Some(setting)),
            None => (suffix, None),
        };
        // Unrelated variables such as SERVER_NAME are not ours
        let Ok(index) = index.parse::<u32>() else {
            continue;
        };
        if index == 0 {
            return Err(invalid(key, "server numbers start at 1"));
        }

        match setting {
            None if value.trim().is_empty() => {}
            None => {
                if uris.iter().any(|(i, _, _)| *i == index) {
                    return Err(invalid(key, format!("server {index} is defined twice")));
                }
                uris.push((index, key.as_str(), value.trim()));
            }
            Some("DATABASES") => database_lists.push((index, key.as_str())),
            Some(_) => {
                return Err(invalid(
                    key,
                    "unknown server setting, expected SERVER_<N> or SERVER_<N>_DATABASES",
                ));
            }
        }
    }

    if let Some((_, key)) = database_lists
        .iter()
        .find(|(index, _)| !uris.iter().any(|(i, _, _)| i == index))
    {
        return Err(invalid(key, "no matching SERVER_<N> entry"));
    }

    if uris.is_empty() {
        return Err(ConfigError::Missing("SERVER_1".to_string()));
    }
    uris.sort_by_key(|(index, _, _)| *index);

    let mut servers: Vec<ServerTarget> = Vec::with_capacity(uris.len());
    // Artifact names must tell every target apart
    let mut stems: BTreeMap<String, JobId> = BTreeMap::new();
    for (index, key, uri) in uris {
        let server = server_target(vars, index, key, uri, global_databases)?;
        if servers.iter().any(|s| s.host == server.host && s.port == server.port) {
            return Err(invalid(key, format!("duplicates server {}", server.identity())));
        }
        for database in &server.databases {
            let id = JobId::new(&server.host, server.port, &database.name);
            let stem = id.file_stem();
            if let Some(other) = stems.get(&stem) {
                return Err(invalid(
                    key,
                    format!("backups of {id} and {other} would share the file name '{stem}_*.tar.gz'"),
                ));
            }
            stems.insert(stem, id);
        }
        servers.push(server);
    }

    Ok(servers)
}

fn server_target(
    vars: &RawVars,
    index: u32,
    key: &str,
    uri: &str,
    global_databases: &[GlobalDatabase],
) -> Result<ServerTarget> {
    let url = parse_server_uri(key, uri)?;

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid(key, "missing host"))?
        .to_string();
    let port = url.port().unwrap_or(DEFAULT_PORT);
    let admin = (!url.username().is_empty())
        .then(|| Credentials::new(url.username(), url.password()));

    let databases_key = format!("SERVER_{index}_DATABASES");
    let databases: Vec<DatabaseTarget> = match optional(vars, &databases_key) {
        Some(list) => {
            let mut databases: Vec<DatabaseTarget> = Vec::new();
            for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                check_database_name(&databases_key, name)?;
                if databases.iter().any(|d| d.name == name) {
                    return Err(invalid(&databases_key, format!("database '{name}' is listed twice")));
                }
                // Per-database credentials come from the matching DB_<i> entry
                let credentials = global_databases
                    .iter()
                    .find(|g| g.target.name == name)
                    .and_then(|g| g.target.credentials.clone());
                databases.push(DatabaseTarget {
                    name: name.to_string(),
                    credentials,
                });
            }
            databases
        }
        None => global_databases.iter().map(|g| g.target.clone()).collect(),
    };

    if databases.is_empty() {
        return Err(ConfigError::Missing(format!("{databases_key} or DB_1_NAME")));
    }

    let server = ServerTarget {
        host,
        port,
        admin,
        databases,
    };

    for database in &server.databases {
        if server.credentials_for(database).is_none() {
            let user_key = global_databases
                .iter()
                .find(|g| g.target.name == database.name)
                .map(|g| format!("DB_{}_USER", g.index))
                .unwrap_or_else(|| key.to_string());
            return Err(invalid(
                &user_key,
                format!(
                    "no user for database '{}' on {}; set a per-database user or a user in {key}",
                    database.name,
                    server.identity()
                ),
            ));
        }
    }

    Ok(server)
}

/// Accepts `postgres://[user[:password]@]host[:port]` or a bare `host[:port]`.
///
/// Parse errors never echo the URI, it may carry a password.
fn parse_server_uri(key: &str, uri: &str) -> Result<Url> {
    let uri = if uri.contains("://") {
        uri.to_string()
    } else {
        format!("postgres://{uri}")
    };

    let url = Url::parse(&uri).map_err(|e| invalid(key, format!("not a valid server URI ({e})")))?;
    match url.scheme() {
        "postgres" | "postgresql" => Ok(url),
        other => Err(invalid(key, format!("unsupported scheme '{other}', expected postgres://"))),
    }
}
