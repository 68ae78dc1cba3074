use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use pg_backup_manager::config::{self, ConfigModel};
use pg_backup_manager::managers::backup::{sweep_clock, BackupOrchestrator, RunExit};
use pg_backup_manager::managers::logging::{self, LoggingConfig};
use pg_backup_manager::utils::archive::Compressor;
use pg_backup_manager::utils::locker::{self, LockError};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "pg-backup-manager")]
#[command(about = "Scheduled, compressed backups of PostgreSQL databases", long_about = None)]
#[command(version)]
struct Cli {
    /// Env file with the backup configuration (defaults to ./.env if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate configuration and show planned jobs and expired entries without running anything
    #[arg(long)]
    dry_run: bool,

    /// Override LOG_LEVEL (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match config::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_console_logging(cli.log_level.as_deref());
            error!("Invalid configuration: {}", e);
            return RunExit::ConfigInvalid.into();
        }
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    if cli.dry_run {
        logging::init_console_logging(Some(&config.log_level));
        print_dry_run(config);
        return RunExit::Success.into();
    }

    // Must stay alive until exit so buffered log lines are flushed
    let _log_guard = match logging::init_logging(&LoggingConfig::from_config(
        &config.log_root,
        &config.log_level,
    )) {
        Ok(guard) => Some(guard),
        Err(e) => {
            logging::init_console_logging(Some(&config.log_level));
            warn!("File logging unavailable, logging to console only: {:#}", e);
            None
        }
    };

    match run(config) {
        Ok(exit) => exit.into(),
        Err(e) => {
            error!("{:#}", e);
            RunExit::ConfigInvalid.into()
        }
    }
}

fn run(config: ConfigModel) -> Result<RunExit> {
    fs::create_dir_all(&config.backup_root)
        .with_context(|| format!("Failed to create backup directory: {:?}", config.backup_root))?;

    let lock_path = locker::lock_path(&config.backup_root);
    let mut orchestrator = BackupOrchestrator::new(config);

    match locker::with_run_lock(&lock_path, || orchestrator.run()) {
        Ok(report) => Ok(report.exit()),
        Err(LockError::Held { path, .. }) => {
            error!("Another backup run is in progress (lock held: {:?})", path);
            Ok(RunExit::LockHeld)
        }
        Err(e) => Err(e).context("Failed to acquire run lock"),
    }
}

fn print_dry_run(config: ConfigModel) {
    let orchestrator = BackupOrchestrator::new(config);
    let started_at = Local::now();
    let plan = orchestrator.dry_run(sweep_clock(started_at));
    let compressor = Compressor::for_run(started_at);

    println!("=== Dry run ===\n");
    println!("Planned jobs ({}):", plan.jobs.len());
    for job in &plan.jobs {
        println!("  {} -> {}", job.id, compressor.artifact_name(&job.id));
    }

    println!(
        "\nRetention: {} days, {} expired entries would be deleted",
        orchestrator.config().retention.retention_days,
        plan.expired.len()
    );
    for path in &plan.expired {
        println!("  {}", path.display());
    }
    for e in &plan.sweep_errors {
        println!("  ! {}", e);
    }

    let invoker = orchestrator.invoker();
    println!(
        "\nDump program: {} ({})",
        invoker.executable().display(),
        if invoker.is_available() { "found" } else { "NOT FOUND" }
    );
}
