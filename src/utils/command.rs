//! Utilities for running commands with timeouts

use std::io;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Command timed out after {0:?}")]
    TimedOut(Duration),
}

/// Run a command to completion, capturing stdout and stderr.
///
/// A child still running when `timeout` expires is killed.
pub fn run_command(cmd: Command, timeout: Duration) -> Result<Output, CommandError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let args: Vec<String> = cmd
        .get_args()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    debug!("Running command: {} {}", program, args.join(" "));

    let spawn_error = |source| CommandError::Spawn {
        program: program.clone(),
        source,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(spawn_error)?;

    let mut cmd = tokio::process::Command::from(cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    runtime.block_on(async {
        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(output) => output.map_err(spawn_error),
            Err(_) => Err(CommandError::TimedOut(timeout)),
        }
    })
}
