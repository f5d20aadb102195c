//! Bounded external command execution.
//!
//! Both the connection enumerator and the firewall strategies shell out to
//! platform tools. Every invocation carries a timeout, and a missing
//! executable or a timeout is reported as an error value rather than a
//! panic, so callers can degrade gracefully.

use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Errors from running an external command.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The executable was not found on the PATH.
    #[error("`{0}` not found")]
    Missing(String),

    /// The command did not finish within the allotted time.
    #[error("`{0}` timed out after {1:?}")]
    TimedOut(String, Duration),

    /// Any other I/O failure while spawning or collecting output.
    #[error("failed to run `{0}`: {1}")]
    Io(String, std::io::Error),
}

/// Captured output of a completed command.
#[derive(Debug)]
pub struct CommandOutput {
    /// Whether the command exited with status zero.
    pub success: bool,
    /// Decoded standard output.
    pub stdout: String,
    /// Decoded standard error.
    pub stderr: String,
}

/// Runs `program` with `args`, waiting at most `timeout`.
///
/// A non-zero exit status is not an error here; it is reported through
/// [`CommandOutput::success`] so callers can attach their own context.
pub(crate) async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    let future = Command::new(program).args(args).output();

    let output = match tokio::time::timeout(timeout, future).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CommandError::Missing(program.to_string()));
        }
        Ok(Err(e)) => return Err(CommandError::Io(program.to_string(), e)),
        Err(_) => return Err(CommandError::TimedOut(program.to_string(), timeout)),
    };

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
