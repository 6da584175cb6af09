//! Bounded-retry subprocess execution.
//!
//! Mirrors the original `robust_cmd`: run a command, and on non-zero exit or
//! launch failure, sleep `n` seconds before attempt `n` and try again, up to
//! `max_attempts`. `stderr` is suppressed unless asked otherwise. The caller
//! never sees an `Err` for "the command ran and failed". `Output` is what
//! distinguishes success from exhausted retries.

use std::{
    ffi::OsStr,
    io,
    process::{Command, Output as StdOutput, Stdio},
    thread::sleep,
    time::Duration,
};

use tracing::{debug, error, info, instrument};

/// Result of a command that was launched at least once.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    /// Captured stdout. Only populated when `exit_code == 0`.
    pub stdout: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }
}

/// Runs `argv[0] argv[1..]`, retrying on failure.
///
/// Returns `None` if the process could never be launched (e.g. the
/// executable is missing) on every attempt. Returns `Some` with the final
/// attempt's result otherwise: `exit_code == 0` carries captured stdout,
/// any other code means every attempt failed.
#[instrument(skip(argv), fields(cmd = %argv.first().map(|s| s.as_ref().to_string_lossy()).unwrap_or_default()))]
pub fn run<S>(argv: &[S], max_attempts: u32, suppress_stderr: bool) -> Option<CommandOutput>
where
    S: AsRef<OsStr>,
{
    let max_attempts = max_attempts.max(1);
    let mut last_launched: Option<StdOutput> = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            info!(seconds = attempt, "waiting before retrying");
            sleep(Duration::from_secs(attempt as u64));
        }

        let mut cmd = build_command(argv, suppress_stderr);
        match cmd.output() {
            Ok(output) if output.status.success() => {
                info!("process exited OK");
                return Some(CommandOutput {
                    exit_code: 0,
                    stdout: output.stdout,
                });
            }
            Ok(output) => {
                debug!(code = output.status.code(), "command failed");
                last_launched = Some(output);
            }
            Err(err) => {
                error!(%err, "command cannot be executed");
            }
        }
    }

    match last_launched {
        Some(output) => {
            let code = output.status.code().unwrap_or(-1);
            error!(max_attempts, code, "giving up: last exit code");
            Some(CommandOutput {
                exit_code: code,
                stdout: Vec::new(),
            })
        }
        None => {
            error!(max_attempts, "giving up: process never launched");
            None
        }
    }
}

fn build_command<S: AsRef<OsStr>>(argv: &[S], suppress_stderr: bool) -> Command {
    let mut cmd = Command::new(argv[0].as_ref());
    cmd.args(argv[1..].iter().map(AsRef::as_ref));
    cmd.stdout(Stdio::piped());
    cmd.stderr(if suppress_stderr {
        Stdio::null()
    } else {
        Stdio::inherit()
    });
    cmd
}
