//! External command execution
//!
//! Every tape tool (`sg_inq`, `mt`, `ltfs`, `mkltfs`, `fusermount`, `dd`, ...)
//! is reached through the [`CommandRunner`] trait so that the mount and
//! diagnostics state machines can be driven by canned outcomes in tests.

use crate::error::{LtfsError, Result};
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};

/// A program plus its argument vector. Arguments are never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `mt -f <device> <operation>`
    pub fn mt(device: &str, operation: &str) -> Self {
        Self::new("mt").args(["-f", device, operation])
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Exited(i32),
    /// The wait was abandoned; the process may still be running.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Exited(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Exited(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn timed_out() -> Self {
        Self {
            status: CommandStatus::TimedOut,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Exited(0)
    }

    pub fn is_timeout(&self) -> bool {
        self.status == CommandStatus::TimedOut
    }

    /// Text worth showing a user: stderr if present, stdout otherwise
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.status {
            CommandStatus::Exited(code) => format!("exit status {}", code),
            CommandStatus::TimedOut => "timed out".to_string(),
        }
    }
}

/// Capability to run an external command with a bounded wait.
///
/// `Err` means the command could not be started at all (tool missing, spawn
/// failure). A non-zero exit or a timeout is reported through `CommandOutput`.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &CommandSpec, timeout: Duration) -> Result<CommandOutput>;
}

/// Spawns real processes.
///
/// On timeout the runner stops waiting but does not kill the child: a tape
/// operation interrupted mid-flight can leave the drive in an unknown state.
/// A detached reaper thread collects the exit status later.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &CommandSpec, timeout: Duration) -> Result<CommandOutput> {
        debug!("Running `{}` (timeout {:?})", command, timeout);

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                LtfsError::command_failed(format!("cannot start {}: {}", command.program, e))
            })?;

        let (tx, rx) = crossbeam::channel::bounded(1);
        std::thread::Builder::new()
            .name(format!("wait-{}", command.program))
            .spawn(move || {
                // Receiver may be gone after a timeout; the send result is irrelevant then.
                let _ = tx.send(child.wait_with_output());
            })?;

        match rx.recv_timeout(timeout) {
            Ok(Ok(output)) => {
                let code = output
                    .status
                    .code()
                    .unwrap_or_else(|| 128 + output.status.signal().unwrap_or(0));
                debug!("`{}` exited with {}", command, code);
                Ok(CommandOutput {
                    status: CommandStatus::Exited(code),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            Ok(Err(e)) => Err(LtfsError::Io(e)),
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                warn!("`{}` did not finish within {:?}, detaching", command, timeout);
                Ok(CommandOutput::timed_out())
            }
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => Err(
                LtfsError::command_failed(format!("lost wait thread for {}", command.program)),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display() {
        let cmd = CommandSpec::new("ltfs")
            .arg("-o")
            .arg("devname=/dev/st0,force_mount_no_eod")
            .arg("/media/user/ltfs_st0");
        assert_eq!(
            cmd.to_string(),
            "ltfs -o devname=/dev/st0,force_mount_no_eod /media/user/ltfs_st0"
        );
        assert_eq!(CommandSpec::mt("/dev/st0", "rewind").to_string(), "mt -f /dev/st0 rewind");
    }

    #[test]
    fn test_diagnostic_prefers_stderr() {
        let out = CommandOutput {
            status: CommandStatus::Exited(1),
            stdout: "some stdout".into(),
            stderr: "  Permission denied \n".into(),
        };
        assert_eq!(out.diagnostic(), "Permission denied");
        assert_eq!(CommandOutput::failure(2, "").diagnostic(), "exit status 2");
        assert_eq!(CommandOutput::timed_out().diagnostic(), "timed out");
    }

    #[test]
    fn test_system_runner_success_and_exit_code() {
        let runner = SystemRunner;
        let out = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo hello"]), Duration::from_secs(10))
            .unwrap();
        assert!(out.is_success());
        assert_eq!(out.stdout.trim(), "hello");

        let failing = CommandSpec::new("sh").args(["-c", "echo oops >&2; exit 3"]);
        let out = runner.run(&failing, Duration::from_secs(10)).unwrap();
        assert_eq!(out.status, CommandStatus::Exited(3));
        assert_eq!(out.diagnostic(), "oops");
    }

    #[test]
    fn test_system_runner_detaches_on_timeout() {
        let runner = SystemRunner;
        let start = std::time::Instant::now();
        let out = runner
            .run(&CommandSpec::new("sleep").arg("2"), Duration::from_millis(100))
            .unwrap();
        assert!(out.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_system_runner_missing_tool() {
        let err = SystemRunner
            .run(&CommandSpec::new("definitely-not-a-tape-tool"), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, LtfsError::CommandFailed(_)));
    }
}
