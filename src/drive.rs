//! Single-purpose drive operations: format and `mt` commands

use crate::device::DeviceNode;
use crate::error::{LtfsError, Result};
use crate::mount::{CompatibilityPolicy, DeviceGuard, Registry};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriveCommand {
    Status,
    Rewind,
    Eject,
    Load,
    Tension,
    Clean,
    Reset,
}

impl DriveCommand {
    pub const ALL: [DriveCommand; 7] = [
        DriveCommand::Status,
        DriveCommand::Rewind,
        DriveCommand::Eject,
        DriveCommand::Load,
        DriveCommand::Tension,
        DriveCommand::Clean,
        DriveCommand::Reset,
    ];

    /// `mt` operations, tried in order
    pub fn mt_operations(&self) -> &'static [&'static str] {
        match self {
            DriveCommand::Status => &["status"],
            DriveCommand::Rewind => &["rewind"],
            DriveCommand::Eject => &["eject", "offline"],
            DriveCommand::Load => &["load"],
            DriveCommand::Tension => &["tension"],
            DriveCommand::Clean => &["clean"],
            DriveCommand::Reset => &["reset"],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DriveCommand::Status => "status",
            DriveCommand::Rewind => "rewind",
            DriveCommand::Eject => "eject",
            DriveCommand::Load => "load",
            DriveCommand::Tension => "tension",
            DriveCommand::Clean => "clean",
            DriveCommand::Reset => "reset",
        }
    }
}

impl fmt::Display for DriveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DriveCommand {
    type Err = LtfsError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_lowercase();
        DriveCommand::ALL
            .iter()
            .copied()
            .find(|c| c.name() == lower || (lower == "offline" && *c == DriveCommand::Eject))
            .ok_or_else(|| LtfsError::parameter_validation(format!("Unknown drive command: {}", s)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FormatRequest {
    pub label: Option<String>,
    /// Pass `-f` to overwrite an existing LTFS volume
    pub force: bool,
}

/// Build the `mkltfs` invocation for `device`
pub fn format_command(
    device: &str,
    policy: &CompatibilityPolicy,
    request: &FormatRequest,
) -> CommandSpec {
    let mut command = CommandSpec::new("mkltfs").args(["-d", device]);
    if let Some(label) = request.label.as_deref().filter(|l| !l.is_empty()) {
        command = command.args(["-n", label]);
    }
    command = command.args(["-b".to_string(), policy.block_size.to_string()]);
    if request.force {
        command = command.arg("-f");
    }
    command
}

/// Format the tape in `device` with the policy's block size
pub fn format(
    runner: &dyn CommandRunner,
    registry: &Registry,
    device: &DeviceNode,
    policy: &CompatibilityPolicy,
    request: &FormatRequest,
) -> Result<CommandOutput> {
    let guard = registry.lock(&device.path, "format")?;
    format_locked(runner, registry, &guard, device, policy, request)
}

/// [`format`] for a caller that already holds the device lock
pub fn format_locked(
    runner: &dyn CommandRunner,
    registry: &Registry,
    guard: &DeviceGuard,
    device: &DeviceNode,
    policy: &CompatibilityPolicy,
    request: &FormatRequest,
) -> Result<CommandOutput> {
    guard.ensure_holds(&device.path)?;
    if let Some(session) = registry.session(&device.path) {
        return Err(LtfsError::device_busy(format!(
            "{} is {} at {}",
            device.path,
            session.state,
            session.mount_point.display()
        )));
    }

    let command = format_command(&device.path, policy, request);
    info!("Formatting {} (block size {})", device.path, policy.block_size);
    let output = runner.run(&command, policy.format_timeout)?;
    check(&command, output, policy.format_timeout)
}

/// Run a drive command under the device lock
pub fn run_drive_command(
    runner: &dyn CommandRunner,
    registry: &Registry,
    device: &DeviceNode,
    command: DriveCommand,
    timeout: Duration,
) -> Result<CommandOutput> {
    let _guard = registry.lock(&device.path, command.name())?;

    let mut last = None;
    for operation in command.mt_operations() {
        let mt_command = CommandSpec::mt(&device.path, operation);
        let output = runner.run(&mt_command, timeout)?;
        if output.is_success() {
            info!("{} {} done", command, device.path);
            return Ok(output);
        }
        warn!("`{}` failed: {}", mt_command, output.diagnostic());
        last = Some((mt_command, output));
    }

    match last {
        Some((mt_command, output)) => check(&mt_command, output, timeout),
        None => Err(LtfsError::parameter_validation(format!("{} has no mt operation", command))),
    }
}

fn check(command: &CommandSpec, output: CommandOutput, timeout: Duration) -> Result<CommandOutput> {
    if output.is_success() {
        Ok(output)
    } else if output.is_timeout() {
        Err(LtfsError::TimeoutExceeded {
            command: command.to_string(),
            timeout,
        })
    } else {
        Err(LtfsError::command_failed(format!("{}: {}", command, output.diagnostic())))
    }
}
