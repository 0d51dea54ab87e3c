use crate::device::permissions::PermissionFinding;
use crate::mount::MountAttempt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LtfsError>;

#[derive(Error, Debug)]
pub enum LtfsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("Permission denied for {device}")]
    PermissionDenied {
        device: String,
        finding: PermissionFinding,
    },

    #[error("Drive classification unavailable for {device}: {reason}")]
    ClassificationUnavailable { device: String, reason: String },

    #[error("Transient mount failure on attempt {}: {}", .0.sequence_index, .0.raw_diagnostic)]
    TransientMountFailure(MountAttempt),

    #[error(
        "Fatal mount failure on attempt {}: {}",
        last_index(.attempts),
        last_diagnostic(.attempts)
    )]
    FatalMountFailure { attempts: Vec<MountAttempt> },

    #[error("Mount exhausted after {} attempts", .attempts.len())]
    MountExhausted { attempts: Vec<MountAttempt> },

    #[error("Timeout exceeded after {timeout:?}: {command}")]
    TimeoutExceeded { command: String, timeout: Duration },

    #[error("Mount point unavailable: {}: {reason}", .path.display())]
    MountPointUnavailable { path: PathBuf, reason: String },

    #[error("Unmount of {} not confirmed after {polls} polls", .mount_point.display())]
    UnmountTimeout { mount_point: PathBuf, polls: u32 },

    #[error("Operation cancelled after {completed} steps")]
    Cancelled { completed: usize },

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Parameter validation error: {0}")]
    ParameterValidation(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

fn last_index(attempts: &[MountAttempt]) -> usize {
    attempts.last().map(|a| a.sequence_index).unwrap_or(0)
}

fn last_diagnostic(attempts: &[MountAttempt]) -> &str {
    attempts
        .last()
        .map(|a| a.raw_diagnostic.as_str())
        .unwrap_or("")
}

impl LtfsError {
    pub fn device_not_found<T: Into<String>>(msg: T) -> Self {
        Self::DeviceNotFound(msg.into())
    }

    pub fn device_busy<T: Into<String>>(msg: T) -> Self {
        Self::DeviceBusy(msg.into())
    }

    pub fn command_failed<T: Into<String>>(msg: T) -> Self {
        Self::CommandFailed(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn parse<T: Into<String>>(msg: T) -> Self {
        Self::Parse(msg.into())
    }

    pub fn parameter_validation<T: Into<String>>(msg: T) -> Self {
        Self::ParameterValidation(msg.into())
    }

    pub fn mount_point_unavailable<T: Into<String>>(path: impl Into<PathBuf>, reason: T) -> Self {
        Self::MountPointUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Ordered attempt history carried by mount failures, empty for other kinds.
    pub fn attempts(&self) -> &[MountAttempt] {
        match self {
            Self::FatalMountFailure { attempts } | Self::MountExhausted { attempts } => attempts,
            Self::TransientMountFailure(attempt) => std::slice::from_ref(attempt),
            _ => &[],
        }
    }
}
