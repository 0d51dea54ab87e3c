//! LTFS mount orchestration
//!
//! - `policy`: option combinations derived from a drive profile
//! - `allocator`: conflict-free mount point directories
//! - `engine`: rewind, ordered fallback attempts, unmount confirmation
//! - `session`: per-device locks and live mount sessions
//! - `table`: which mount points are currently active

pub mod allocator;
pub mod engine;
pub mod policy;
pub mod session;
pub mod table;

pub use allocator::MountPointAllocator;
pub use engine::{MountEngine, MountOutcome, MountRequest};
pub use policy::{CompatibilityPolicy, OptionSet};
pub use session::{DeviceGuard, DeviceLocks, Registry};
pub use table::{MountTable, ProcMounts};

use crate::device::DeviceNode;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    FatalFailure,
    Timeout,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::TransientFailure => "transient failure",
            AttemptOutcome::FatalFailure => "fatal failure",
            AttemptOutcome::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Record of one mount command; never changed after creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountAttempt {
    /// 1-based position in the policy order
    pub sequence_index: usize,
    pub option_set: String,
    pub outcome: AttemptOutcome,
    pub raw_diagnostic: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Mounted,
    Unmounting,
    Unmounted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Mounted => "mounted",
            SessionState::Unmounting => "unmount in progress",
            SessionState::Unmounted => "unmounted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSession {
    pub id: uuid::Uuid,
    pub device: DeviceNode,
    pub mount_point: PathBuf,
    pub state: SessionState,
    pub mounted_at: DateTime<Local>,
    /// Mount point directory was created by the allocator and may be removed after unmount
    pub allocated: bool,
}

impl MountSession {
    pub fn new(device: DeviceNode, mount_point: PathBuf, allocated: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            device,
            mount_point,
            state: SessionState::Mounted,
            mounted_at: Local::now(),
            allocated,
        }
    }
}
