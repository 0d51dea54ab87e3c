//! Runtime configuration
//!
//! Loaded from an optional JSON file passed with `--config`. Every field has a
//! default so a partial (or absent) file is valid.

use crate::device::classifier::{Quirk, QuirkEntry, MAX_BLOCK_SIZE};
use crate::error::{LtfsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory scanned for tape device nodes
    pub device_dir: PathBuf,
    /// Conventional removable-media root; the per-user directory below it is preferred
    pub media_root: PathBuf,
    /// Used when `<media_root>/<user>` does not exist; defaults to `~/ltfs`
    pub fallback_root: Option<PathBuf>,
    pub mount_options: MountOptions,
    pub timeouts: Timeouts,
    pub unmount_poll: PollSchedule,
    /// Checked before the built-in quirk table
    pub quirks: Vec<QuirkConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_dir: PathBuf::from("/dev"),
            media_root: PathBuf::from("/media"),
            fallback_root: None,
            mount_options: MountOptions::default(),
            timeouts: Timeouts::default(),
            unmount_poll: PollSchedule::default(),
            quirks: Vec::new(),
        }
    }
}

/// Mount option switches and how they land in the generated `-o` string
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MountOptions {
    /// `uid=<n>`
    pub uid: Option<u32>,
    /// `gid=<n>`
    pub gid: Option<u32>,
    /// Overrides the `devname=` value; defaults to the device node path
    pub device_name: Option<String>,
    /// Puts `force_mount_no_eod` into the baseline combination
    pub force_no_eod: bool,
    /// Puts `sync_type=unmount` into the baseline combination
    pub sync_on_unmount: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub identity_secs: u64,
    pub rewind_secs: u64,
    pub mount_secs: u64,
    pub unmount_secs: u64,
    pub format_secs: u64,
    pub drive_command_secs: u64,
    /// Per-probe budget; destructive probes get four times this
    pub probe_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            identity_secs: 5,
            rewind_secs: 180,
            mount_secs: 300,
            unmount_secs: 30,
            format_secs: 1800,
            drive_command_secs: 300,
            probe_secs: 120,
        }
    }
}

impl Timeouts {
    pub fn identity(&self) -> Duration {
        Duration::from_secs(self.identity_secs)
    }

    pub fn rewind(&self) -> Duration {
        Duration::from_secs(self.rewind_secs)
    }

    pub fn mount(&self) -> Duration {
        Duration::from_secs(self.mount_secs)
    }

    pub fn unmount(&self) -> Duration {
        Duration::from_secs(self.unmount_secs)
    }

    pub fn format(&self) -> Duration {
        Duration::from_secs(self.format_secs)
    }

    pub fn drive_command(&self) -> Duration {
        Duration::from_secs(self.drive_command_secs)
    }

    pub fn probe(&self, destructive: bool) -> Duration {
        let secs = if destructive {
            self.probe_secs.saturating_mul(4)
        } else {
            self.probe_secs
        };
        Duration::from_secs(secs)
    }
}

/// Bounded exponential backoff used while waiting for an unmount to land
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSchedule {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub attempts: u32,
}

impl Default for PollSchedule {
    fn default() -> Self {
        // 250ms doubling, capped at 4s: 10 polls wait ~28s in total
        Self {
            initial_ms: 250,
            max_ms: 4000,
            attempts: 10,
        }
    }
}

impl PollSchedule {
    /// Delay before poll `n` (0-based)
    pub fn delay(&self, n: u32) -> Duration {
        let factor = 1u64.checked_shl(n).unwrap_or(u64::MAX);
        Duration::from_millis(self.initial_ms.saturating_mul(factor).min(self.max_ms))
    }

    pub fn total(&self) -> Duration {
        (0..self.attempts).map(|n| self.delay(n)).sum()
    }
}

/// A user-supplied quirk table entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuirkConfig {
    pub vendor: String,
    #[serde(default)]
    pub model: Option<String>,
    pub block_size: u32,
    #[serde(default)]
    pub quirks: BTreeSet<Quirk>,
}

impl Config {
    /// Load configuration, falling back to defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    LtfsError::config(format!("Cannot read {}: {}", path.display(), e))
                })?;
                serde_json::from_str::<Config>(&raw).map_err(|e| {
                    LtfsError::config(format!("Invalid configuration {}: {}", path.display(), e))
                })?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for entry in &self.quirks {
            if entry.vendor.trim().is_empty() {
                return Err(LtfsError::config("Quirk entry with empty vendor"));
            }
            if !entry.block_size.is_power_of_two() || entry.block_size > MAX_BLOCK_SIZE {
                return Err(LtfsError::config(format!(
                    "Quirk entry for {} has invalid block size {} (power of two up to {})",
                    entry.vendor, entry.block_size, MAX_BLOCK_SIZE
                )));
            }
        }
        if self.unmount_poll.attempts == 0 {
            return Err(LtfsError::config("unmount_poll.attempts must be at least 1"));
        }
        if self.unmount_poll.total() > Duration::from_secs(60) {
            return Err(LtfsError::config(format!(
                "unmount_poll waits {:?} in total, limit is one minute",
                self.unmount_poll.total()
            )));
        }
        Ok(())
    }

    /// Configured quirk entries in table form
    pub fn quirk_entries(&self) -> Vec<QuirkEntry> {
        self.quirks
            .iter()
            .map(|q| QuirkEntry {
                vendor: q.vendor.clone(),
                model: q.model.clone(),
                block_size: q.block_size,
                quirks: q.quirks.clone(),
            })
            .collect()
    }

    pub fn fallback_root(&self) -> Option<PathBuf> {
        self.fallback_root
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join("ltfs")))
    }
}
