//! Compatibility policy
//!
//! Turns a drive profile and the configured mount options into the ordered
//! list of `ltfs -o` option combinations the engine walks through.

use crate::config::{MountOptions, Timeouts};
use crate::device::{DriveProfile, Quirk};
use serde::Serialize;
use std::time::Duration;

/// Fallback switches layered on top of the baseline options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OptionSet {
    /// `force_mount_no_eod`: skip end-of-data validation
    pub force_no_eod: bool,
    /// `sync_type=unmount`: only sync the index on unmount
    pub sync_on_unmount: bool,
}

impl OptionSet {
    pub fn label(&self) -> &'static str {
        match (self.force_no_eod, self.sync_on_unmount) {
            (false, false) => "baseline",
            (true, false) => "no-eod",
            (false, true) => "sync-on-unmount",
            (true, true) => "no-eod+sync-on-unmount",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompatibilityPolicy {
    /// Block size for format operations
    pub block_size: u32,
    pub combinations: Vec<OptionSet>,
    pub mount_options: MountOptions,
    pub mount_timeout: Duration,
    pub format_timeout: Duration,
}

impl CompatibilityPolicy {
    pub fn derive(profile: &DriveProfile, options: &MountOptions, timeouts: &Timeouts) -> Self {
        let baseline = OptionSet {
            force_no_eod: options.force_no_eod,
            sync_on_unmount: options.sync_on_unmount,
        };
        let no_eod = OptionSet {
            force_no_eod: true,
            ..baseline
        };
        let sync = OptionSet {
            sync_on_unmount: true,
            ..baseline
        };
        let both = OptionSet {
            force_no_eod: true,
            sync_on_unmount: true,
        };

        let ordered = if profile.has_quirk(Quirk::UnmountSyncFirst) {
            [baseline, sync, no_eod, both]
        } else {
            [baseline, no_eod, sync, both]
        };

        let mut combinations: Vec<OptionSet> = Vec::with_capacity(4);
        for set in ordered {
            if !combinations.contains(&set) {
                combinations.push(set);
            }
        }

        let factor = if profile.has_quirk(Quirk::ExtendedTimeouts) { 2 } else { 1 };

        Self {
            block_size: profile.block_size,
            combinations,
            mount_options: options.clone(),
            mount_timeout: timeouts.mount() * factor,
            format_timeout: timeouts.format() * factor,
        }
    }

    /// The `-o` argument for one combination
    pub fn render(&self, set: &OptionSet, device: &str) -> String {
        let devname = self.mount_options.device_name.as_deref().unwrap_or(device);
        let mut parts = vec![format!("devname={}", devname)];
        if set.force_no_eod {
            parts.push("force_mount_no_eod".to_string());
        }
        if set.sync_on_unmount {
            parts.push("sync_type=unmount".to_string());
        }
        if let Some(uid) = self.mount_options.uid {
            parts.push(format!("uid={}", uid));
        }
        if let Some(gid) = self.mount_options.gid {
            parts.push(format!("gid={}", gid));
        }
        parts.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn profile(quirks: &[Quirk]) -> DriveProfile {
        let mut p = DriveProfile::default_for("IBM", "ULT3580-TD6");
        p.quirks = quirks.iter().copied().collect::<BTreeSet<_>>();
        p
    }

    #[test]
    fn test_default_order() {
        let policy = CompatibilityPolicy::derive(
            &profile(&[]),
            &MountOptions::default(),
            &Timeouts::default(),
        );
        let labels: Vec<&str> = policy.combinations.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["baseline", "no-eod", "sync-on-unmount", "no-eod+sync-on-unmount"]);
        assert_eq!(policy.block_size, 524_288);
        assert_eq!(policy.mount_timeout, Timeouts::default().mount());
    }

    #[test]
    fn test_unmount_sync_first_quirk() {
        let policy = CompatibilityPolicy::derive(
            &profile(&[Quirk::UnmountSyncFirst]),
            &MountOptions::default(),
            &Timeouts::default(),
        );
        assert_eq!(policy.combinations[1].label(), "sync-on-unmount");
        assert_eq!(policy.combinations[2].label(), "no-eod");
    }

    #[test]
    fn test_extended_timeouts_quirk() {
        let timeouts = Timeouts::default();
        let policy = CompatibilityPolicy::derive(
            &profile(&[Quirk::ExtendedTimeouts]),
            &MountOptions::default(),
            &timeouts,
        );
        assert_eq!(policy.mount_timeout, timeouts.mount() * 2);
        assert_eq!(policy.format_timeout, timeouts.format() * 2);
    }

    #[test]
    fn test_configured_flags_collapse_duplicates() {
        let options = MountOptions {
            force_no_eod: true,
            ..Default::default()
        };
        let policy = CompatibilityPolicy::derive(&profile(&[]), &options, &Timeouts::default());
        let labels: Vec<&str> = policy.combinations.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["no-eod", "no-eod+sync-on-unmount"]);

        let options = MountOptions {
            force_no_eod: true,
            sync_on_unmount: true,
            ..Default::default()
        };
        let policy = CompatibilityPolicy::derive(&profile(&[]), &options, &Timeouts::default());
        assert_eq!(policy.combinations.len(), 1);
    }

    #[test]
    fn test_render_option_string() {
        let options = MountOptions {
            uid: Some(1000),
            gid: Some(1000),
            ..Default::default()
        };
        let policy = CompatibilityPolicy::derive(&profile(&[]), &options, &Timeouts::default());
        assert_eq!(
            policy.render(&policy.combinations[0], "/dev/st0"),
            "devname=/dev/st0,uid=1000,gid=1000"
        );
        assert_eq!(
            policy.render(&policy.combinations[3], "/dev/st0"),
            "devname=/dev/st0,force_mount_no_eod,sync_type=unmount,uid=1000,gid=1000"
        );
    }

    #[test]
    fn test_device_name_override() {
        let options = MountOptions {
            device_name: Some("/dev/sg3".into()),
            ..Default::default()
        };
        let policy = CompatibilityPolicy::derive(&profile(&[]), &options, &Timeouts::default());
        assert_eq!(policy.render(&policy.combinations[0], "/dev/st0"), "devname=/dev/sg3");
    }
}
