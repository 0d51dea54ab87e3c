//! Drive classification
//!
//! Maps the vendor/product strings reported by the identity query onto a
//! [`DriveProfile`]. Unlisted hardware gets the default profile instead of an
//! error.

use super::enumerator::identity_query;
use super::DeviceNode;
use crate::error::{LtfsError, Result};
use crate::runner::CommandRunner;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Largest transfer block LTO drives accept
pub const MAX_BLOCK_SIZE: u32 = 1024 * 1024;
/// LTFS default block size (512KB)
pub const DEFAULT_BLOCK_SIZE: u32 = 524_288;
/// Block size that Quantum LTO drives handle reliably (64KB)
pub const QUANTUM_BLOCK_SIZE: u32 = 65_536;

pub const UNKNOWN_VENDOR: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quirk {
    /// Slow load/thread: mount and format timeouts are doubled
    ExtendedTimeouts,
    /// Try `sync_type=unmount` before `force_mount_no_eod`
    UnmountSyncFirst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveProfile {
    pub vendor: String,
    pub model: String,
    pub revision: Option<String>,
    pub serial: Option<String>,
    /// e.g. `LTO-5`
    pub generation: Option<String>,
    pub block_size: u32,
    pub quirks: BTreeSet<Quirk>,
}

impl DriveProfile {
    /// Profile used when the vendor is not in the quirk table
    pub fn default_for(vendor: &str, model: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            model: model.to_string(),
            revision: None,
            serial: None,
            generation: generation_from_model(model),
            block_size: DEFAULT_BLOCK_SIZE,
            quirks: BTreeSet::new(),
        }
    }

    pub fn has_quirk(&self, quirk: Quirk) -> bool {
        self.quirks.contains(&quirk)
    }
}

/// One row of the quirk table: case-insensitive substring matchers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuirkEntry {
    pub vendor: String,
    pub model: Option<String>,
    pub block_size: u32,
    pub quirks: BTreeSet<Quirk>,
}

impl QuirkEntry {
    fn matches(&self, vendor: &str, model: &str) -> bool {
        contains_ignore_case(vendor, &self.vendor)
            && self
                .model
                .as_deref()
                .map_or(true, |m| contains_ignore_case(model, m))
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_ascii_uppercase().contains(&needle.to_ascii_uppercase())
}

/// Built-in table, checked after any configured entries. First match wins.
pub fn builtin_quirks() -> Vec<QuirkEntry> {
    vec![
        QuirkEntry {
            vendor: "QUANTUM".to_string(),
            model: None,
            block_size: QUANTUM_BLOCK_SIZE,
            quirks: BTreeSet::from([Quirk::ExtendedTimeouts]),
        },
        // Tandberg LTO drives are rebadged Quantum mechanisms
        QuirkEntry {
            vendor: "TANDBERG".to_string(),
            model: None,
            block_size: QUANTUM_BLOCK_SIZE,
            quirks: BTreeSet::from([Quirk::ExtendedTimeouts]),
        },
    ]
}

/// Ordered quirk table with the default profile as terminal entry
#[derive(Debug, Clone)]
pub struct QuirkTable {
    entries: Vec<QuirkEntry>,
}

impl Default for QuirkTable {
    fn default() -> Self {
        Self {
            entries: builtin_quirks(),
        }
    }
}

impl QuirkTable {
    /// Configured entries take precedence over the built-in ones
    pub fn with_overrides(overrides: Vec<QuirkEntry>) -> Self {
        let mut entries = overrides;
        entries.extend(builtin_quirks());
        Self { entries }
    }

    pub fn entries(&self) -> &[QuirkEntry] {
        &self.entries
    }

    pub fn profile_for(&self, vendor: &str, model: &str) -> DriveProfile {
        let mut profile = DriveProfile::default_for(vendor, model);
        if let Some(entry) = self.entries.iter().find(|e| e.matches(vendor, model)) {
            debug!(
                "Quirk entry {}{} matched {} {}",
                entry.vendor,
                entry.model.as_deref().map(|m| format!("/{}", m)).unwrap_or_default(),
                vendor,
                model
            );
            profile.block_size = entry.block_size;
            profile.quirks = entry.quirks.clone();
        }
        profile
    }
}

/// Fields parsed out of `sg_inq` text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub vendor: Option<String>,
    pub product: Option<String>,
    pub revision: Option<String>,
    pub serial: Option<String>,
}

pub fn parse_identity(output: &str) -> Identity {
    let mut identity = Identity::default();
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else { continue };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let key = key.trim().to_ascii_lowercase();
        let slot = match key.as_str() {
            "vendor identification" => &mut identity.vendor,
            "product identification" => &mut identity.product,
            "product revision level" => &mut identity.revision,
            "unit serial number" => &mut identity.serial,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }
    identity
}

/// `ULTRIUM 5`, `ULTRIUM-HH6`, `ULT3580-TD5` -> `LTO-5`
pub fn generation_from_model(model: &str) -> Option<String> {
    let upper = model.to_ascii_uppercase();
    let tail = if let Some(pos) = upper.find("ULTRIUM") {
        &upper[pos + "ULTRIUM".len()..]
    } else if let Some(pos) = upper.find("-TD").or_else(|| upper.find("-HH")) {
        &upper[pos + 3..]
    } else {
        return None;
    };
    let digits: String = tail
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        Some(format!("LTO-{}", digits))
    }
}

/// Identify the drive behind `device` and derive its profile.
///
/// Only an identity query that cannot run at all is an error; a failing or
/// unparseable query falls back to the default profile.
pub fn classify(
    device: &DeviceNode,
    runner: &dyn CommandRunner,
    table: &QuirkTable,
    timeout: Duration,
) -> Result<DriveProfile> {
    let output = runner
        .run(&identity_query(&device.path), timeout)
        .map_err(|e| LtfsError::ClassificationUnavailable {
            device: device.path.clone(),
            reason: e.to_string(),
        })?;

    let identity = if output.is_success() {
        parse_identity(&output.stdout)
    } else {
        warn!(
            "Identity query for {} failed ({}), using default profile",
            device.path,
            output.diagnostic()
        );
        Identity::default()
    };

    let vendor = identity.vendor.as_deref().unwrap_or(UNKNOWN_VENDOR);
    let model = identity.product.as_deref().unwrap_or_default();
    let mut profile = table.profile_for(vendor, model);
    profile.revision = identity.revision;
    profile.serial = identity.serial;

    info!(
        "Classified {}: {} {} (block size {}, quirks {:?})",
        device.path, profile.vendor, profile.model, profile.block_size, profile.quirks
    );
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;
    use crate::testing::FakeRunner;

    const QUANTUM_INQ: &str = "standard INQUIRY:
  PQual=0  PDT=1  RMB=1  LU_CONG=0  hot_pluggable=0  version=0x06  [SPC-4]
 Vendor identification: QUANTUM
 Product identification: ULTRIUM 5
 Product revision level: 3210
 Unit serial number: HU1234ABCD
";

    fn classify_output(out: CommandOutput) -> Result<DriveProfile> {
        let runner = FakeRunner::new();
        runner.respond("sg_inq", out);
        classify(
            &DeviceNode::from_path("/dev/st0"),
            &runner,
            &QuirkTable::default(),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_parse_identity_fields() {
        let id = parse_identity(QUANTUM_INQ);
        assert_eq!(id.vendor.as_deref(), Some("QUANTUM"));
        assert_eq!(id.product.as_deref(), Some("ULTRIUM 5"));
        assert_eq!(id.revision.as_deref(), Some("3210"));
        assert_eq!(id.serial.as_deref(), Some("HU1234ABCD"));
    }

    #[test]
    fn test_quantum_gets_small_block_size() {
        let profile = classify_output(CommandOutput::success(QUANTUM_INQ)).unwrap();
        assert_eq!(profile.vendor, "QUANTUM");
        assert_eq!(profile.model, "ULTRIUM 5");
        assert_eq!(profile.generation.as_deref(), Some("LTO-5"));
        assert_eq!(profile.block_size, QUANTUM_BLOCK_SIZE);
        assert!(profile.has_quirk(Quirk::ExtendedTimeouts));
    }

    #[test]
    fn test_vendor_match_ignores_case() {
        let table = QuirkTable::default();
        for vendor in ["quantum", "Quantum Corp", "QUANTUM", "xQuAnTuMx"] {
            assert_eq!(table.profile_for(vendor, "anything").block_size, QUANTUM_BLOCK_SIZE);
        }
    }

    #[test]
    fn test_unknown_vendor_gets_default_profile() {
        let table = QuirkTable::default();
        for vendor in ["IBM", "HP", "", "ACME TAPES"] {
            let profile = table.profile_for(vendor, "ULT3580-TD8");
            assert_eq!(profile.block_size, DEFAULT_BLOCK_SIZE);
            assert!(profile.quirks.is_empty());
        }
    }

    #[test]
    fn test_failed_query_falls_back_to_default() {
        let profile = classify_output(CommandOutput::failure(1, "Inquiry failed")).unwrap();
        assert_eq!(profile.vendor, UNKNOWN_VENDOR);
        assert_eq!(profile.block_size, DEFAULT_BLOCK_SIZE);

        let profile = classify_output(CommandOutput::success("garbage output")).unwrap();
        assert_eq!(profile.block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_missing_tool_is_classification_unavailable() {
        let runner = FakeRunner::new();
        runner.fail_spawn("sg_inq");
        let err = classify(
            &DeviceNode::from_path("/dev/st0"),
            &runner,
            &QuirkTable::default(),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, LtfsError::ClassificationUnavailable { .. }));
    }

    #[test]
    fn test_overrides_checked_first() {
        let table = QuirkTable::with_overrides(vec![QuirkEntry {
            vendor: "quantum".into(),
            model: Some("ultrium 8".into()),
            block_size: 262_144,
            quirks: BTreeSet::from([Quirk::UnmountSyncFirst]),
        }]);
        assert_eq!(table.profile_for("QUANTUM", "ULTRIUM 8").block_size, 262_144);
        assert_eq!(table.profile_for("QUANTUM", "ULTRIUM 5").block_size, QUANTUM_BLOCK_SIZE);
    }

    #[test]
    fn test_builtin_block_sizes_valid() {
        for entry in QuirkTable::default().entries() {
            assert!(entry.block_size.is_power_of_two());
            assert!(entry.block_size <= MAX_BLOCK_SIZE);
        }
        assert!(DEFAULT_BLOCK_SIZE.is_power_of_two());
    }

    #[test]
    fn test_generation_from_model() {
        assert_eq!(generation_from_model("ULTRIUM 5").as_deref(), Some("LTO-5"));
        assert_eq!(generation_from_model("Ultrium-HH6").as_deref(), Some("LTO-6"));
        assert_eq!(generation_from_model("ULT3580-TD8").as_deref(), Some("LTO-8"));
        assert_eq!(generation_from_model("DAT72"), None);
    }
}
