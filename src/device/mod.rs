//! Tape device nodes
//!
//! Linux exposes one physical drive under several nodes: `/dev/st0` (rewinds
//! on close), `/dev/st0a|l|m` (alternate density modes), `/dev/nst0*` (no
//! rewind on close) and a SCSI generic node `/dev/sgN` used for low-level
//! control. This module names and orders them.

pub mod classifier;
pub mod enumerator;
pub mod permissions;

pub use classifier::{classify, DriveProfile, Quirk};
pub use enumerator::{group_by_drive, select_mount_device, DeviceEnumerator, PhysicalDrive};
pub use permissions::{PermissionAdvisor, PermissionFinding};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Node kinds in selection priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Primary,
    Variant,
    NonRewinding,
    Control,
}

impl DeviceKind {
    pub fn label(&self) -> &'static str {
        match self {
            DeviceKind::Primary => "primary",
            DeviceKind::Variant => "variant",
            DeviceKind::NonRewinding => "non-rewinding",
            DeviceKind::Control => "control",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceNode {
    pub path: String,
    pub kind: DeviceKind,
    pub reachable: bool,
}

impl DeviceNode {
    pub fn new<S: Into<String>>(path: S, kind: DeviceKind, reachable: bool) -> Self {
        Self {
            path: path.into(),
            kind,
            reachable,
        }
    }

    /// Build a node from a user-supplied path. Unknown names are treated as primary.
    pub fn from_path(path: &str) -> Self {
        let kind = node_name(path)
            .and_then(parse_node_name)
            .map(|parsed| parsed.kind)
            .unwrap_or(DeviceKind::Primary);
        Self::new(path, kind, true)
    }

    pub fn name(&self) -> &str {
        node_name(&self.path).unwrap_or(&self.path)
    }

    /// Numeric id of the physical drive (`st0a` -> 0)
    pub fn drive_index(&self) -> Option<u32> {
        parse_node_name(self.name()).map(|parsed| parsed.index)
    }

    /// Density mode suffix, `None` for the default mode
    pub fn mode(&self) -> Option<char> {
        parse_node_name(self.name()).and_then(|parsed| parsed.mode)
    }
}

/// Human readable description for a density mode suffix
pub fn mode_description(mode: Option<char>) -> String {
    match mode {
        None => "Default (compression enabled)".to_string(),
        Some('a') => "Auto-density selection".to_string(),
        Some('l') => "Low/Legacy density mode".to_string(),
        Some('m') => "Medium density mode".to_string(),
        Some(other) => format!("Mode {}", other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ParsedName {
    pub kind: DeviceKind,
    pub index: u32,
    pub mode: Option<char>,
}

/// Names that live next to tape nodes in `/dev` but are stream aliases
const NON_DEVICE_ALIASES: &[&str] = &["stdin", "stdout", "stderr"];

fn node_name(path: &str) -> Option<&str> {
    Path::new(path).file_name().and_then(|n| n.to_str())
}

/// Classify a `/dev` entry name; `None` when it is not a tape node
pub(crate) fn parse_node_name(name: &str) -> Option<ParsedName> {
    if NON_DEVICE_ALIASES.contains(&name) {
        return None;
    }

    let (rest, rewinding, control) = if let Some(rest) = name.strip_prefix("nst") {
        (rest, false, false)
    } else if let Some(rest) = name.strip_prefix("st") {
        (rest, true, false)
    } else if let Some(rest) = name.strip_prefix("sg") {
        (rest, true, true)
    } else {
        return None;
    };

    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let index: u32 = rest[..digits_end].parse().ok()?;
    let suffix = &rest[digits_end..];

    let mode = match suffix {
        "" => None,
        "a" | "l" | "m" if !control => suffix.chars().next(),
        _ => return None,
    };

    let kind = match (control, rewinding, mode) {
        (true, _, _) => DeviceKind::Control,
        (false, false, _) => DeviceKind::NonRewinding,
        (false, true, None) => DeviceKind::Primary,
        (false, true, Some(_)) => DeviceKind::Variant,
    };

    Some(ParsedName { kind, index, mode })
}

/// Sort by kind priority, lexicographic inside a kind
pub fn sort_nodes(nodes: &mut [DeviceNode]) {
    nodes.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.path.cmp(&b.path)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_names() {
        let p = parse_node_name("st0").unwrap();
        assert_eq!((p.kind, p.index, p.mode), (DeviceKind::Primary, 0, None));

        let p = parse_node_name("st1l").unwrap();
        assert_eq!((p.kind, p.index, p.mode), (DeviceKind::Variant, 1, Some('l')));

        let p = parse_node_name("nst0").unwrap();
        assert_eq!(p.kind, DeviceKind::NonRewinding);

        let p = parse_node_name("nst2a").unwrap();
        assert_eq!((p.kind, p.index, p.mode), (DeviceKind::NonRewinding, 2, Some('a')));

        let p = parse_node_name("sg3").unwrap();
        assert_eq!((p.kind, p.index), (DeviceKind::Control, 3));
    }

    #[test]
    fn test_aliases_and_garbage_excluded() {
        let garbage = [
            "stdin", "stdout", "stderr", "st", "stx", "st0x", "sg0a", "sda", "nst", "tape",
        ];
        for name in garbage {
            assert!(parse_node_name(name).is_none(), "{} should be excluded", name);
        }
    }

    #[test]
    fn test_sort_nodes_by_class_then_name() {
        let mut nodes = vec![
            DeviceNode::new("/dev/sg1", DeviceKind::Control, true),
            DeviceNode::new("/dev/nst0", DeviceKind::NonRewinding, true),
            DeviceNode::new("/dev/st0a", DeviceKind::Variant, true),
            DeviceNode::new("/dev/st10", DeviceKind::Primary, true),
            DeviceNode::new("/dev/st2", DeviceKind::Primary, false),
            DeviceNode::new("/dev/st0", DeviceKind::Primary, true),
        ];
        sort_nodes(&mut nodes);
        let paths: Vec<&str> = nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/dev/st0", "/dev/st10", "/dev/st2", "/dev/st0a", "/dev/nst0", "/dev/sg1"]
        );
    }

    #[test]
    fn test_from_path_defaults_to_primary() {
        assert_eq!(DeviceNode::from_path("/dev/tapeA").kind, DeviceKind::Primary);
        assert_eq!(DeviceNode::from_path("/dev/nst0").kind, DeviceKind::NonRewinding);
        assert_eq!(DeviceNode::from_path("/dev/st0m").mode(), Some('m'));
    }
}
