//! Device discovery
//!
//! Scans the device directory for tape nodes, probes each with a bounded
//! identity query and returns them in selection priority order.

use super::{parse_node_name, sort_nodes, DeviceKind, DeviceNode};
use crate::error::{LtfsError, Result};
use crate::runner::{CommandRunner, CommandSpec};
use serde::Serialize;
use std::collections::BTreeMap;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identity query used for reachability and classification
pub fn identity_query(device: &str) -> CommandSpec {
    CommandSpec::new("sg_inq").arg(device)
}

pub struct DeviceEnumerator {
    device_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
    probe_timeout: Duration,
}

impl DeviceEnumerator {
    pub fn new(
        device_dir: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            device_dir: device_dir.into(),
            runner,
            probe_timeout,
        }
    }

    /// Discover tape nodes under the device directory
    pub fn discover(&self) -> Result<Vec<DeviceNode>> {
        info!("Scanning {} for tape devices...", self.device_dir.display());
        let candidates = scan_candidates(&self.device_dir)?;
        let nodes = self.discover_paths(&candidates);
        info!(
            "Device scan complete: {} nodes, {} reachable",
            nodes.len(),
            nodes.iter().filter(|n| n.reachable).count()
        );
        Ok(nodes)
    }

    /// Classify and probe an explicit candidate list.
    ///
    /// Probes run concurrently, one scoped thread per candidate, each bounded
    /// by the probe timeout.
    pub fn discover_paths(&self, candidates: &[PathBuf]) -> Vec<DeviceNode> {
        let parsed: Vec<(String, DeviceKind)> = candidates
            .iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?;
                let parsed = parse_node_name(name)?;
                Some((path.to_string_lossy().into_owned(), parsed.kind))
            })
            .collect();

        let probed: Vec<Option<DeviceNode>> = std::thread::scope(|scope| {
            let handles: Vec<_> = parsed
                .iter()
                .map(|(path, kind)| scope.spawn(move || self.probe(path, *kind)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or(None))
                .collect()
        });

        let mut nodes: Vec<DeviceNode> = probed.into_iter().flatten().collect();
        sort_nodes(&mut nodes);
        nodes
    }

    fn probe(&self, path: &str, kind: DeviceKind) -> Option<DeviceNode> {
        let query = identity_query(path);
        let (reachable, is_tape) = match self.runner.run(&query, self.probe_timeout) {
            Ok(out) if out.is_success() => (true, out.stdout.to_ascii_lowercase().contains("tape")),
            Ok(out) => {
                debug!("Device {} not reachable: {}", path, out.diagnostic());
                (false, false)
            }
            Err(e) => {
                debug!("Identity query for {} could not run: {}", path, e);
                (false, false)
            }
        };

        // SCSI generic nodes exist for every SCSI device; keep only tape ones
        if kind == DeviceKind::Control && !is_tape {
            debug!("Skipping non-tape control node {}", path);
            return None;
        }

        Some(DeviceNode::new(path, kind, reachable))
    }
}

/// Character-device entries of `dir` whose names look like tape nodes
pub fn scan_candidates(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if parse_node_name(name).is_none() {
            continue;
        }
        match entry.file_type() {
            Ok(ft) if ft.is_char_device() => candidates.push(entry.path()),
            Ok(_) => debug!("{} is not a character device", entry.path().display()),
            Err(e) => warn!("Cannot stat {}: {}", entry.path().display(), e),
        }
    }
    Ok(candidates)
}

/// First reachable primary node.
///
/// Non-rewinding nodes are never a fallback for mounting: the tape would not
/// be repositioned on close and LTFS fails to find its labels.
pub fn select_mount_device(nodes: &[DeviceNode]) -> Result<&DeviceNode> {
    if let Some(node) = nodes
        .iter()
        .find(|n| n.kind == DeviceKind::Primary && n.reachable)
    {
        return Ok(node);
    }

    let detail = if nodes.is_empty() {
        "no tape device nodes found".to_string()
    } else if nodes.iter().any(|n| n.kind == DeviceKind::Primary) {
        "primary tape nodes exist but none is reachable".to_string()
    } else {
        format!(
            "no primary tape node among {} candidates; other node kinds are not safe to mount",
            nodes.len()
        )
    };
    Err(LtfsError::device_not_found(detail))
}

/// All nodes belonging to one physical drive
#[derive(Debug, Clone, Serialize)]
pub struct PhysicalDrive {
    pub index: u32,
    pub rewinding: Vec<DeviceNode>,
    pub non_rewinding: Vec<DeviceNode>,
}

impl PhysicalDrive {
    pub fn id(&self) -> String {
        format!("drive{}", self.index)
    }

    /// Node for a requested mode, else the default-mode node, else the first one
    pub fn preferred_node(&self, rewinding: bool, mode: Option<char>) -> Option<&DeviceNode> {
        let nodes = if rewinding {
            &self.rewinding
        } else {
            &self.non_rewinding
        };
        nodes
            .iter()
            .find(|n| n.mode() == mode)
            .or_else(|| nodes.iter().find(|n| n.mode().is_none()))
            .or_else(|| nodes.first())
    }
}

/// Group rewinding and non-rewinding nodes by drive number.
/// Control nodes use an unrelated numbering and are left out.
pub fn group_by_drive(nodes: &[DeviceNode]) -> Vec<PhysicalDrive> {
    let mut drives: BTreeMap<u32, PhysicalDrive> = BTreeMap::new();
    for node in nodes {
        if node.kind == DeviceKind::Control {
            continue;
        }
        let Some(index) = node.drive_index() else { continue };
        let drive = drives.entry(index).or_insert_with(|| PhysicalDrive {
            index,
            rewinding: Vec::new(),
            non_rewinding: Vec::new(),
        });
        if node.kind == DeviceKind::NonRewinding {
            drive.non_rewinding.push(node.clone());
        } else {
            drive.rewinding.push(node.clone());
        }
    }
    drives.into_values().collect()
}
