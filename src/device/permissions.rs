//! Device permission checks
//!
//! Compares the current process credentials with a node's owner, group and
//! mode bits. Only reports and advises; nothing here changes privileges.

use super::DeviceNode;
use crate::error::{LtfsError, Result};
use nix::unistd::{getegid, geteuid, getgroups, Gid, Group, Uid, User};
use serde::{Deserialize, Serialize};
use std::os::unix::fs::MetadataExt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionFinding {
    pub has_access: bool,
    pub missing_group: Option<String>,
    pub remediation_steps: Vec<String>,
}

impl PermissionFinding {
    fn granted() -> Self {
        Self {
            has_access: true,
            missing_group: None,
            remediation_steps: Vec::new(),
        }
    }
}

/// Credentials of the invoking process
#[derive(Debug, Clone)]
pub struct ProcessIdentity {
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
    pub user_name: String,
}

impl ProcessIdentity {
    pub fn current() -> Self {
        let uid = geteuid();
        let gid = getegid();
        let groups = getgroups()
            .map(|gs| gs.into_iter().map(Gid::as_raw).collect())
            .unwrap_or_else(|e| {
                warn!("Cannot read supplementary groups: {}", e);
                Vec::new()
            });
        Self {
            uid: uid.as_raw(),
            gid: gid.as_raw(),
            groups,
            user_name: current_user_name(),
        }
    }

    fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }
}

/// Login name of the effective user, `$USER` as fallback
pub fn current_user_name() -> String {
    User::from_uid(geteuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| Uid::effective().to_string())
}

/// Ownership and mode of a device node plus its group's database entry
#[derive(Debug, Clone)]
pub struct NodeOwnership {
    pub path: String,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub group_name: Option<String>,
    pub group_members: Vec<String>,
}

impl NodeOwnership {
    pub fn read(path: &str) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LtfsError::device_not_found(path),
            _ => LtfsError::Io(e),
        })?;
        let group = Group::from_gid(Gid::from_raw(meta.gid())).ok().flatten();
        Ok(Self {
            path: path.to_string(),
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode() & 0o777,
            group_name: group.as_ref().map(|g| g.name.clone()),
            group_members: group.map(|g| g.mem).unwrap_or_default(),
        })
    }
}

const RW_OWNER: u32 = 0o600;
const RW_GROUP: u32 = 0o060;
const RW_OTHER: u32 = 0o006;

/// Decide read/write access and build the remediation plan.
///
/// Owner, group and other bits are checked the way the kernel does: the
/// first class the process belongs to is the only one consulted.
pub fn assess(
    identity: &ProcessIdentity,
    node: &NodeOwnership,
    program: &str,
) -> PermissionFinding {
    let has_access = if identity.uid == 0 {
        true
    } else if identity.uid == node.uid {
        node.mode & RW_OWNER == RW_OWNER
    } else if identity.in_group(node.gid) {
        node.mode & RW_GROUP == RW_GROUP
    } else {
        node.mode & RW_OTHER == RW_OTHER
    };

    if has_access {
        return PermissionFinding::granted();
    }

    let user = &identity.user_name;
    let group_grants = node.mode & RW_GROUP == RW_GROUP;
    let group_name = node
        .group_name
        .clone()
        .unwrap_or_else(|| node.gid.to_string());

    if group_grants && !identity.in_group(node.gid) {
        let mut steps = Vec::new();
        if node.group_members.iter().any(|m| m == user) {
            steps.push(format!(
                "User '{}' is already listed in group '{}', \
                 but this session started before the membership was added",
                user, group_name
            ));
        } else {
            steps.push(format!(
                "Add yourself to the '{}' group: sudo usermod -a -G {} {}",
                group_name, group_name, user
            ));
        }
        steps.push("Log out and back in so the new group membership takes effect".to_string());
        steps.push(format!(
            "One-off workaround without re-login: sudo -u {} -g {} {}",
            user, group_name, program
        ));
        return PermissionFinding {
            has_access: false,
            missing_group: Some(group_name),
            remediation_steps: steps,
        };
    }

    PermissionFinding {
        has_access: false,
        missing_group: None,
        remediation_steps: vec![
            format!(
                "{} has mode {:03o}, which grants read/write to neither group '{}' nor other users",
                node.path, node.mode, group_name
            ),
            format!(
                "Ask an administrator to adjust the udev rule for {} \
                 (e.g. MODE=\"0660\", GROUP=\"tape\")",
                node.path
            ),
            format!("One-off workaround: run `sudo {}` for this operation only", program),
        ],
    }
}

pub struct PermissionAdvisor {
    program: String,
}

impl Default for PermissionAdvisor {
    fn default() -> Self {
        Self::new("ltfsctl")
    }
}

impl PermissionAdvisor {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn evaluate(&self, device: &DeviceNode) -> Result<PermissionFinding> {
        let node = NodeOwnership::read(&device.path)?;
        let identity = ProcessIdentity::current();
        let finding = assess(&identity, &node, &self.program);
        debug!(
            "Permission check {}: uid={} gid={} mode={:03o} -> access={}",
            device.path, node.uid, node.gid, node.mode, finding.has_access
        );
        Ok(finding)
    }

    /// Nodes the process cannot open read/write, with their findings
    pub fn evaluate_all(&self, devices: &[DeviceNode]) -> Vec<(DeviceNode, PermissionFinding)> {
        devices
            .iter()
            .filter_map(|device| match self.evaluate(device) {
                Ok(finding) if !finding.has_access => Some((device.clone(), finding)),
                Ok(_) => None,
                Err(e) => {
                    debug!("Skipping permission check for {}: {}", device.path, e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(uid: u32, groups: &[u32]) -> ProcessIdentity {
        ProcessIdentity {
            uid,
            gid: 1000,
            groups: groups.to_vec(),
            user_name: "alice".to_string(),
        }
    }

    fn tape_node(mode: u32, members: &[&str]) -> NodeOwnership {
        NodeOwnership {
            path: "/dev/st0".to_string(),
            uid: 0,
            gid: 26,
            mode,
            group_name: Some("tape".to_string()),
            group_members: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn test_group_member_has_access() {
        let finding = assess(&identity(1000, &[1000, 26]), &tape_node(0o660, &[]), "ltfsctl");
        assert!(finding.has_access);
        assert!(finding.remediation_steps.is_empty());
    }

    #[test]
    fn test_root_always_has_access() {
        assert!(assess(&identity(0, &[]), &tape_node(0o600, &[]), "ltfsctl").has_access);
    }

    #[test]
    fn test_missing_group_plan() {
        let finding = assess(&identity(1000, &[1000]), &tape_node(0o660, &[]), "ltfsctl");
        assert!(!finding.has_access);
        assert_eq!(finding.missing_group.as_deref(), Some("tape"));
        assert_eq!(finding.remediation_steps.len(), 3);
        assert!(finding.remediation_steps[0].contains("usermod -a -G tape alice"));
        assert!(finding.remediation_steps[1].contains("Log out"));
        assert!(finding.remediation_steps[2].contains("sudo -u alice -g tape ltfsctl"));
    }

    #[test]
    fn test_pending_membership_needs_relogin() {
        let node = tape_node(0o660, &["bob", "alice"]);
        let finding = assess(&identity(1000, &[1000]), &node, "ltfsctl");
        assert!(!finding.has_access);
        assert!(finding.remediation_steps[0].contains("already listed"));
        assert!(!finding.remediation_steps.iter().any(|s| s.contains("usermod")));
    }

    #[test]
    fn test_owner_only_mode_has_no_group_fix() {
        let finding = assess(&identity(1000, &[1000, 26]), &tape_node(0o600, &[]), "ltfsctl");
        assert!(!finding.has_access);
        assert_eq!(finding.missing_group, None);
        assert!(finding.remediation_steps[0].contains("600"));
    }

    #[test]
    fn test_world_writable_node() {
        assert!(assess(&identity(1000, &[1000]), &tape_node(0o666, &[]), "ltfsctl").has_access);
    }

    #[test]
    fn test_missing_node_is_device_not_found() {
        let advisor = PermissionAdvisor::new("ltfsctl");
        let err = advisor
            .evaluate(&DeviceNode::from_path("/nonexistent/st9"))
            .unwrap_err();
        assert!(matches!(err, LtfsError::DeviceNotFound(_)));
    }
}
