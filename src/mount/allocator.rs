//! Mount point allocation
//!
//! Mount points live under `/media/<user>` when that directory exists (the
//! desktop removable-media convention) and under a per-user fallback root
//! otherwise. A directory is reserved by creating it, so a stale directory is
//! never reused: collisions get a timestamp suffix instead.

use crate::device::DeviceNode;
use crate::error::{LtfsError, Result};
use chrono::Local;
use nix::unistd::{access, AccessFlags};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const MAX_SUFFIX_ATTEMPTS: u32 = 1000;

/// Decides whether the process may create directories under a root
pub type AccessCheck = fn(&Path) -> nix::Result<()>;

fn process_can_write(path: &Path) -> nix::Result<()> {
    access(path, AccessFlags::W_OK | AccessFlags::X_OK)
}

#[derive(Debug, Clone)]
pub struct MountPointAllocator {
    media_root: PathBuf,
    fallback_root: Option<PathBuf>,
    user: String,
    access_check: AccessCheck,
}

impl MountPointAllocator {
    pub fn new(
        media_root: impl Into<PathBuf>,
        fallback_root: Option<PathBuf>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            media_root: media_root.into(),
            fallback_root,
            user: user.into(),
            access_check: process_can_write,
        }
    }

    pub fn with_access_check(mut self, check: AccessCheck) -> Self {
        self.access_check = check;
        self
    }

    /// Canonical directory new mount points are created in.
    ///
    /// `<media>/<user>` when it exists and is writable, the fallback root
    /// (created on demand) otherwise.
    pub fn root(&self) -> Result<PathBuf> {
        let primary = self.media_root.join(&self.user);
        let skipped = if primary.is_dir() {
            match (self.access_check)(&primary) {
                Ok(()) => return canonical(&primary),
                Err(e) => format!("{} not writable by {}: {}", primary.display(), self.user, e),
            }
        } else {
            format!("{} does not exist", primary.display())
        };

        let fallback = self.fallback_root.as_ref().ok_or_else(|| {
            LtfsError::mount_point_unavailable(&primary, format!("{}; no fallback root", skipped))
        })?;
        debug!("{}; using fallback root {}", skipped, fallback.display());
        if !fallback.is_dir() {
            debug!("Creating fallback mount root {}", fallback.display());
            std::fs::create_dir_all(fallback).map_err(|e| {
                LtfsError::mount_point_unavailable(fallback, format!("cannot create: {}", e))
            })?;
        }
        (self.access_check)(fallback).map_err(|e| {
            LtfsError::mount_point_unavailable(
                fallback,
                format!("not writable by {}: {} ({})", self.user, e, skipped),
            )
        })?;
        canonical(fallback)
    }

    /// Reserve a fresh mount point directory for `device`
    pub fn allocate(&self, device: &DeviceNode) -> Result<PathBuf> {
        let root = self.root()?;
        let slug = slug(&device.path);

        let base = root.join(&slug);
        if try_reserve(&base)? {
            info!("Allocated mount point {}", base.display());
            return Ok(base);
        }

        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        for n in 0..MAX_SUFFIX_ATTEMPTS {
            let name = if n == 0 {
                format!("{}_{}", slug, stamp)
            } else {
                format!("{}_{}-{}", slug, stamp, n)
            };
            let candidate = root.join(name);
            if try_reserve(&candidate)? {
                info!(
                    "{} already exists, allocated {} instead",
                    base.display(),
                    candidate.display()
                );
                return Ok(candidate);
            }
        }

        Err(LtfsError::mount_point_unavailable(
            base,
            "too many existing directories with the same name",
        ))
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .map_err(|e| LtfsError::mount_point_unavailable(path, e.to_string()))
}

/// `false` when the path already exists
fn try_reserve(path: &Path) -> Result<bool> {
    match std::fs::create_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(LtfsError::mount_point_unavailable(path, e.to_string())),
    }
}

/// `/dev/st0` -> `ltfs_st0`
pub fn slug(device_path: &str) -> String {
    let name = Path::new(device_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(device_path);
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("ltfs_{}", cleaned)
}

/// Remove an allocator-created mount point once nothing is mounted on it
pub fn release(path: &Path) {
    match std::fs::remove_dir(path) {
        Ok(()) => debug!("Removed mount point {}", path.display()),
        Err(e) => debug!("Leaving mount point {} in place: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;
    use tempfile::TempDir;

    fn media_with_user(user: &str) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(user)).unwrap();
        dir
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("/dev/st0"), "ltfs_st0");
        assert_eq!(slug("/dev/tapeA"), "ltfs_tapeA");
        assert_eq!(slug("/dev/tape:x y"), "ltfs_tape_x_y");
    }

    #[test]
    fn test_allocate_under_user_media_dir() {
        let media = media_with_user("alice");
        let allocator = MountPointAllocator::new(media.path(), None, "alice");
        let path = allocator.allocate(&DeviceNode::from_path("/dev/tapeA")).unwrap();
        let expected = media.path().canonicalize().unwrap().join("alice").join("ltfs_tapeA");
        assert_eq!(path, expected);
        assert!(path.is_dir());
    }

    #[test]
    fn test_allocate_twice_gives_distinct_paths() {
        let media = media_with_user("alice");
        let allocator = MountPointAllocator::new(media.path(), None, "alice");
        let device = DeviceNode::from_path("/dev/st0");
        let first = allocator.allocate(&device).unwrap();
        let second = allocator.allocate(&device).unwrap();
        let third = allocator.allocate(&device).unwrap();
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert!(second
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("ltfs_st0_"));
    }

    #[test]
    fn test_fallback_root_used_and_created() {
        let media = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let fallback = home.path().join("ltfs");
        let allocator = MountPointAllocator::new(media.path(), Some(fallback.clone()), "bob");
        let path = allocator.allocate(&DeviceNode::from_path("/dev/st1")).unwrap();
        assert_eq!(path, fallback.canonicalize().unwrap().join("ltfs_st1"));
    }

    fn deny_media(path: &Path) -> nix::Result<()> {
        if path.ends_with("alice") {
            Err(Errno::EACCES)
        } else {
            Ok(())
        }
    }

    #[test]
    fn test_unwritable_media_dir_falls_back() {
        let media = media_with_user("alice");
        let home = tempfile::tempdir().unwrap();
        let fallback = home.path().join("ltfs");
        let allocator = MountPointAllocator::new(media.path(), Some(fallback.clone()), "alice")
            .with_access_check(deny_media);
        let path = allocator.allocate(&DeviceNode::from_path("/dev/st0")).unwrap();
        assert_eq!(path, fallback.canonicalize().unwrap().join("ltfs_st0"));
        assert!(!media.path().join("alice").join("ltfs_st0").exists());
    }

    #[test]
    fn test_unwritable_media_dir_without_fallback_is_unavailable() {
        let media = media_with_user("alice");
        let allocator =
            MountPointAllocator::new(media.path(), None, "alice").with_access_check(deny_media);
        let err = allocator.root().unwrap_err();
        assert!(matches!(err, LtfsError::MountPointUnavailable { .. }));
    }

    #[test]
    fn test_both_roots_unwritable_is_unavailable() {
        let media = media_with_user("alice");
        let home = tempfile::tempdir().unwrap();
        let allocator =
            MountPointAllocator::new(media.path(), Some(home.path().join("ltfs")), "alice")
                .with_access_check(|_| Err(Errno::EACCES));
        let err = allocator.allocate(&DeviceNode::from_path("/dev/st0")).unwrap_err();
        match err {
            LtfsError::MountPointUnavailable { reason, .. } => {
                assert!(reason.contains("not writable"))
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_root_resolves_symlinks() {
        let media = media_with_user("alice");
        let link = tempfile::tempdir().unwrap();
        let linked_media = link.path().join("media");
        std::os::unix::fs::symlink(media.path(), &linked_media).unwrap();
        let allocator = MountPointAllocator::new(&linked_media, None, "alice");
        let root = allocator.root().unwrap();
        assert_eq!(root, media.path().canonicalize().unwrap().join("alice"));
    }

    #[test]
    fn test_no_root_is_unavailable() {
        let media = tempfile::tempdir().unwrap();
        let allocator = MountPointAllocator::new(media.path(), None, "carol");
        let err = allocator.allocate(&DeviceNode::from_path("/dev/st0")).unwrap_err();
        assert!(matches!(err, LtfsError::MountPointUnavailable { .. }));
    }

    #[test]
    fn test_release_removes_empty_dir() {
        let media = media_with_user("alice");
        let allocator = MountPointAllocator::new(media.path(), None, "alice");
        let path = allocator.allocate(&DeviceNode::from_path("/dev/st0")).unwrap();
        release(&path);
        assert!(!path.exists());
    }
}
