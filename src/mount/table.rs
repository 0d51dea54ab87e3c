//! Active mount detection

use crate::error::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One line of the kernel mount table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountEntry {
    pub source: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

impl MountEntry {
    pub fn is_ltfs(&self) -> bool {
        self.fs_type.starts_with("fuse")
            && (self.source.contains("ltfs") || self.fs_type.contains("ltfs"))
    }
}

pub trait MountTable: Send + Sync {
    fn is_active(&self, mount_point: &Path) -> Result<bool>;

    /// Currently mounted LTFS filesystems
    fn ltfs_mounts(&self) -> Result<Vec<MountEntry>>;
}

/// Reads `/proc/self/mounts`
#[derive(Debug, Clone)]
pub struct ProcMounts {
    path: PathBuf,
}

impl Default for ProcMounts {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/proc/self/mounts"),
        }
    }
}

impl ProcMounts {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn entries(&self) -> Result<Vec<MountEntry>> {
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(parse_mounts(&raw))
    }
}

impl MountTable for ProcMounts {
    fn is_active(&self, mount_point: &Path) -> Result<bool> {
        Ok(self.entries()?.iter().any(|e| e.mount_point == mount_point))
    }

    fn ltfs_mounts(&self) -> Result<Vec<MountEntry>> {
        Ok(self.entries()?.into_iter().filter(MountEntry::is_ltfs).collect())
    }
}

/// Absolute, symlink-free form of `path`, matching how the kernel lists mounts.
///
/// Paths that cannot be resolved are only made absolute.
pub fn normalize_mount_point(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

pub fn parse_mounts(raw: &str) -> Vec<MountEntry> {
    raw.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry {
                source: unescape(source),
                mount_point: PathBuf::from(unescape(mount_point)),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// Undo the kernel's octal escaping (`\040` for space and friends)
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            let parsed = std::str::from_utf8(digits)
                .ok()
                .filter(|d| d.bytes().all(|b| (b'0'..=b'7').contains(&b)))
                .and_then(|d| u8::from_str_radix(d, 8).ok());
            if let Some(value) = parsed {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/nvme0n1p2 / ext4 rw,relatime 0 0
ltfs /media/alice/ltfs_st0 fuse rw,nosuid,nodev,relatime,user_id=1000,group_id=1000 0 0
ltfs:/dev/sg3 /home/bob/ltfs/my\\040tape fuse.ltfs rw,nosuid,nodev 0 0
sshfs#host: /mnt/remote fuse.sshfs rw 0 0
";

    #[test]
    fn test_parse_and_filter_ltfs() {
        let entries = parse_mounts(SAMPLE);
        assert_eq!(entries.len(), 5);
        let ltfs: Vec<_> = entries.into_iter().filter(MountEntry::is_ltfs).collect();
        assert_eq!(ltfs.len(), 2);
        assert_eq!(ltfs[0].mount_point, PathBuf::from("/media/alice/ltfs_st0"));
        assert_eq!(ltfs[1].mount_point, PathBuf::from("/home/bob/ltfs/my tape"));
    }

    #[test]
    fn test_proc_mounts_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mounts");
        std::fs::write(&path, SAMPLE).unwrap();
        let table = ProcMounts::with_path(&path);
        assert!(table.is_active(Path::new("/media/alice/ltfs_st0")).unwrap());
        assert!(!table.is_active(Path::new("/media/alice/ltfs_st1")).unwrap());
        assert_eq!(table.ltfs_mounts().unwrap().len(), 2);
    }

    #[test]
    fn test_normalize_mount_point() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let canonical = real.canonicalize().unwrap();

        assert_eq!(normalize_mount_point(&link), canonical);
        assert_eq!(normalize_mount_point(&real.join("..").join("real")), canonical);
        // missing paths stay as given, made absolute
        let missing = Path::new("/nonexistent/ltfs_st9");
        assert_eq!(normalize_mount_point(missing), missing);
        assert!(normalize_mount_point(Path::new("ltfs_st9")).is_absolute());
    }

    #[test]
    fn test_unescape_leaves_plain_backslash() {
        assert_eq!(unescape("a\\040b"), "a b");
        assert_eq!(unescape("a\\x"), "a\\x");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }
}
