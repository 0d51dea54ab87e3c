//! Async facade over the blocking engine
//!
//! Every operation runs on the tokio blocking pool and its result comes back
//! through the join handle, so callers on an async runtime never block on a
//! tape command.

use crate::cancel::CancelFlag;
use crate::config::Config;
use crate::device::classifier::{QuirkTable, UNKNOWN_VENDOR};
use crate::device::permissions::current_user_name;
use crate::device::{
    classify, DeviceEnumerator, DeviceNode, DriveProfile, PermissionAdvisor, PermissionFinding,
};
use crate::diagnostics::{DiagnosticEvent, DiagnosticReport, DiagnosticsOrchestrator, ProbeKind};
use crate::drive::{self, DriveCommand, FormatRequest};
use crate::error::{LtfsError, Result};
use crate::mount::table::{normalize_mount_point, MountEntry};
use crate::mount::{
    CompatibilityPolicy, MountEngine, MountOutcome, MountPointAllocator, MountRequest, MountSession,
    MountTable, ProcMounts, Registry,
};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
use crossbeam::channel::Sender;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// External tools the engine shells out to, with their version flag
const TOOLS: [(&str, &str); 5] = [
    ("ltfs", "--version"),
    ("mkltfs", "--version"),
    ("mt", "--version"),
    ("sg_inq", "--version"),
    ("fusermount", "-V"),
];

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub name: String,
    pub available: bool,
    pub version: Option<String>,
}

struct Inner {
    config: Config,
    runner: Arc<dyn CommandRunner>,
    table: Arc<dyn MountTable>,
    registry: Arc<Registry>,
    quirks: QuirkTable,
    engine: MountEngine,
    advisor: PermissionAdvisor,
    check_permissions: bool,
}

#[derive(Clone)]
pub struct TapeService {
    inner: Arc<Inner>,
}

impl TapeService {
    /// Service backed by real processes and `/proc/self/mounts`
    pub fn new(config: Config) -> Self {
        Self::with_parts(
            config,
            Arc::new(SystemRunner),
            Arc::new(ProcMounts::default()),
            current_user_name(),
            true,
        )
    }

    pub fn with_parts(
        config: Config,
        runner: Arc<dyn CommandRunner>,
        table: Arc<dyn MountTable>,
        user: String,
        check_permissions: bool,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        let allocator =
            MountPointAllocator::new(config.media_root.clone(), config.fallback_root(), user);
        let engine = MountEngine::new(
            runner.clone(),
            table.clone(),
            registry.clone(),
            allocator,
            config.timeouts.clone(),
            config.unmount_poll.clone(),
        );
        let quirks = QuirkTable::with_overrides(config.quirk_entries());
        Self {
            inner: Arc::new(Inner {
                config,
                runner,
                table,
                registry,
                quirks,
                engine,
                advisor: PermissionAdvisor::default(),
                check_permissions,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn sessions(&self) -> Vec<MountSession> {
        self.inner.registry.sessions()
    }

    pub async fn discover(&self) -> Result<Vec<DeviceNode>> {
        let inner = self.inner.clone();
        blocking(move || {
            DeviceEnumerator::new(
                inner.config.device_dir.clone(),
                inner.runner.clone(),
                inner.config.timeouts.identity(),
            )
            .discover()
        })
        .await
    }

    pub async fn classify(&self, device: DeviceNode) -> Result<DriveProfile> {
        let inner = self.inner.clone();
        blocking(move || inner.classify(&device)).await
    }

    pub fn policy(&self, profile: &DriveProfile) -> CompatibilityPolicy {
        self.inner.policy(profile)
    }

    pub async fn permissions(&self, device: DeviceNode) -> Result<PermissionFinding> {
        let inner = self.inner.clone();
        blocking(move || inner.advisor.evaluate(&device)).await
    }

    /// Nodes among `devices` the process cannot open read/write
    pub async fn permission_issues(
        &self,
        devices: Vec<DeviceNode>,
    ) -> Result<Vec<(DeviceNode, PermissionFinding)>> {
        let inner = self.inner.clone();
        blocking(move || Ok(inner.advisor.evaluate_all(&devices))).await
    }

    /// Lock the device, check permissions, classify, then run the mount
    /// sequence under that one lock
    pub async fn mount(
        &self,
        device: DeviceNode,
        request: MountRequest,
        cancel: CancelFlag,
    ) -> Result<MountOutcome> {
        let inner = self.inner.clone();
        blocking(move || {
            let guard = inner.registry.lock(&device.path, "mount")?;
            if inner.check_permissions {
                let finding = inner.advisor.evaluate(&device)?;
                if !finding.has_access {
                    return Err(LtfsError::PermissionDenied {
                        device: device.path.clone(),
                        finding,
                    });
                }
            }
            let policy = inner.policy(&inner.classify_or_default(&device));
            inner
                .engine
                .mount_locked(&guard, &device, &policy, &request, &cancel)
        })
        .await
    }

    pub async fn unmount(&self, device: DeviceNode) -> Result<MountSession> {
        let inner = self.inner.clone();
        blocking(move || inner.engine.unmount(&device)).await
    }

    pub async fn confirm_unmount(&self, device: DeviceNode) -> Result<MountSession> {
        let inner = self.inner.clone();
        blocking(move || inner.engine.confirm_unmount(&device)).await
    }

    /// Unmount an LTFS mount this process did not create
    pub async fn unmount_mount_point(
        &self,
        mount_point: PathBuf,
        device: Option<DeviceNode>,
    ) -> Result<MountSession> {
        let inner = self.inner.clone();
        blocking(move || {
            let mount_point = normalize_mount_point(&mount_point);
            let device = match device {
                Some(device) => device,
                None => inner.device_for_mount(&mount_point)?,
            };
            if let Some(existing) = inner.registry.session(&device.path) {
                if existing.mount_point != mount_point {
                    return Err(LtfsError::device_busy(format!(
                        "{} is mounted at {}",
                        device.path,
                        existing.mount_point.display()
                    )));
                }
            } else {
                inner.engine.adopt(&device, &mount_point)?;
            }
            inner.engine.unmount(&device)
        })
        .await
    }

    pub async fn format(
        &self,
        device: DeviceNode,
        request: FormatRequest,
    ) -> Result<CommandOutput> {
        let inner = self.inner.clone();
        blocking(move || {
            let guard = inner.registry.lock(&device.path, "format")?;
            let policy = inner.policy(&inner.classify_or_default(&device));
            drive::format_locked(
                inner.runner.as_ref(),
                &inner.registry,
                &guard,
                &device,
                &policy,
                &request,
            )
        })
        .await
    }

    pub async fn drive_command(
        &self,
        device: DeviceNode,
        command: DriveCommand,
    ) -> Result<CommandOutput> {
        let inner = self.inner.clone();
        blocking(move || {
            drive::run_drive_command(
                inner.runner.as_ref(),
                &inner.registry,
                &device,
                command,
                inner.config.timeouts.drive_command(),
            )
        })
        .await
    }

    pub async fn run_diagnostics(
        &self,
        device: DeviceNode,
        probes: Vec<ProbeKind>,
        cancel: CancelFlag,
        events: Option<Sender<DiagnosticEvent>>,
    ) -> Result<DiagnosticReport> {
        let inner = self.inner.clone();
        blocking(move || {
            let guard = inner.registry.lock(&device.path, "diagnostics")?;
            let block_size = inner.classify_or_default(&device).block_size;
            DiagnosticsOrchestrator::new(
                inner.runner.clone(),
                inner.registry.clone(),
                inner.config.timeouts.clone(),
            )
            .run_suite_locked(&guard, &device, block_size, &probes, &cancel, events.as_ref())
        })
        .await
    }

    /// LTFS filesystems currently in the kernel mount table
    pub async fn mounted(&self) -> Result<Vec<MountEntry>> {
        let inner = self.inner.clone();
        blocking(move || inner.table.ltfs_mounts()).await
    }

    pub async fn check_tools(&self) -> Result<Vec<ToolStatus>> {
        let inner = self.inner.clone();
        blocking(move || Ok(inner.check_tools())).await
    }
}

impl Inner {
    fn classify(&self, device: &DeviceNode) -> Result<DriveProfile> {
        classify(device, self.runner.as_ref(), &self.quirks, self.config.timeouts.identity())
    }

    /// Profile for `device`, or the default profile when the identity tool
    /// cannot run
    fn classify_or_default(&self, device: &DeviceNode) -> DriveProfile {
        self.classify(device).unwrap_or_else(|e| {
            warn!("{}; using the default profile", e);
            self.quirks.profile_for(UNKNOWN_VENDOR, "")
        })
    }

    fn policy(&self, profile: &DriveProfile) -> CompatibilityPolicy {
        CompatibilityPolicy::derive(profile, &self.config.mount_options, &self.config.timeouts)
    }

    fn device_for_mount(&self, mount_point: &Path) -> Result<DeviceNode> {
        let entry = self
            .table
            .ltfs_mounts()?
            .into_iter()
            .find(|e| e.mount_point == mount_point)
            .ok_or_else(|| {
                LtfsError::mount_point_unavailable(
                    mount_point,
                    "no LTFS filesystem is mounted there",
                )
            })?;
        // LTFS reports `ltfs` or `ltfs:<device>` as its source
        let source = entry.source.trim_start_matches("ltfs:");
        let key = if source.starts_with("/dev/") {
            source.to_string()
        } else {
            mount_point.to_string_lossy().into_owned()
        };
        debug!("Mount {} belongs to {}", mount_point.display(), key);
        Ok(DeviceNode::from_path(&key))
    }

    fn check_tools(&self) -> Vec<ToolStatus> {
        TOOLS
            .iter()
            .map(|(name, flag)| {
                let command = CommandSpec::new(*name).arg(*flag);
                match self.runner.run(&command, Duration::from_secs(5)) {
                    Ok(output) => {
                        let text = if output.stdout.trim().is_empty() {
                            output.stderr
                        } else {
                            output.stdout
                        };
                        ToolStatus {
                            name: name.to_string(),
                            available: true,
                            version: text
                                .lines()
                                .next()
                                .map(|l| l.trim().to_string())
                                .filter(|l| !l.is_empty()),
                        }
                    }
                    Err(e) => {
                        debug!("{} unavailable: {}", name, e);
                        ToolStatus {
                            name: name.to_string(),
                            available: false,
                            version: None,
                        }
                    }
                }
            })
            .collect()
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LtfsError::Generic(anyhow::anyhow!("worker task failed: {}", e)))?
}
