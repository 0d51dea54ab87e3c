//! Mount Command Handlers
//!
//! `mount`, `unmount` and `mounted`.

use super::resolve_device;
use ltfs_manager::device::DeviceNode;
use ltfs_manager::mount::MountRequest;
use ltfs_manager::{display, CancelFlag, LtfsError, Result, TapeService};
use std::path::PathBuf;
use tracing::{info, warn};

pub async fn execute_mount(
    service: &TapeService,
    device: Option<String>,
    mount_point: Option<PathBuf>,
) -> Result<()> {
    let node = resolve_device(service, device).await?;
    info!("Mounting LTFS volume from {}", node.path);

    let cancel = CancelFlag::new();
    let watcher = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current attempt");
            watcher.cancel();
        }
    });

    let result = service
        .mount(node, MountRequest { mount_point }, cancel)
        .await;
    ctrl_c.abort();

    match result {
        Ok(outcome) => {
            if outcome.reused {
                println!("✅ Already mounted");
            } else {
                display::display_attempts(&outcome.attempts);
                println!("✅ LTFS volume mounted");
            }
            display::display_session(&outcome.session);
            Ok(())
        }
        Err(e) => {
            let attempts = e.attempts();
            if !attempts.is_empty() {
                println!("❌ Mount failed after {} attempt(s):", attempts.len());
                display::display_attempts(attempts);
            }
            if let LtfsError::PermissionDenied { device, finding } = &e {
                display::display_finding(device, finding);
            }
            Err(e)
        }
    }
}

pub async fn execute_unmount(
    service: &TapeService,
    mount_point: PathBuf,
    device: Option<String>,
) -> Result<()> {
    let device = device.map(|path| DeviceNode::from_path(&path));
    println!("🔧 Unmounting {}", mount_point.display());

    match service.unmount_mount_point(mount_point.clone(), device).await {
        Ok(session) => {
            println!("✅ {} unmounted ({})", mount_point.display(), session.device.path);
            Ok(())
        }
        Err(e @ LtfsError::UnmountTimeout { .. }) => {
            println!("⚠️  The unmount was issued but the mount is still listed");
            println!(
                "💡 Check for processes holding files open: fuser -vm {}",
                mount_point.display()
            );
            Err(e)
        }
        Err(e) => Err(e),
    }
}

pub async fn execute_mounted(service: &TapeService) -> Result<()> {
    let entries = service.mounted().await?;
    display::display_mounts(&entries);
    Ok(())
}
