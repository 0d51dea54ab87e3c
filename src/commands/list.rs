//! List Command Handler
//!
//! Handles the `list` subcommand: device discovery, drive grouping and the
//! optional CSV inventory.

use ltfs_manager::device::{group_by_drive, DeviceKind};
use ltfs_manager::{display, inventory, Result, TapeService};
use std::path::PathBuf;
use tracing::{info, warn};

pub async fn execute(service: &TapeService, detailed: bool, csv: Option<PathBuf>) -> Result<()> {
    info!("Scanning {} for tape devices", service.config().device_dir.display());
    let nodes = service.discover().await?;

    if nodes.is_empty() {
        println!("❌ No tape devices found");
        println!(
            "💡 Check that the drive is powered on and the st driver is loaded (modprobe st)"
        );
        return Ok(());
    }

    if detailed {
        display::display_devices(&nodes);
        println!();
    }
    display::display_drives(&group_by_drive(&nodes));

    let unreachable = nodes
        .iter()
        .filter(|n| n.kind == DeviceKind::Primary && !n.reachable)
        .count();
    if unreachable > 0 {
        println!("⚠️  {} primary node(s) did not answer the identity query", unreachable);
        let issues = service.permission_issues(nodes.clone()).await?;
        for (node, finding) in &issues {
            display::display_finding(&node.path, finding);
        }
        if issues.is_empty() {
            println!(
                "💡 Check that a tape is loaded and the drive is not in use by another program"
            );
        }
    }

    if let Some(path) = csv {
        let mut profiles = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let profile = if node.reachable && node.kind != DeviceKind::Control {
                match service.classify(node.clone()).await {
                    Ok(profile) => Some(profile),
                    Err(e) => {
                        warn!("Cannot classify {}: {}", node.path, e);
                        None
                    }
                }
            } else {
                None
            };
            profiles.push(profile);
        }
        let rows = inventory::write_csv(&path, &nodes, &profiles)?;
        println!("✅ Inventory of {} node(s) written to {}", rows, path.display());
    }

    Ok(())
}
