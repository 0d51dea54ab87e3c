//! Permissions Command Handler
//!
//! Reports access problems and the steps to fix them. Nothing is changed.

use ltfs_manager::device::DeviceNode;
use ltfs_manager::{display, Result, TapeService};
use tracing::debug;

pub async fn execute(service: &TapeService, device: Option<String>) -> Result<()> {
    let nodes = match device {
        Some(path) => vec![DeviceNode::from_path(&path)],
        None => service.discover().await?,
    };

    if nodes.is_empty() {
        println!("❌ No tape devices found");
        return Ok(());
    }

    let mut denied = 0;
    for node in nodes {
        let path = node.path.clone();
        match service.permissions(node).await {
            Ok(finding) => {
                if !finding.has_access {
                    denied += 1;
                }
                display::display_finding(&path, &finding);
            }
            Err(e) => {
                debug!("Permission check failed for {}: {}", path, e);
                println!("⚠️  {}: {}", path, e);
            }
        }
    }

    if denied == 0 {
        println!("✅ All checked devices are accessible");
    }
    Ok(())
}
