//! Format Command Handler

use super::confirm;
use ltfs_manager::device::DeviceNode;
use ltfs_manager::drive::FormatRequest;
use ltfs_manager::{Result, TapeService};
use tracing::info;

pub async fn execute(
    service: &TapeService,
    device: String,
    label: Option<String>,
    force: bool,
    yes: bool,
) -> Result<()> {
    if !yes {
        println!("⚠️  Formatting erases every file on the tape in {}", device);
        if !confirm("Continue?")? {
            println!("Aborted.");
            return Ok(());
        }
    }

    let node = DeviceNode::from_path(&device);
    info!("Starting LTFS format on {}", device);
    let output = service.format(node, FormatRequest { label, force }).await?;
    if !output.stdout.trim().is_empty() {
        println!("{}", output.stdout.trim_end());
    }
    println!("✅ Tape in {} formatted", device);
    Ok(())
}
