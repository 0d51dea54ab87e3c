use ltfs_manager::device::DeviceNode;
use ltfs_manager::{display, Result, TapeService};

pub async fn execute(service: &TapeService, device: String) -> Result<()> {
    let node = DeviceNode::from_path(&device);
    let profile = service.classify(node).await?;
    let policy = service.policy(&profile);
    display::display_profile(&device, &profile, &policy);
    Ok(())
}
