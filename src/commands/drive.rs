use ltfs_manager::device::DeviceNode;
use ltfs_manager::drive::DriveCommand;
use ltfs_manager::{Result, TapeService};

pub async fn execute(service: &TapeService, device: String, action: DriveCommand) -> Result<()> {
    let output = service
        .drive_command(DeviceNode::from_path(&device), action)
        .await?;
    if action == DriveCommand::Status {
        println!("{}", output.stdout.trim_end());
    } else {
        println!("✅ {} {}: done", action, device);
    }
    Ok(())
}
