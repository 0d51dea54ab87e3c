use ltfs_manager::{display, Result, TapeService};

pub async fn execute(service: &TapeService) -> Result<()> {
    let tools = service.check_tools().await?;
    display::display_tools(&tools);
    if tools.iter().any(|t| !t.available) {
        println!("💡 Install the LTFS package, mt-st and sg3_utils from your distribution");
    }
    Ok(())
}
