//! Command Handlers Module
//!
//! This module contains handlers for all CLI subcommands.

pub mod classify;
pub mod diagnose;
pub mod drive;
pub mod format;
pub mod list;
pub mod mount;
pub mod permissions;
pub mod tools;

use ltfs_manager::device::{select_mount_device, DeviceNode};
use ltfs_manager::{Result, TapeService};
use std::io::{self, BufRead, Write};

/// Node named on the command line, or the first reachable rewinding node
pub async fn resolve_device(service: &TapeService, device: Option<String>) -> Result<DeviceNode> {
    match device {
        Some(path) => Ok(DeviceNode::from_path(&path)),
        None => {
            let nodes = service.discover().await?;
            let node = select_mount_device(&nodes)?;
            println!("🔧 Using {}", node.path);
            Ok(node.clone())
        }
    }
}

/// Ask a yes/no question on stdin
pub fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
