//! Terminal rendering for ltfsctl

use crate::device::{
    mode_description, DeviceKind, DeviceNode, DriveProfile, PermissionFinding, PhysicalDrive,
};
use crate::diagnostics::{DiagnosticResult, ProbeStatus};
use crate::mount::table::MountEntry;
use crate::mount::{AttemptOutcome, CompatibilityPolicy, MountAttempt, MountSession};
use crate::service::ToolStatus;
use crate::utils::{format_bytes, format_duration, truncate_string};
use std::time::Duration;

/// Display device nodes as a table
pub fn display_devices(nodes: &[DeviceNode]) {
    println!("{:<16} {:<14} {:<10} {}", "Device", "Kind", "Reachable", "Mode");
    println!("{:-<64}", "");
    for node in nodes {
        let mode = if node.kind == DeviceKind::Control {
            "-".to_string()
        } else {
            mode_description(node.mode())
        };
        println!(
            "{:<16} {:<14} {:<10} {}",
            node.path,
            node.kind.label(),
            if node.reachable { "yes" } else { "no" },
            mode
        );
    }
}

/// Display nodes grouped per physical drive
pub fn display_drives(drives: &[PhysicalDrive]) {
    if drives.len() == 1 {
        println!("Single drive mode");
    }
    for drive in drives {
        println!("📼 {}", drive.id());
        for node in &drive.rewinding {
            println!("    {:<14} rewinding      {}", node.path, mode_description(node.mode()));
        }
        for node in &drive.non_rewinding {
            println!("    {:<14} non-rewinding  {}", node.path, mode_description(node.mode()));
        }
        if let Some(node) = drive.preferred_node(true, None) {
            println!("    💡 Mount with {}", node.path);
        }
    }
}

pub fn display_profile(device: &str, profile: &DriveProfile, policy: &CompatibilityPolicy) {
    println!("📼 {}", device);
    println!("  Vendor: {}", profile.vendor);
    println!("  Model: {}", if profile.model.is_empty() { "-" } else { &profile.model });
    if let Some(revision) = &profile.revision {
        println!("  Revision: {}", revision);
    }
    if let Some(serial) = &profile.serial {
        println!("  Serial: {}", serial);
    }
    if let Some(generation) = &profile.generation {
        println!("  Generation: {}", generation);
    }
    println!(
        "  Block size: {} ({})",
        policy.block_size,
        format_bytes(u64::from(policy.block_size))
    );
    if !profile.quirks.is_empty() {
        println!("  Quirks: {:?}", profile.quirks);
    }
    println!("  Mount timeout: {}", format_duration(policy.mount_timeout));
    println!("  Mount option order:");
    for (index, set) in policy.combinations.iter().enumerate() {
        println!("    {}. {:<24} -o {}", index + 1, set.label(), policy.render(set, device));
    }
}

/// Display the ordered attempt history of a mount request
pub fn display_attempts(attempts: &[MountAttempt]) {
    for attempt in attempts {
        let icon = match attempt.outcome {
            AttemptOutcome::Success => "✅",
            AttemptOutcome::TransientFailure => "⚠️",
            AttemptOutcome::Timeout => "⏱️",
            AttemptOutcome::FatalFailure => "❌",
        };
        println!(
            "  {} Attempt {} [{}] {}",
            icon, attempt.sequence_index, attempt.outcome, attempt.option_set
        );
        if attempt.outcome != AttemptOutcome::Success && !attempt.raw_diagnostic.is_empty() {
            println!("      {}", truncate_string(&attempt.raw_diagnostic, 160));
        }
    }
}

pub fn display_session(session: &MountSession) {
    println!("  Device: {}", session.device.path);
    println!("  Mount point: {}", session.mount_point.display());
    println!("  State: {}", session.state);
    println!("  Mounted at: {}", session.mounted_at.format("%Y-%m-%d %H:%M:%S"));
}

pub fn display_finding(device: &str, finding: &PermissionFinding) {
    if finding.has_access {
        println!("✅ {}: read/write access", device);
        return;
    }
    match &finding.missing_group {
        Some(group) => println!("❌ {}: no access (requires group '{}')", device, group),
        None => println!("❌ {}: no access", device),
    }
    for (index, step) in finding.remediation_steps.iter().enumerate() {
        println!("  💡 {}. {}", index + 1, step);
    }
}

pub fn display_probe_result(result: &DiagnosticResult) {
    let icon = match result.status {
        ProbeStatus::Pass => "✅",
        ProbeStatus::Fail => "❌",
        ProbeStatus::Skipped => "⏭️",
    };
    println!(
        "{} {:<14} {}",
        icon,
        result.probe.name(),
        format_duration(Duration::from_millis(result.duration_ms))
    );
}

pub fn display_mounts(entries: &[MountEntry]) {
    if entries.is_empty() {
        println!("No LTFS tapes currently mounted.");
        return;
    }
    println!("Mounted LTFS tapes:");
    for entry in entries {
        println!("  {} on {} ({})", entry.source, entry.mount_point.display(), entry.fs_type);
    }
}

pub fn display_tools(tools: &[ToolStatus]) {
    for tool in tools {
        if tool.available {
            println!(
                "✅ {:<12} {}",
                tool.name,
                tool.version.as_deref().unwrap_or("version unknown")
            );
        } else {
            println!("❌ {:<12} not installed", tool.name);
        }
    }
}

/// Display error message in consistent format
pub fn display_error(error: &str) {
    eprintln!("Error: {}", error);
}
