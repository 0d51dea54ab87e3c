use crate::diagnostics::ProbeKind;
use crate::drive::DriveCommand;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ltfsctl")]
#[command(about = "Discover, classify, mount and diagnose LTFS tape drives")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Specify configuration file path (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List tape device nodes grouped by physical drive
    List {
        /// Show every node, including unreachable and control nodes
        #[arg(short, long)]
        detailed: bool,

        /// Export the drive inventory as CSV
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
    },

    /// Identify a drive and show the compatibility policy derived for it
    Classify {
        /// Tape device path (e.g. /dev/st0)
        #[arg(value_name = "DEVICE")]
        device: String,
    },

    /// Mount the LTFS volume in a drive
    Mount {
        /// Tape device path; the first reachable rewinding node when omitted
        #[arg(value_name = "DEVICE")]
        device: Option<String>,

        /// Mount point; allocated under the removable-media root when omitted
        #[arg(short, long, value_name = "PATH")]
        mount_point: Option<PathBuf>,
    },

    /// Unmount an LTFS volume
    Unmount {
        /// Mount point of the volume
        #[arg(value_name = "MOUNT_POINT")]
        mount_point: PathBuf,

        /// Device the volume belongs to, used as the lock key
        #[arg(short, long)]
        device: Option<String>,
    },

    /// List mounted LTFS volumes
    Mounted,

    /// Format a tape with LTFS using the drive's block size
    Format {
        /// Tape device path
        #[arg(value_name = "DEVICE")]
        device: String,

        /// Volume label
        #[arg(short, long)]
        label: Option<String>,

        /// Overwrite an existing LTFS volume
        #[arg(short, long)]
        force: bool,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Run a single drive command (status, rewind, eject, load, tension, clean, reset)
    Drive {
        /// Tape device path
        #[arg(value_name = "DEVICE")]
        device: String,

        /// Command to run
        #[arg(value_name = "ACTION")]
        action: DriveCommand,
    },

    /// Run diagnostic probes against a drive
    Diagnose {
        /// Tape device path
        #[arg(value_name = "DEVICE")]
        device: String,

        /// Probes to run, in order (repeatable); non-destructive set when omitted
        #[arg(short, long = "probe", value_name = "PROBE")]
        probes: Vec<ProbeKind>,

        /// Write the report to a file (JSON when the name ends in .json)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Check whether tape devices are accessible and how to fix it if not
    Permissions {
        /// Tape device path; all discovered nodes when omitted
        #[arg(value_name = "DEVICE")]
        device: Option<String>,
    },

    /// Check that the external tape tools are installed
    Tools,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_parsing() {
        let cli = Cli::try_parse_from(["ltfsctl", "list", "--csv", "drives.csv"]).unwrap();
        match cli.command {
            Commands::List { detailed, csv } => {
                assert!(!detailed);
                assert_eq!(csv, Some(PathBuf::from("drives.csv")));
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn test_mount_device_optional() {
        let cli = Cli::try_parse_from(["ltfsctl", "-v", "mount"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Mount {
                device: None,
                mount_point: None
            }
        ));

        let cli = Cli::try_parse_from(["ltfsctl", "mount", "/dev/st0", "-m", "/mnt/tape"]).unwrap();
        if let Commands::Mount { device, mount_point } = cli.command {
            assert_eq!(device.as_deref(), Some("/dev/st0"));
            assert_eq!(mount_point, Some(PathBuf::from("/mnt/tape")));
        }
    }

    #[test]
    fn test_diagnose_probe_order_kept() {
        let cli = Cli::try_parse_from([
            "ltfsctl",
            "diagnose",
            "/dev/nst0",
            "--probe",
            "position",
            "--probe",
            "status",
            "--log-json",
        ])
        .unwrap();
        assert!(cli.log_json);
        if let Commands::Diagnose { probes, .. } = cli.command {
            assert_eq!(probes, vec![ProbeKind::Position, ProbeKind::Status]);
        } else {
            panic!("expected diagnose");
        }
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Cli::try_parse_from(["ltfsctl", "diagnose", "/dev/st0", "-p", "defrag"]).is_err());
        assert!(Cli::try_parse_from(["ltfsctl", "drive", "/dev/st0", "erase"]).is_err());
        let cli = Cli::try_parse_from(["ltfsctl", "drive", "/dev/st0", "eject"]).unwrap();
        assert!(matches!(cli.command, Commands::Drive { action: DriveCommand::Eject, .. }));
    }
}
