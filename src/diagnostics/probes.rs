//! Command steps behind each probe

use super::ProbeKind;
use crate::error::Result;
use crate::runner::CommandSpec;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// Size of the read/write integrity payload
pub const INTEGRITY_PAYLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Log pages fetched by the log-pages probe
const LOG_PAGES: [&str; 7] = ["0x02", "0x03", "0x06", "0x0c", "0x0d", "0x0e", "0x0f"];

#[derive(Debug, Clone)]
pub struct ProbeStep {
    pub label: &'static str,
    pub command: CommandSpec,
    /// A failing required step fails the probe; others only add detail
    pub required: bool,
}

impl ProbeStep {
    fn required(label: &'static str, command: CommandSpec) -> Self {
        Self {
            label,
            command,
            required: true,
        }
    }

    fn optional(label: &'static str, command: CommandSpec) -> Self {
        Self {
            label,
            command,
            required: false,
        }
    }
}

/// Steps for every probe except the read/write integrity check
pub fn steps(kind: ProbeKind, device: &str) -> Vec<ProbeStep> {
    let mt = |op: &str| CommandSpec::mt(device, op);
    // sg3_utils tools take their options first and the device last
    let sg = |program: &str, options: &[&str]| {
        CommandSpec::new(program)
            .args(options.iter().copied())
            .arg(device)
    };
    match kind {
        ProbeKind::Status => vec![ProbeStep::required("Drive status", mt("status"))],
        ProbeKind::TapeHealth => vec![
            ProbeStep::required("Basic status", mt("status")),
            ProbeStep::optional(
                "TapeAlert flags",
                CommandSpec::new("tapeinfo").args(["-f", device]),
            ),
        ],
        ProbeKind::Position => vec![ProbeStep::required("Current position", mt("tell"))],
        ProbeKind::HardwareInfo => vec![
            ProbeStep::required("SCSI inquiry", CommandSpec::new("sg_inq").arg(device)),
            ProbeStep::optional("Drive serial", sg("sg_vpd", &["-p", "sn"])),
        ],
        ProbeKind::LoadUnload => vec![
            ProbeStep::required("Unload tape", mt("offline")),
            ProbeStep::required("Load tape", mt("load")),
            ProbeStep::required("Check status", mt("status")),
        ],
        ProbeKind::SeekPerformance => vec![
            ProbeStep::required("Rewind to beginning", mt("rewind")),
            ProbeStep::optional("Seek forward 1000 filemarks", mt("fsf").arg("1000")),
            ProbeStep::optional("Check position", mt("tell")),
            ProbeStep::optional("Seek backward 500 filemarks", mt("bsf").arg("500")),
            ProbeStep::optional("Check position", mt("tell")),
            ProbeStep::required("Return to beginning", mt("rewind")),
        ],
        ProbeKind::LogPages => LOG_PAGES
            .iter()
            .map(|page| ProbeStep::optional("Log page", sg("sg_logs", &["-p", *page])))
            .collect(),
        ProbeKind::ErrorStats => vec![
            ProbeStep::optional("Error counter log", sg("sg_logs", &["-p", "0x03"])),
            ProbeStep::optional("TapeAlert log", sg("sg_logs", &["-p", "0x2e"])),
        ],
        ProbeKind::Firmware => vec![
            ProbeStep::required("Standard inquiry", CommandSpec::new("sg_inq").arg(device)),
            ProbeStep::optional("Unit serial number", sg("sg_inq", &["-p", "0x80"])),
            ProbeStep::optional("Software interface id", sg("sg_inq", &["-p", "0x84"])),
        ],
        ProbeKind::ReadWriteIntegrity => Vec::new(),
    }
}

/// `dd` writing the payload to tape
pub fn write_payload(payload: &Path, device: &str, block_size: u32) -> CommandSpec {
    CommandSpec::new("dd").args([
        format!("if={}", payload.display()),
        format!("of={}", device),
        format!("bs={}", block_size),
    ])
}

/// `dd` reading the payload back from tape
pub fn read_payload(device: &str, readback: &Path, block_size: u32) -> CommandSpec {
    CommandSpec::new("dd").args([
        format!("if={}", device),
        format!("of={}", readback.display()),
        format!("bs={}", block_size),
        format!("count={}", INTEGRITY_PAYLOAD_BYTES / u64::from(block_size.max(1))),
    ])
}

/// Write a deterministic pseudo-random payload; returns its SHA-256
pub fn generate_payload(path: &Path, seed: &[u8]) -> Result<String> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut total = Sha256::new();
    let mut counter: u64 = 0;
    let mut written: u64 = 0;
    while written < INTEGRITY_PAYLOAD_BYTES {
        let block = Sha256::new()
            .chain_update(seed)
            .chain_update(counter.to_le_bytes())
            .finalize();
        out.write_all(&block)?;
        total.update(&block);
        written += block.len() as u64;
        counter += 1;
    }
    out.flush()?;
    Ok(hex::encode(total.finalize()))
}

/// SHA-256 of the first `limit` bytes of a file
pub fn file_digest(path: &Path, limit: u64) -> Result<String> {
    let mut reader = File::open(path)?.take(limit);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
