//! Drive inventory export

use crate::device::{DeviceNode, DriveProfile};
use crate::error::Result;
use serde::Serialize;
use std::io;
use std::path::Path;
use tracing::info;

#[derive(Debug, Serialize)]
struct InventoryRow<'a> {
    device: &'a str,
    kind: &'static str,
    reachable: bool,
    vendor: &'a str,
    model: &'a str,
    serial: &'a str,
    generation: &'a str,
    block_size: Option<u32>,
}

/// Write one CSV row per node; `profiles` pairs with `nodes` by index
pub fn write_csv(
    path: &Path,
    nodes: &[DeviceNode],
    profiles: &[Option<DriveProfile>],
) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| io_error(path, e))?;

    for (index, node) in nodes.iter().enumerate() {
        let profile = profiles.get(index).and_then(Option::as_ref);
        let row = InventoryRow {
            device: &node.path,
            kind: node.kind.label(),
            reachable: node.reachable,
            vendor: profile.map(|p| p.vendor.as_str()).unwrap_or(""),
            model: profile.map(|p| p.model.as_str()).unwrap_or(""),
            serial: profile.and_then(|p| p.serial.as_deref()).unwrap_or(""),
            generation: profile.and_then(|p| p.generation.as_deref()).unwrap_or(""),
            block_size: profile.map(|p| p.block_size),
        };
        writer.serialize(row).map_err(|e| io_error(path, e))?;
    }
    writer.flush()?;

    info!("Wrote {} inventory rows to {}", nodes.len(), path.display());
    Ok(nodes.len())
}

/// CSV failures here are file I/O failures; keep the kind, add the path
fn io_error(path: &Path, err: csv::Error) -> io::Error {
    let err = io::Error::from(err);
    io::Error::new(err.kind(), format!("inventory file {}: {}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;
    use crate::error::LtfsError;

    #[test]
    fn test_inventory_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.csv");
        let nodes = vec![
            DeviceNode::new("/dev/st0", DeviceKind::Primary, true),
            DeviceNode::new("/dev/nst0", DeviceKind::NonRewinding, false),
        ];
        let mut profile = DriveProfile::default_for("IBM", "ULT3580-TD5");
        profile.serial = Some("1068000123".into());
        let written = write_csv(&path, &nodes, &[Some(profile), None]).unwrap();
        assert_eq!(written, 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "device,kind,reachable,vendor,model,serial,generation,block_size"
        );
        assert_eq!(lines[1], "/dev/st0,primary,true,IBM,ULT3580-TD5,1068000123,LTO-5,524288");
        assert_eq!(lines[2], "/dev/nst0,non-rewinding,false,,,,,");
    }

    #[test]
    fn test_unwritable_inventory_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("inventory.csv");
        let nodes = vec![DeviceNode::new("/dev/st0", DeviceKind::Primary, true)];
        let err = write_csv(&path, &nodes, &[None]).unwrap_err();
        match err {
            LtfsError::Io(e) => {
                assert_eq!(e.kind(), io::ErrorKind::NotFound);
                assert!(e.to_string().contains("inventory.csv"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
