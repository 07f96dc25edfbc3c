//! Sysfs directory walk for PCI functions.
//!
//! Each entry under the device directory is named with its full
//! `domain:bus:device.function` address and carries `vendor`, `device`, and
//! `numa_node` attribute files. Entries that are not domain 0 or fail to
//! parse are skipped; attribute read failures on an otherwise valid entry
//! are errors, since a half-read descriptor would misidentify a card.

use std::fs;
use std::path::Path;

use crate::{PciAddress, PciError, PciFunction, PciId};

/// Scans `root` for PCI functions, sorted by address for stable ordering.
///
/// # Errors
///
/// Fails when `root` cannot be read or a device's identity attributes
/// cannot be parsed.
pub fn scan_bus(root: &Path) -> Result<Vec<PciFunction>, PciError> {
    let entries = fs::read_dir(root).map_err(|source| PciError::Scan {
        path: root.to_path_buf(),
        source,
    })?;

    let mut functions = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| PciError::Scan {
            path: root.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Ok(address) = name.parse::<PciAddress>() else {
            // Non-zero domain or unrelated directory entry.
            continue;
        };

        let path = entry.path();
        let vendor = read_hex_attribute(&path, "vendor", address)?;
        let device = read_hex_attribute(&path, "device", address)?;
        let numa_node = read_numa_node(&path);

        functions.push(PciFunction {
            address,
            id: PciId { vendor, device },
            numa_node,
            sysfs_path: path,
        });
    }

    functions.sort_by_key(|f| f.address);
    Ok(functions)
}

/// Reads a `0x`-prefixed hex attribute file such as `vendor` or `device`.
fn read_hex_attribute(
    dir: &Path,
    attribute: &'static str,
    address: PciAddress,
) -> Result<u16, PciError> {
    let wrap = |source| PciError::Attribute {
        address,
        attribute,
        source,
    };
    let text = fs::read_to_string(dir.join(attribute)).map_err(wrap)?;
    let trimmed = text.trim().trim_start_matches("0x");
    u16::from_str_radix(trimmed, 16).map_err(|_| {
        wrap(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unparseable value {trimmed:?}"),
        ))
    })
}

/// Reads `numa_node`, defaulting to -1 when absent (non-NUMA host).
fn read_numa_node(dir: &Path) -> i32 {
    fs::read_to_string(dir.join("numa_node"))
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn write_device(root: &Path, name: &str, vendor: &str, device: &str, numa: Option<&str>) {
        let dir = root.join(name);
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("vendor"), vendor).unwrap();
        fs::write(dir.join("device"), device).unwrap();
        if let Some(numa) = numa {
            fs::write(dir.join("numa_node"), numa).unwrap();
        }
        File::create(dir.join("resource0"))
            .unwrap()
            .write_all(&[0u8; 16])
            .unwrap();
    }

    #[test]
    fn scan_finds_devices_in_stable_order() {
        let tmp = tempfile::tempdir().unwrap();
        write_device(tmp.path(), "0000:42:00.0", "0x1172\n", "0xe001\n", Some("1\n"));
        write_device(tmp.path(), "0000:03:00.0", "0x10dc\n", "0x0033\n", None);
        // Non-zero domain entries are ignored.
        write_device(tmp.path(), "0001:00:00.0", "0x8086\n", "0x1234\n", None);

        let found = scan_bus(tmp.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].address.to_string(), "03:00.0");
        assert_eq!(found[0].id, PciId { vendor: 0x10dc, device: 0x0033 });
        assert_eq!(found[0].numa_node, -1);
        assert_eq!(found[1].address.to_string(), "42:00.0");
        assert_eq!(found[1].numa_node, 1);
    }

    #[test]
    fn scan_rejects_bad_attributes() {
        let tmp = tempfile::tempdir().unwrap();
        write_device(tmp.path(), "0000:01:00.0", "not-hex\n", "0x0033\n", None);
        assert!(matches!(
            scan_bus(tmp.path()),
            Err(PciError::Attribute { attribute: "vendor", .. })
        ));
    }

    #[test]
    fn bar_size_reads_resource_length() {
        let tmp = tempfile::tempdir().unwrap();
        write_device(tmp.path(), "0000:01:00.0", "0x10dc\n", "0x0033\n", None);
        let found = scan_bus(tmp.path()).unwrap();
        assert_eq!(found[0].bar_size(0).unwrap(), 16);
        assert!(found[0].bar_size(5).is_err());
    }
}
