//! PCI sysfs enumeration and BAR resource mapping.
//!
//! Walks `/sys/bus/pci/devices`, reads vendor/device identity and NUMA
//! placement, and maps `resource<N>` nodes into [`BarRegion`]s. This crate
//! knows nothing about any specific card; identification policy lives in the
//! driver core.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rocard_mmio::BarRegion;

mod sysfs;

pub use sysfs::scan_bus;

/// Default sysfs directory listing every PCI function on the host.
pub const SYSFS_PCI_DEVICES: &str = "/sys/bus/pci/devices";

/// Errors from PCI enumeration and BAR mapping.
#[derive(Debug, thiserror::Error)]
pub enum PciError {
    /// A BDF string did not parse.
    #[error("malformed PCI address {input:?} (expected [domain:]bus:device.function)")]
    MalformedAddress {
        /// The rejected input.
        input: String,
    },
    /// A sysfs attribute was missing or unreadable.
    #[error("failed to read sysfs attribute {attribute} of {address}")]
    Attribute {
        /// The device the attribute belongs to.
        address: PciAddress,
        /// Attribute file name.
        attribute: &'static str,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The requested BAR resource does not exist or cannot be mapped.
    #[error("failed to map BAR {bar} of {address}")]
    BarMapping {
        /// The device owning the BAR.
        address: PciAddress,
        /// BAR index.
        bar: u32,
        /// Underlying error.
        #[source]
        source: rocard_mmio::MmioError,
    },
    /// Scanning the device directory failed.
    #[error("failed to scan PCI device directory {path}")]
    Scan {
        /// Directory that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A PCI geographical address (bus:device.function).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PciAddress {
    /// Bus number (0-255).
    pub bus: u8,
    /// Device number (0-31).
    pub device: u8,
    /// Function number (0-7).
    pub function: u8,
}

impl PciAddress {
    /// Creates an address from its components.
    #[must_use]
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self { bus, device, function }
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{}", self.bus, self.device, self.function)
    }
}

impl FromStr for PciAddress {
    type Err = PciError;

    /// Parses `bus:device.function`, optionally prefixed with a 16-bit
    /// domain (`0000:42:00.0`). Only domain 0 is supported.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PciError::MalformedAddress { input: s.to_string() };

        let mut parts: Vec<&str> = s.split(':').collect();
        if parts.len() == 3 {
            // Leading domain; the driver only handles domain 0.
            let domain = u16::from_str_radix(parts[0], 16).map_err(|_| malformed())?;
            if domain != 0 {
                return Err(malformed());
            }
            parts.remove(0);
        }
        if parts.len() != 2 {
            return Err(malformed());
        }
        let bus = u8::from_str_radix(parts[0], 16).map_err(|_| malformed())?;
        let (dev, func) = parts[1].split_once('.').ok_or_else(malformed)?;
        let device = u8::from_str_radix(dev, 16).map_err(|_| malformed())?;
        let function = u8::from_str_radix(func, 16).map_err(|_| malformed())?;
        if device > 31 || function > 7 {
            return Err(malformed());
        }
        Ok(Self { bus, device, function })
    }
}

/// PCI vendor/device identity pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciId {
    /// Vendor ID.
    pub vendor: u16,
    /// Device ID.
    pub device: u16,
}

impl fmt::Display for PciId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor, self.device)
    }
}

/// One PCI function found on the bus.
#[derive(Debug, Clone)]
pub struct PciFunction {
    /// Geographical address.
    pub address: PciAddress,
    /// Vendor/device identity.
    pub id: PciId,
    /// NUMA node the device is attached to (-1 if unknown).
    pub numa_node: i32,
    /// The device's sysfs directory.
    pub sysfs_path: PathBuf,
}

impl PciFunction {
    /// Maps BAR `index` of this function via its `resource<N>` node.
    ///
    /// # Errors
    ///
    /// Fails when the resource node is absent, the open is denied, or the
    /// mapping syscall fails.
    pub fn map_bar(&self, index: u32) -> Result<BarRegion, PciError> {
        let path = self.sysfs_path.join(format!("resource{index}"));
        let wrap = |source| PciError::BarMapping {
            address: self.address,
            bar: index,
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| wrap(rocard_mmio::MmioError::Map(e)))?;
        let size = file
            .metadata()
            .map_err(|e| wrap(rocard_mmio::MmioError::Map(e)))?
            .len() as usize;
        BarRegion::from_file(&file, size, index).map_err(wrap)
    }

    /// Returns the size in bytes of BAR `index`, without mapping it.
    ///
    /// # Errors
    ///
    /// Fails when the resource node cannot be stat'ed.
    pub fn bar_size(&self, index: u32) -> Result<usize, PciError> {
        let path = self.sysfs_path.join(format!("resource{index}"));
        let meta = fs::metadata(&path).map_err(|source| PciError::Attribute {
            address: self.address,
            attribute: "resource",
            source,
        })?;
        Ok(meta.len() as usize)
    }
}

/// Scans the default sysfs location for PCI functions, in stable
/// (address-sorted) order.
///
/// # Errors
///
/// Fails when the device directory cannot be read.
pub fn scan() -> Result<Vec<PciFunction>, PciError> {
    scan_bus(Path::new(SYSFS_PCI_DEVICES))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parse_and_display() {
        let addr: PciAddress = "42:00.0".parse().unwrap();
        assert_eq!(addr, PciAddress::new(0x42, 0, 0));
        assert_eq!(addr.to_string(), "42:00.0");

        let with_domain: PciAddress = "0000:3b:1f.7".parse().unwrap();
        assert_eq!(with_domain, PciAddress::new(0x3b, 0x1f, 7));
    }

    #[test]
    fn address_parse_rejects_garbage() {
        for input in ["", "zz:00.0", "42:00", "42.00.0", "0001:42:00.0", "42:20.0", "42:00.8"] {
            assert!(
                input.parse::<PciAddress>().is_err(),
                "accepted {input:?}"
            );
        }
    }

    #[test]
    fn address_ordering_is_geographical() {
        let a: PciAddress = "03:00.0".parse().unwrap();
        let b: PciAddress = "42:00.0".parse().unwrap();
        let c: PciAddress = "42:00.1".parse().unwrap();
        assert!(a < b && b < c);
    }
}
