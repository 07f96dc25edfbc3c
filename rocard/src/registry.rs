//! Card enumeration and identification.
//!
//! Turns the sysfs PCI scan into [`CardDescriptor`]s for the known readout
//! card types and resolves every [`CardId`] form to exactly one device.
//! The scan state lives in a shared hub: it is built lazily on first use,
//! kept alive by every handle produced from it, and torn down when the last
//! reference goes away.

use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use rocard_mmio::BarRegion;
use rocard_pci::{PciAddress, PciFunction, PciId};

use crate::crorc::CrorcBar;
use crate::cru::CruBar;
use crate::error::{Error, Result};
use crate::parameters::CardId;
use crate::types::{CardType, SerialId};

/// PCI identity of the C-RORC.
pub const CRORC_PCI_ID: PciId = PciId {
    vendor: 0x10dc,
    device: 0x0033,
};

/// PCI identity of the CRU (Altera-based).
pub const CRU_PCI_ID: PciId = PciId {
    vendor: 0x1172,
    device: 0xe001,
};

/// Everything enumeration knows about one card.
#[derive(Debug, Clone)]
pub struct CardDescriptor {
    /// Which family the card belongs to.
    pub card_type: CardType,
    /// Serial number and endpoint (serial −1 when unreadable).
    pub serial_id: SerialId,
    /// PCI vendor/device identity.
    pub pci_id: PciId,
    /// PCI geographical address.
    pub pci_address: PciAddress,
    /// NUMA node the card is attached to (−1 when unknown).
    pub numa_node: i32,
}

/// Cached PCI scan shared between registries and device handles.
#[derive(Debug)]
struct Hub {
    functions: Vec<PciFunction>,
}

/// Process-wide hub slot; re-scanned when every user is gone.
static HUB: Mutex<Weak<Hub>> = Mutex::new(Weak::new());

/// Entry point for finding and opening readout cards.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    hub: Arc<Hub>,
}

/// A resolved card. Keeps the registry's scan state alive.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    _hub: Arc<Hub>,
    descriptor: CardDescriptor,
    function: PciFunction,
}

impl DeviceRegistry {
    /// Opens the registry over the host's PCI bus, reusing the live scan
    /// if another registry or handle still holds it.
    ///
    /// # Errors
    ///
    /// Fails when the sysfs scan fails.
    pub fn open() -> Result<Self> {
        let mut slot = HUB.lock().expect("hub mutex poisoned");
        if let Some(hub) = slot.upgrade() {
            return Ok(Self { hub });
        }
        let hub = Arc::new(Hub {
            functions: rocard_pci::scan()?,
        });
        *slot = Arc::downgrade(&hub);
        Ok(Self { hub })
    }

    /// Opens a registry over an explicit sysfs-style directory (tests and
    /// diagnostics). Not cached in the process-wide slot.
    ///
    /// # Errors
    ///
    /// Fails when the directory scan fails.
    pub fn open_at(root: &Path) -> Result<Self> {
        Ok(Self {
            hub: Arc::new(Hub {
                functions: rocard_pci::scan_bus(root)?,
            }),
        })
    }

    /// Readout-card functions in stable scan order.
    fn card_functions(&self) -> impl Iterator<Item = (&PciFunction, CardType)> {
        self.hub.functions.iter().filter_map(|function| {
            let card_type = match function.id {
                id if id == CRORC_PCI_ID => CardType::Crorc,
                id if id == CRU_PCI_ID => CardType::Cru,
                _ => return None,
            };
            Some((function, card_type))
        })
    }

    /// Describes every readout card on the host, in stable order.
    ///
    /// # Errors
    ///
    /// Propagates `InvalidSerial` when a CRU reports the all-ones serial;
    /// unreadable BARs degrade to serial −1 with a warning.
    pub fn enumerate(&self) -> Result<Vec<CardDescriptor>> {
        self.card_functions()
            .map(|(function, card_type)| describe(function, card_type))
            .collect()
    }

    /// Resolves `card_id` to exactly one card.
    ///
    /// # Errors
    ///
    /// `CardNotFound` when nothing matches, `AmbiguousCardId` when more
    /// than one card matches a serial, and identification errors.
    pub fn find(&self, card_id: &CardId) -> Result<DeviceHandle> {
        let matches: Vec<(usize, &PciFunction, CardType)> = self
            .card_functions()
            .enumerate()
            .map(|(sequence, (function, card_type))| (sequence, function, card_type))
            .collect();

        let mut resolved: Vec<(&PciFunction, CardDescriptor)> = Vec::new();
        for (sequence, function, card_type) in matches {
            let hit = match card_id {
                CardId::Sequence(n) => *n as usize == sequence,
                CardId::Address(address) => function.address == *address,
                CardId::Serial(_) => true,
            };
            if !hit {
                continue;
            }
            let descriptor = describe(function, card_type)?;
            if let CardId::Serial(wanted) = card_id {
                if descriptor.serial_id != *wanted {
                    continue;
                }
            }
            resolved.push((function, descriptor));
        }

        match resolved.len() {
            0 => Err(Error::CardNotFound {
                card_id: card_id.to_string(),
            }),
            1 => {
                let (function, descriptor) = resolved.into_iter().next().expect("length checked");
                Ok(DeviceHandle {
                    _hub: Arc::clone(&self.hub),
                    descriptor,
                    function: function.clone(),
                })
            }
            count => Err(Error::AmbiguousCardId {
                card_id: card_id.to_string(),
                count,
            }),
        }
    }
}

impl DeviceHandle {
    /// The card's descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &CardDescriptor {
        &self.descriptor
    }

    /// Maps one of the card's BARs.
    ///
    /// # Errors
    ///
    /// Propagates the mapping failure.
    pub fn bar(&self, index: u32) -> Result<BarRegion> {
        Ok(self.function.map_bar(index)?)
    }
}

/// Builds the descriptor for one function, reading serial and endpoint
/// from the card's BARs.
///
/// Identification policy: the CRU serial lives on BAR 2 and its endpoint
/// on BAR 0; the CRORC serial lives in BAR 0 flash and its endpoint is
/// always 0. A CRU serial of all-ones is a hardware fault.
fn describe(function: &PciFunction, card_type: CardType) -> Result<CardDescriptor> {
    let serial_id = match card_type {
        CardType::Cru => cru_serial_id(function)?,
        CardType::Crorc => crorc_serial_id(function),
        CardType::Dummy => SerialId::new(-1, 0),
    };
    Ok(CardDescriptor {
        card_type,
        serial_id,
        pci_id: function.id,
        pci_address: function.address,
        numa_node: function.numa_node,
    })
}

fn cru_serial_id(function: &PciFunction) -> Result<SerialId> {
    let serial = match function.map_bar(2) {
        Ok(region) => match CruBar::new(region).serial_number() {
            Ok(serial) => serial as i32,
            Err(Error::InvalidSerial) => return Err(Error::InvalidSerial),
            Err(err) => {
                log::warn!("could not read CRU serial of {}: {err}", function.address);
                -1
            }
        },
        Err(err) => {
            log::warn!("could not map BAR 2 of {}: {err}", function.address);
            -1
        }
    };
    let endpoint = function
        .map_bar(0)
        .ok()
        .and_then(|region| CruBar::new(region).endpoint_number().ok())
        .unwrap_or(0);
    Ok(SerialId::new(serial, endpoint))
}

fn crorc_serial_id(function: &PciFunction) -> SerialId {
    let serial = function
        .map_bar(0)
        .ok()
        .and_then(|region| CrorcBar::new(region).serial().ok().flatten())
        .unwrap_or(-1);
    SerialId::new(serial, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{Seek, SeekFrom, Write};

    /// Lays out a fake sysfs device with BAR resource files.
    fn write_device(root: &Path, name: &str, id: PciId, bars: &[(u32, u64)]) {
        let dir = root.join(name);
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("vendor"), format!("0x{:04x}\n", id.vendor)).unwrap();
        fs::write(dir.join("device"), format!("0x{:04x}\n", id.device)).unwrap();
        fs::write(dir.join("numa_node"), "0\n").unwrap();
        for (index, size) in bars {
            let file = fs::File::create(dir.join(format!("resource{index}"))).unwrap();
            file.set_len(*size).unwrap();
        }
    }

    /// Writes a CRU serial into the fake BAR 2 resource file.
    fn write_cru_serial(root: &Path, name: &str, serial: u32) {
        let path = root.join(name).join("resource2");
        let mut file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.seek(SeekFrom::Start(crate::cru::regs::SERIAL_NUMBER as u64))
            .unwrap();
        file.write_all(&serial.to_le_bytes()).unwrap();
    }

    const CRU_BARS: &[(u32, u64)] = &[(0, 0x1000), (2, 0x800000)];

    #[test]
    fn enumerate_identifies_card_types() {
        let tmp = tempfile::tempdir().unwrap();
        write_device(tmp.path(), "0000:03:00.0", CRORC_PCI_ID, &[(0, 0x1000)]);
        write_device(tmp.path(), "0000:42:00.0", CRU_PCI_ID, CRU_BARS);
        write_cru_serial(tmp.path(), "0000:42:00.0", 1041);
        // Unrelated devices are ignored.
        write_device(
            tmp.path(),
            "0000:00:1f.0",
            PciId { vendor: 0x8086, device: 0x1234 },
            &[],
        );

        let registry = DeviceRegistry::open_at(tmp.path()).unwrap();
        let cards = registry.enumerate().unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].card_type, CardType::Crorc);
        // The CRORC flash on a zeroed BAR yields no serial.
        assert_eq!(cards[0].serial_id.serial, -1);
        assert_eq!(cards[1].card_type, CardType::Cru);
        assert_eq!(cards[1].serial_id, SerialId::new(1041, 0));
        assert_eq!(cards[1].numa_node, 0);
    }

    #[test]
    fn find_by_each_identifier_form() {
        let tmp = tempfile::tempdir().unwrap();
        write_device(tmp.path(), "0000:42:00.0", CRU_PCI_ID, CRU_BARS);
        write_cru_serial(tmp.path(), "0000:42:00.0", 1041);

        let registry = DeviceRegistry::open_at(tmp.path()).unwrap();

        let by_sequence = registry.find(&CardId::Sequence(0)).unwrap();
        assert_eq!(by_sequence.descriptor().serial_id.serial, 1041);

        let by_address = registry
            .find(&CardId::Address("42:00.0".parse().unwrap()))
            .unwrap();
        assert_eq!(by_address.descriptor().card_type, CardType::Cru);

        let by_serial = registry
            .find(&CardId::Serial(SerialId::new(1041, 0)))
            .unwrap();
        assert_eq!(by_serial.descriptor().pci_address.to_string(), "42:00.0");

        assert!(matches!(
            registry.find(&CardId::Sequence(1)),
            Err(Error::CardNotFound { .. })
        ));
        assert!(matches!(
            registry.find(&CardId::Serial(SerialId::new(7, 0))),
            Err(Error::CardNotFound { .. })
        ));
    }

    #[test]
    fn duplicate_serial_is_ambiguous() {
        let tmp = tempfile::tempdir().unwrap();
        write_device(tmp.path(), "0000:42:00.0", CRU_PCI_ID, CRU_BARS);
        write_device(tmp.path(), "0000:43:00.0", CRU_PCI_ID, CRU_BARS);
        write_cru_serial(tmp.path(), "0000:42:00.0", 1041);
        write_cru_serial(tmp.path(), "0000:43:00.0", 1041);

        let registry = DeviceRegistry::open_at(tmp.path()).unwrap();
        assert!(matches!(
            registry.find(&CardId::Serial(SerialId::new(1041, 0))),
            Err(Error::AmbiguousCardId { count: 2, .. })
        ));
        // Addresses still resolve uniquely.
        registry
            .find(&CardId::Address("43:00.0".parse().unwrap()))
            .unwrap();
    }

    #[test]
    fn all_ones_cru_serial_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        write_device(tmp.path(), "0000:42:00.0", CRU_PCI_ID, CRU_BARS);
        write_cru_serial(tmp.path(), "0000:42:00.0", 0xffff_ffff);

        let registry = DeviceRegistry::open_at(tmp.path()).unwrap();
        assert!(matches!(
            registry.enumerate(),
            Err(Error::InvalidSerial)
        ));
    }
}
