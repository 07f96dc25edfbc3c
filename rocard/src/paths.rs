//! Deterministic filesystem locations for channel state.
//!
//! Lock files, the CRORC ready-FIFO files, and DMA buffer registration
//! markers all live under one state directory so that cleanup tooling can
//! find them by name. The directory defaults to `/var/lib/rocard` and can be
//! redirected with `ROCARD_STATE_DIR`.

use std::path::PathBuf;

use rocard_pci::PciAddress;

/// Environment variable overriding the state directory.
pub const STATE_DIR_ENV: &str = "ROCARD_STATE_DIR";

/// Default state directory.
pub const DEFAULT_STATE_DIR: &str = "/var/lib/rocard";

/// Returns the state directory currently in effect.
#[must_use]
pub fn state_dir() -> PathBuf {
    std::env::var_os(STATE_DIR_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_STATE_DIR), PathBuf::from)
}

/// Subdirectory holding DMA buffer registration markers.
#[must_use]
pub fn buffer_registry_dir() -> PathBuf {
    state_dir().join("buffers")
}

/// The filesystem names belonging to one (card, channel) pair.
///
/// Files are keyed by PCI address because it is always known, also for cards
/// whose serial cannot be read. Names are stable across processes so other
/// tools can discover them; deleting a lock file is safe when no process
/// holds it.
#[derive(Debug, Clone, Copy)]
pub struct ChannelPaths {
    address: PciAddress,
    channel: u32,
}

impl ChannelPaths {
    /// Creates the path set for a channel.
    #[must_use]
    pub fn new(address: PciAddress, channel: u32) -> Self {
        Self { address, channel }
    }

    /// Path of the advisory channel lock file.
    #[must_use]
    pub fn lock(&self) -> PathBuf {
        state_dir().join(format!(
            "rocard_{:02x}_{:02x}_{}_ch{}.lock",
            self.address.bus, self.address.device, self.address.function, self.channel
        ))
    }

    /// Path of the CRORC ready-FIFO shared-memory file.
    #[must_use]
    pub fn fifo(&self) -> PathBuf {
        state_dir().join(format!(
            "rocard_fifo_{:02x}_{:02x}_{}_ch{}",
            self.address.bus, self.address.device, self.address.function, self.channel
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_deterministic_and_distinct() {
        let address: PciAddress = "42:00.0".parse().unwrap();
        let a = ChannelPaths::new(address, 0);
        let b = ChannelPaths::new(address, 1);
        assert_eq!(a.lock(), a.lock());
        assert_ne!(a.lock(), b.lock());
        assert_ne!(a.lock(), a.fifo());
    }
}
