//! GBT link configuration: mux, TX/RX mode, loopback, calibration.
//!
//! Links are addressed through their transceiver register block inside the
//! wrapper/bank hierarchy; this module flattens the addressing so callers
//! only deal in link ids.

use super::bar::CruBar;
use super::regs;
use crate::error::Result;
use crate::types::{GbtMode, GbtMux};

/// Links per bank on current wrapper configurations.
const LINKS_PER_BANK: u32 = 6;

/// Banks per wrapper.
const BANKS_PER_WRAPPER: u32 = 6;

/// GBT operations over a CRU BAR 2.
pub struct Gbt<'a> {
    bar: &'a CruBar,
}

impl<'a> Gbt<'a> {
    /// Creates the accessor.
    #[must_use]
    pub fn new(bar: &'a CruBar) -> Self {
        Self { bar }
    }

    /// Register block base of `link`'s transceiver.
    fn xcvr_base(link: u32) -> usize {
        let wrapper = link / (LINKS_PER_BANK * BANKS_PER_WRAPPER);
        let bank = (link / LINKS_PER_BANK) % BANKS_PER_WRAPPER;
        let local = link % LINKS_PER_BANK;
        regs::wrapper_base(wrapper)
            + regs::GBT_WRAPPER_BANK_OFFSET * (bank as usize + 1)
            + regs::GBT_BANK_LINK_OFFSET * (local as usize + 1)
            + regs::GBT_LINK_XCVR_OFFSET
    }

    /// Selects the downlink mux of `link`.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn set_mux(&self, link: u32, mux: GbtMux) -> Result<()> {
        let code = match mux {
            GbtMux::Ttc => 0x0,
            GbtMux::Ddg => 0x1,
            GbtMux::Sc => 0x2,
        };
        // Two selector bits per link, packed into the shared mux register.
        let lsb = (link % 16) * 2;
        let offset = regs::GBT_MUX_SELECT + (link as usize / 16) * 4;
        self.bar.modify(offset, lsb, 2, code)
    }

    /// Reads back the downlink mux of `link`.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn mux(&self, link: u32) -> Result<GbtMux> {
        let lsb = (link % 16) * 2;
        let offset = regs::GBT_MUX_SELECT + (link as usize / 16) * 4;
        Ok(match (self.bar.read(offset)? >> lsb) & 0x3 {
            0x1 => GbtMux::Ddg,
            0x2 => GbtMux::Sc,
            _ => GbtMux::Ttc,
        })
    }

    /// Routes the link's own pattern generator into the TX path.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn set_internal_data_generator(&self, link: u32, enabled: bool) -> Result<()> {
        let base = Self::xcvr_base(link);
        self.bar.modify(
            base + regs::GBT_LINK_SOURCE_SELECT,
            1,
            2,
            if enabled { 0x3 } else { 0x0 },
        )
    }

    /// Sets the TX framing mode of `link`.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn set_tx_mode(&self, link: u32, mode: GbtMode) -> Result<()> {
        let base = Self::xcvr_base(link);
        self.bar.modify(
            base + regs::GBT_LINK_TX_CONTROL_OFFSET,
            8,
            1,
            mode_bit(mode),
        )
    }

    /// Sets the RX framing mode of `link`.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn set_rx_mode(&self, link: u32, mode: GbtMode) -> Result<()> {
        let base = Self::xcvr_base(link);
        self.bar.modify(
            base + regs::GBT_LINK_RX_CONTROL_OFFSET,
            8,
            1,
            mode_bit(mode),
        )
    }

    /// Enables or disables transceiver-level loopback on `link`.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn set_loopback(&self, link: u32, enabled: bool) -> Result<()> {
        let base = Self::xcvr_base(link);
        self.bar.modify(
            base + regs::GBT_LINK_RX_CONTROL_OFFSET,
            4,
            1,
            u32::from(enabled),
        )
    }

    /// Calibrates the wrapper ATX PLLs feeding the transceivers.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn calibrate(&self) -> Result<()> {
        for wrapper in 0..2u32 {
            let base = regs::wrapper_base(wrapper) + regs::GBT_WRAPPER_ATX_PLL;
            self.bar.write(base, 0x2)?;
            self.bar.modify(base + 0x100, 1, 1, 0x1)?;
            self.bar.write(base, 0x1)?;
        }
        Ok(())
    }

    /// Number of wrappers whose clock is running.
    ///
    /// A wrapper counts as present when its free-running clock counter
    /// advances between two reads.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn wrapper_count(&self) -> Result<u32> {
        let mut count = 0;
        for wrapper in 0..2u32 {
            let offset = regs::wrapper_base(wrapper)
                + regs::GBT_WRAPPER_GREGS
                + regs::GBT_WRAPPER_CLOCK_COUNTER;
            let first = self.bar.read(offset)?;
            let second = self.bar.read(offset)?;
            if first != second {
                count += 1;
            }
        }
        Ok(count)
    }
}

fn mode_bit(mode: GbtMode) -> u32 {
    match mode {
        GbtMode::Gbt => 0x0,
        GbtMode::Wb => 0x1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocard_mmio::BarRegion;

    fn bar2() -> CruBar {
        CruBar::new(BarRegion::anonymous(0x800000, 2))
    }

    #[test]
    fn mux_roundtrip_per_link() {
        let bar = bar2();
        let gbt = Gbt::new(&bar);
        gbt.set_mux(0, GbtMux::Ddg).unwrap();
        gbt.set_mux(3, GbtMux::Sc).unwrap();
        assert_eq!(gbt.mux(0).unwrap(), GbtMux::Ddg);
        assert_eq!(gbt.mux(3).unwrap(), GbtMux::Sc);
        // Untouched links stay on the default.
        assert_eq!(gbt.mux(1).unwrap(), GbtMux::Ttc);
    }

    #[test]
    fn xcvr_bases_are_distinct_per_link() {
        let a = Gbt::xcvr_base(0);
        let b = Gbt::xcvr_base(1);
        let c = Gbt::xcvr_base(6);
        let d = Gbt::xcvr_base(18);
        assert!(a != b && b != c && c != d);
        // Links beyond the first wrapper land in wrapper 1 space.
        assert!(Gbt::xcvr_base(36) >= regs::WRAPPER1);
    }

    #[test]
    fn loopback_and_mode_touch_separate_bits() {
        let bar = bar2();
        let gbt = Gbt::new(&bar);
        gbt.set_rx_mode(2, GbtMode::Wb).unwrap();
        gbt.set_loopback(2, true).unwrap();
        let reg = bar
            .region()
            .read32(Gbt::xcvr_base(2) + regs::GBT_LINK_RX_CONTROL_OFFSET)
            .unwrap();
        assert_eq!(reg & (1 << 8), 1 << 8);
        assert_eq!(reg & (1 << 4), 1 << 4);
        gbt.set_loopback(2, false).unwrap();
        let reg = bar
            .region()
            .read32(Gbt::xcvr_base(2) + regs::GBT_LINK_RX_CONTROL_OFFSET)
            .unwrap();
        assert_eq!(reg & (1 << 8), 1 << 8);
        assert_eq!(reg & (1 << 4), 0);
    }

    #[test]
    fn wrapper_count_is_zero_on_static_counters() {
        let bar = bar2();
        let gbt = Gbt::new(&bar);
        assert_eq!(gbt.wrapper_count().unwrap(), 0);
    }
}
