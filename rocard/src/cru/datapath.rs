//! Datapath wrapper configuration: link enables, forwarding mode, flow
//! control, packet arbitration.
//!
//! Links 0–15 belong to datapath wrapper 0, links 16–31 to wrapper 1; each
//! wrapper's enable register holds one bit per local link.

use super::bar::CruBar;
use super::regs;
use crate::error::Result;
use crate::types::DatapathMode;

/// Raw-mode maximum length field programmed with the datapath mode.
const RAW_MAX_LEN: u32 = 0x1fc;

/// Datapath wrapper operations over a CRU BAR 2.
pub struct DatapathWrapper<'a> {
    bar: &'a CruBar,
}

impl<'a> DatapathWrapper<'a> {
    /// Creates the accessor.
    #[must_use]
    pub fn new(bar: &'a CruBar) -> Self {
        Self { bar }
    }

    fn split(link: u32) -> (u32, u32) {
        (link / 16, link % 16)
    }

    /// Programs one wrapper's whole link-enable register.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn set_links_enabled(&self, dwrapper: u32, mask: u32) -> Result<()> {
        self.bar
            .write(regs::dwrapper_base(dwrapper) + regs::DWRAPPER_ENREG, mask)
    }

    /// Enables or disables a single link.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn set_link_enabled(&self, link: u32, enabled: bool) -> Result<()> {
        let (dwrapper, local) = Self::split(link);
        self.bar.modify(
            regs::dwrapper_base(dwrapper) + regs::DWRAPPER_ENREG,
            local,
            1,
            u32::from(enabled),
        )
    }

    /// Whether the datapath forwards `link`.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn link_enabled(&self, link: u32) -> Result<bool> {
        let (dwrapper, local) = Self::split(link);
        let reg = self
            .bar
            .read(regs::dwrapper_base(dwrapper) + regs::DWRAPPER_ENREG)?;
        Ok(reg & (1 << local) != 0)
    }

    fn link_control_offset(link: u32) -> usize {
        let (dwrapper, local) = Self::split(link);
        regs::dwrapper_base(dwrapper)
            + regs::DATAPATHLINK_OFFSET
            + regs::DATALINK_OFFSET * local as usize
            + regs::DATALINK_CONTROL
    }

    /// Sets the forwarding mode of `link`.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn set_datapath_mode(&self, link: u32, mode: DatapathMode) -> Result<()> {
        let mode_bit = match mode {
            DatapathMode::Packet => 0x1u32,
            DatapathMode::Streaming => 0x0,
        };
        self.bar
            .write(Self::link_control_offset(link), RAW_MAX_LEN | (mode_bit << 31))
    }

    /// Reads back the forwarding mode of `link`.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn datapath_mode(&self, link: u32) -> Result<DatapathMode> {
        let reg = self.bar.read(Self::link_control_offset(link))?;
        Ok(if reg >> 31 == 0x1 {
            DatapathMode::Packet
        } else {
            DatapathMode::Streaming
        })
    }

    /// Programs the packet arbitration mode on both wrappers.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn set_packet_arbitration(&self, mode: u32) -> Result<()> {
        for dwrapper in 0..2u32 {
            self.bar.write(
                regs::dwrapper_base(dwrapper) + regs::DWRAPPER_DATAGEN_CONTROL,
                mode << 15,
            )?;
        }
        Ok(())
    }

    /// Programs the flow control of one wrapper.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn set_flow_control(&self, dwrapper: u32, allow_rejection: bool) -> Result<()> {
        self.bar.write(
            regs::dwrapper_base(dwrapper)
                + regs::FLOW_CONTROL_OFFSET
                + regs::FLOW_CONTROL_REGISTER,
            u32::from(allow_rejection),
        )
    }

    /// Per-link accepted-packet counter (used by the packet monitor).
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn accepted_packets(&self, link: u32) -> Result<u32> {
        self.bar.read(Self::link_control_offset(link) + 0x4)
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
    fn link_enable_bits_are_per_wrapper() {
        let bar = bar2();
        let dp = DatapathWrapper::new(&bar);
        dp.set_link_enabled(0, true).unwrap();
        dp.set_link_enabled(17, true).unwrap();

        assert!(dp.link_enabled(0).unwrap());
        assert!(!dp.link_enabled(1).unwrap());
        assert!(dp.link_enabled(17).unwrap());

        let w0 = bar.region().read32(regs::DWRAPPER_BASE0).unwrap();
        let w1 = bar.region().read32(regs::DWRAPPER_BASE1).unwrap();
        assert_eq!(w0, 1);
        assert_eq!(w1, 1 << 1);

        dp.set_link_enabled(0, false).unwrap();
        assert!(!dp.link_enabled(0).unwrap());
    }

    #[test]
    fn datapath_mode_roundtrip() {
        let bar = bar2();
        let dp = DatapathWrapper::new(&bar);
        dp.set_datapath_mode(4, DatapathMode::Packet).unwrap();
        assert_eq!(dp.datapath_mode(4).unwrap(), DatapathMode::Packet);
        dp.set_datapath_mode(4, DatapathMode::Streaming).unwrap();
        assert_eq!(dp.datapath_mode(4).unwrap(), DatapathMode::Streaming);
    }

    #[test]
    fn whole_mask_write_hits_enable_register() {
        let bar = bar2();
        let dp = DatapathWrapper::new(&bar);
        dp.set_links_enabled(0, 0x00ff).unwrap();
        dp.set_links_enabled(1, 0x0003).unwrap();
        assert_eq!(bar.region().read32(regs::DWRAPPER_BASE0).unwrap(), 0xff);
        assert_eq!(bar.region().read32(regs::DWRAPPER_BASE1).unwrap(), 0x3);
    }
}
