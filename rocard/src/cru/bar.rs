//! Semantic register operations on the CRU.
//!
//! BAR 0 carries the DMA engine and the data generator; BAR 2 carries
//! identity, monitoring, TTC, GBT and the datapath wrappers. Operations that
//! only exist on one BAR assert the index first and fail with
//! `WrongBarForOperation` instead of poking the wrong window.

use rocard_mmio::BarRegion;

use super::regs;
use super::{DatapathWrapper, Gbt, Ttc, DMA_PAGE_SIZE, MAX_LINKS};
use crate::error::{Error, Result};
use crate::parameters::Parameters;
use crate::types::{Clock, DatapathMode, DownstreamData, GbtMode, GbtMux, GeneratorPattern};

/// Feature set advertised by the firmware.
///
/// Standalone (development) firmware images leave out parts of the card;
/// the feature word on BAR 0 says which. Integrated production firmware has
/// everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareFeatures {
    /// True when this is a cut-down standalone firmware.
    pub standalone: bool,
    /// The data source can be selected (generator vs. front-end).
    pub data_selection: bool,
    /// The temperature sensor is wired up.
    pub temperature: bool,
    /// The serial number register is valid.
    pub serial: bool,
    /// Firmware build information registers are valid.
    pub firmware_info: bool,
    /// The FPGA chip id registers are valid.
    pub chip_id: bool,
}

impl FirmwareFeatures {
    /// Decodes the BAR 0 feature word.
    ///
    /// A low half of `0x5afe` marks standalone firmware whose bits 16–19
    /// *disable* data-selection, temperature, serial and firmware-info;
    /// anything else is integrated firmware with the full feature set.
    #[must_use]
    pub fn from_register(word: u32) -> Self {
        if word & 0xffff == 0x5afe {
            let enabled = |bit: u32| word & (1 << bit) == 0;
            Self {
                standalone: true,
                data_selection: enabled(16),
                temperature: enabled(17),
                serial: enabled(18),
                firmware_info: enabled(19),
                chip_id: false,
            }
        } else {
            Self {
                standalone: false,
                data_selection: true,
                temperature: true,
                serial: true,
                firmware_info: true,
                chip_id: true,
            }
        }
    }
}

/// Per-link state as reported by the card.
#[derive(Debug, Clone, Copy)]
pub struct LinkStatus {
    /// Link id.
    pub id: u32,
    /// Whether the datapath forwards this link.
    pub enabled: bool,
    /// Datapath mode the link is configured for.
    pub datapath_mode: DatapathMode,
    /// Downlink mux selection.
    pub gbt_mux: GbtMux,
}

/// Snapshot of the card-level configuration, used by the status tool and to
/// decide whether `reconfigure` can skip the bring-up.
#[derive(Debug, Clone)]
pub struct ReportInfo {
    /// Per-link status for every link on the card.
    pub links: Vec<LinkStatus>,
    /// Selected TTC clock.
    pub clock: Clock,
    /// Selected downstream data source.
    pub downstream_data: DownstreamData,
}

/// A CRU BAR with the card's semantic operations on top.
#[derive(Debug, Clone)]
pub struct CruBar {
    bar: BarRegion,
    clock: Clock,
    datapath_mode: DatapathMode,
    downstream_data: DownstreamData,
    gbt_mode: GbtMode,
    gbt_mux: GbtMux,
    gbt_mux_map: std::collections::BTreeMap<u32, GbtMux>,
    link_mask: std::collections::BTreeSet<u32>,
    link_loopback: bool,
    pon_upstream: bool,
    onu_address: u32,
    allow_rejection: bool,
}

impl CruBar {
    /// Wraps a mapped BAR with default bring-up settings.
    #[must_use]
    pub fn new(bar: BarRegion) -> Self {
        Self {
            bar,
            clock: Clock::Local,
            datapath_mode: DatapathMode::Packet,
            downstream_data: DownstreamData::Ctp,
            gbt_mode: GbtMode::Gbt,
            gbt_mux: GbtMux::Ttc,
            gbt_mux_map: std::collections::BTreeMap::new(),
            link_mask: std::collections::BTreeSet::from([0]),
            link_loopback: false,
            pon_upstream: false,
            onu_address: 0,
            allow_rejection: false,
        }
    }

    /// Wraps a mapped BAR, taking the bring-up settings from `params`.
    #[must_use]
    pub fn with_parameters(bar: BarRegion, params: &Parameters) -> Self {
        let mut this = Self::new(bar);
        if let Some(clock) = params.clock() {
            this.clock = *clock;
        }
        if let Some(mode) = params.datapath_mode() {
            this.datapath_mode = *mode;
        }
        if let Some(data) = params.downstream_data() {
            this.downstream_data = *data;
        }
        if let Some(mode) = params.gbt_mode() {
            this.gbt_mode = *mode;
        }
        if let Some(mux) = params.gbt_mux() {
            this.gbt_mux = *mux;
        }
        if let Some(map) = params.gbt_mux_map() {
            this.gbt_mux_map = map.clone();
        }
        if let Some(mask) = params.link_mask() {
            this.link_mask = mask.clone();
        }
        if let Some(loopback) = params.link_loopback_enabled() {
            this.link_loopback = *loopback;
        }
        if let Some(pon) = params.pon_upstream() {
            this.pon_upstream = *pon;
        }
        if let Some(onu) = params.onu_address() {
            this.onu_address = *onu;
        }
        if let Some(reject) = params.allow_rejection() {
            this.allow_rejection = *reject;
        }
        this
    }

    /// The underlying region (shared with engines and tests).
    #[must_use]
    pub fn region(&self) -> &BarRegion {
        &self.bar
    }

    /// BAR index this accessor operates on.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.bar.index()
    }

    /// BAR size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bar.size()
    }

    pub(crate) fn read(&self, offset: usize) -> Result<u32> {
        self.bar
            .read32(offset)
            .map_err(|e| Error::from_mmio(e, self.bar.index()))
    }

    pub(crate) fn write(&self, offset: usize, value: u32) -> Result<()> {
        self.bar
            .write32(offset, value)
            .map_err(|e| Error::from_mmio(e, self.bar.index()))
    }

    pub(crate) fn modify(&self, offset: usize, lsb: u32, width: u32, value: u32) -> Result<()> {
        self.bar
            .modify(offset, lsb, width, value)
            .map_err(|e| Error::from_mmio(e, self.bar.index()))
    }

    /// Fails unless this accessor sits on BAR `required`.
    pub(crate) fn assert_bar_index(&self, required: u32, operation: &'static str) -> Result<()> {
        if self.bar.index() == required {
            Ok(())
        } else {
            Err(Error::WrongBarForOperation {
                required,
                actual: self.bar.index(),
                operation,
            })
        }
    }

    // -----------------------------------------------------------------------
    // DMA engine (BAR 0)
    // -----------------------------------------------------------------------

    /// Pushes a superpage descriptor into `link`'s firmware FIFO.
    ///
    /// Two address writes are buffered by the firmware; the size write is
    /// the doorbell that enqueues the descriptor. The caller must know the
    /// FIFO has space; the firmware does not report overflow.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR, an invalid link, or a register fault.
    pub fn push_superpage_descriptor(
        &self,
        link: u32,
        pages: u32,
        bus_address: u64,
    ) -> Result<()> {
        self.assert_bar_index(0, "push superpage descriptor")?;
        self.check_link(link)?;
        self.write(
            regs::link_superpage_address_high(link),
            (bus_address >> 32) as u32,
        )?;
        self.write(
            regs::link_superpage_address_low(link),
            (bus_address & 0xffff_ffff) as u32,
        )?;
        self.write(regs::link_superpage_size(link), pages)
    }

    /// Completed-superpage counter of `link`, as reported by firmware.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR, an invalid link, or a register fault.
    pub fn superpage_count(&self, link: u32) -> Result<u32> {
        self.assert_bar_index(0, "read superpage count")?;
        self.check_link(link)?;
        self.read(regs::link_superpages_pushed(link))
    }

    /// Switches the data emulator (and with it the DMA engine) on or off.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn set_data_emulator_enabled(&self, enabled: bool) -> Result<()> {
        self.assert_bar_index(0, "set data emulator")?;
        self.write(regs::DMA_CONTROL, u32::from(enabled))?;
        self.modify(regs::DATA_GENERATOR_CONTROL, 0, 1, u32::from(enabled))
    }

    /// Performs a general reset of the card.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn reset_card(&self) -> Result<()> {
        self.assert_bar_index(0, "reset card")?;
        self.write(regs::RESET_CONTROL, 0x1)
    }

    /// Resets the data generator's event counter.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn reset_data_generator_counter(&self) -> Result<()> {
        self.assert_bar_index(0, "reset data generator counter")?;
        self.write(regs::RESET_CONTROL, 0x2)
    }

    /// Configures the data generator pattern, event size, and random-length
    /// mode, leaving the enable bit untouched.
    ///
    /// # Errors
    ///
    /// `UnsupportedGeneratorPattern` / `UnsupportedGeneratorSize` on values
    /// the hardware cannot encode.
    pub fn set_data_generator_pattern(
        &self,
        pattern: GeneratorPattern,
        size: usize,
        random_enabled: bool,
    ) -> Result<()> {
        self.assert_bar_index(0, "set data generator pattern")?;
        let mut bits = self.read(regs::DATA_GENERATOR_CONTROL)?;
        bits = encode_generator_pattern(bits, pattern);
        bits = encode_generator_size(bits, size)?;
        bits = encode_generator_random(bits, random_enabled);
        self.write(regs::DATA_GENERATOR_CONTROL, bits)
    }

    /// Injects a single error into the generated data stream.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn data_generator_inject_error(&self) -> Result<()> {
        self.assert_bar_index(0, "inject generator error")?;
        self.write(
            regs::DATA_GENERATOR_INJECT_ERROR,
            regs::DATA_GENERATOR_INJECT_ERROR_CMD,
        )
    }

    /// Selects the DMA data source (generator vs. front-end links).
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn set_data_source(&self, source: u32) -> Result<()> {
        self.assert_bar_index(0, "set data source")?;
        self.write(regs::DATA_SOURCE_SELECT, source)
    }

    /// Reads and decodes the firmware feature word.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn firmware_features(&self) -> Result<FirmwareFeatures> {
        self.assert_bar_index(0, "read firmware features")?;
        Ok(FirmwareFeatures::from_register(
            self.read(regs::FIRMWARE_FEATURES)?,
        ))
    }

    /// Endpoint number of this PCI function.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn endpoint_number(&self) -> Result<i32> {
        self.assert_bar_index(0, "read endpoint number")?;
        Ok((self.read(regs::ENDPOINT_ID)? & 0x1) as i32)
    }

    /// Writes the free-running debug register (lower 8 bits).
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn set_debug_register(&self, value: u8) -> Result<()> {
        self.assert_bar_index(0, "write debug register")?;
        self.modify(regs::DEBUG_READ_WRITE, 0, 8, u32::from(value))
    }

    /// Reads back the debug register (lower 8 bits).
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn debug_register(&self) -> Result<u8> {
        self.assert_bar_index(0, "read debug register")?;
        Ok((self.read(regs::DEBUG_READ_WRITE)? & 0xff) as u8)
    }

    // -----------------------------------------------------------------------
    // Identity & monitoring (BAR 2)
    // -----------------------------------------------------------------------

    /// Board serial number.
    ///
    /// # Errors
    ///
    /// `InvalidSerial` when the card reports the all-ones value, which means
    /// a hardware fault rather than a real serial.
    pub fn serial_number(&self) -> Result<u32> {
        self.assert_bar_index(2, "read serial number")?;
        let serial = self.read(regs::SERIAL_NUMBER)?;
        if serial == 0xffff_ffff {
            return Err(Error::InvalidSerial);
        }
        Ok(serial)
    }

    /// Raw 10-bit temperature reading.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn temperature_raw(&self) -> Result<u32> {
        self.assert_bar_index(2, "read temperature")?;
        Ok(self.read(regs::TEMPERATURE)? & 0x3ff)
    }

    /// Temperature in °C, or `None` for an invalid raw value.
    ///
    /// The sensor formula is `(693 · raw) / 1024 − 265` over the 10-bit raw
    /// value; a raw reading of 0 (seen at cold start) is out of the sensor's
    /// range and reported as `None`.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn temperature_celsius(&self) -> Result<Option<f32>> {
        Ok(convert_temperature_raw(self.temperature_raw()?))
    }

    /// Firmware identity string `date-time-githash`.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn firmware_info(&self) -> Result<String> {
        self.assert_bar_index(2, "read firmware info")?;
        Ok(format!(
            "{:x}-{:x}-{:x}",
            self.read(regs::FIRMWARE_DATE)?,
            self.read(regs::FIRMWARE_TIME)?,
            self.read(regs::FIRMWARE_GIT_HASH)?
        ))
    }

    /// FPGA chip id string.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn card_id_string(&self) -> Result<String> {
        self.assert_bar_index(2, "read chip id")?;
        Ok(format!(
            "{:08x}-{:08x}",
            self.read(regs::FPGA_CHIP_HIGH)?,
            self.read(regs::FPGA_CHIP_LOW)?
        ))
    }

    /// Datapath dropped-packet counter.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn dropped_packets(&self) -> Result<u32> {
        self.assert_bar_index(2, "read dropped packets")?;
        self.read(regs::NUM_DROPPED_PACKETS)
    }

    /// CTP clock frequency in Hz.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn ctp_clock(&self) -> Result<u32> {
        self.assert_bar_index(2, "read CTP clock")?;
        self.read(regs::CTP_CLOCK)
    }

    /// Local clock frequency in Hz.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn local_clock(&self) -> Result<u32> {
        self.assert_bar_index(2, "read local clock")?;
        self.read(regs::LOCAL_CLOCK)
    }

    /// Allows the datapath to accept data.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn enable_data_taking(&self) -> Result<()> {
        self.assert_bar_index(2, "enable data taking")?;
        self.modify(regs::BSP_USER_CONTROL, 0, 1, 0x1)
    }

    /// Blocks the datapath from accepting data.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn disable_data_taking(&self) -> Result<()> {
        self.assert_bar_index(2, "disable data taking")?;
        self.modify(regs::BSP_USER_CONTROL, 0, 1, 0x0)
    }

    /// Programs the per-wrapper link-enable registers from a 32-bit mask
    /// (bit set ⇒ link enabled).
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn set_links_enabled(&self, mask: u32) -> Result<()> {
        self.assert_bar_index(2, "set links enabled")?;
        let wrapper = DatapathWrapper::new(self);
        wrapper.set_links_enabled(0, mask & 0xffff)?;
        wrapper.set_links_enabled(1, mask >> 16)
    }

    // -----------------------------------------------------------------------
    // Bring-up (BAR 2)
    // -----------------------------------------------------------------------

    /// Full card bring-up with the settings this accessor was built with.
    ///
    /// Calibrates the TTC, selects the clock, optionally calibrates the PON
    /// upstream, configures the GBT links, sets datapath mode and flow
    /// control, and leaves data taking disabled until `start_dma`.
    ///
    /// # Errors
    ///
    /// Propagates the first failing step, including
    /// [`Error::PonCalibrationFailed`] from the ONU path.
    pub fn configure(&self) -> Result<()> {
        self.assert_bar_index(2, "configure card")?;
        log::info!("configuring CRU (clock {}, {} link(s))", self.clock, self.link_mask.len());

        let ttc = Ttc::new(self);
        ttc.calibrate()?;
        ttc.set_clock(self.clock)?;
        if self.pon_upstream {
            ttc.reset_fpll()?;
            ttc.configure_pon_tx(self.onu_address)?;
        }
        ttc.select_downstream_data(self.downstream_data)?;

        let gbt = Gbt::new(self);
        for &link in &self.link_mask {
            self.check_link(link)?;
            gbt.set_mux(link, self.mux_for_link(link))?;
        }
        gbt.calibrate()?;
        for &link in &self.link_mask {
            gbt.set_internal_data_generator(link, false)?;
            // TX is always GBT; RX may be wide-bus.
            gbt.set_tx_mode(link, GbtMode::Gbt)?;
            gbt.set_rx_mode(link, self.gbt_mode)?;
            gbt.set_loopback(link, self.link_loopback)?;
        }

        self.disable_data_taking()?;

        let datapath = DatapathWrapper::new(self);
        datapath.set_links_enabled(0, 0)?;
        datapath.set_links_enabled(1, 0)?;
        for &link in &self.link_mask {
            datapath.set_link_enabled(link, true)?;
            datapath.set_datapath_mode(link, self.datapath_mode)?;
        }
        datapath.set_packet_arbitration(0)?;
        datapath.set_flow_control(0, self.allow_rejection)?;
        datapath.set_flow_control(1, self.allow_rejection)?;

        log::info!("CRU configuration done");
        Ok(())
    }

    /// Brings the card up only if the current state differs from the
    /// requested one.
    ///
    /// # Errors
    ///
    /// Propagates report or configure failures.
    pub fn reconfigure(&self) -> Result<()> {
        let report = self.report()?;
        if self.matches_report(&report) {
            log::info!("CRU already configured, skipping bring-up");
            return Ok(());
        }
        self.configure()
    }

    /// Snapshot of the card-level configuration.
    ///
    /// # Errors
    ///
    /// Fails on the wrong BAR or a register fault.
    pub fn report(&self) -> Result<ReportInfo> {
        self.assert_bar_index(2, "report card status")?;
        let ttc = Ttc::new(self);
        let gbt = Gbt::new(self);
        let datapath = DatapathWrapper::new(self);

        let mut links = Vec::with_capacity(MAX_LINKS as usize);
        for id in 0..MAX_LINKS {
            links.push(LinkStatus {
                id,
                enabled: datapath.link_enabled(id)?,
                datapath_mode: datapath.datapath_mode(id)?,
                gbt_mux: gbt.mux(id)?,
            });
        }
        Ok(ReportInfo {
            links,
            clock: ttc.clock()?,
            downstream_data: ttc.downstream_data()?,
        })
    }

    fn matches_report(&self, report: &ReportInfo) -> bool {
        if report.clock != self.clock || report.downstream_data != self.downstream_data {
            return false;
        }
        report.links.iter().all(|link| {
            let wanted = self.link_mask.contains(&link.id);
            link.enabled == wanted
                && (!wanted
                    || (link.datapath_mode == self.datapath_mode
                        && link.gbt_mux == self.mux_for_link(link.id)))
        })
    }

    fn mux_for_link(&self, link: u32) -> GbtMux {
        self.gbt_mux_map.get(&link).copied().unwrap_or(self.gbt_mux)
    }

    fn check_link(&self, link: u32) -> Result<()> {
        if link < MAX_LINKS {
            Ok(())
        } else {
            Err(Error::InvalidLinkId {
                link,
                max: MAX_LINKS - 1,
            })
        }
    }
}

/// Applies `pattern` to bits [2:1] of the generator control word.
fn encode_generator_pattern(bits: u32, pattern: GeneratorPattern) -> u32 {
    let code = match pattern {
        GeneratorPattern::Incremental => 0b01,
        GeneratorPattern::Alternating => 0b10,
        GeneratorPattern::Constant => 0b11,
    };
    (bits & !0b110) | (code << 1)
}

/// Applies the event size to bits [15:8]: `(size / 32) − 1` 32-byte words.
fn encode_generator_size(bits: u32, size: usize) -> Result<u32> {
    if size % 32 != 0 || size < 32 || size > DMA_PAGE_SIZE {
        return Err(Error::UnsupportedGeneratorSize { size });
    }
    let encoded = (size / 32 - 1) as u32;
    Ok((bits & !0xff00) | (encoded << 8))
}

/// Applies the random-length flag to bit 16.
fn encode_generator_random(bits: u32, enabled: bool) -> u32 {
    (bits & !(1 << 16)) | (u32::from(enabled) << 16)
}

/// Decodes a generator control word back into `(pattern, size, random)`.
///
/// # Errors
///
/// `UnsupportedGeneratorPattern` when the pattern bits hold the reserved
/// `00` encoding.
pub fn decode_generator_control(bits: u32) -> Result<(GeneratorPattern, usize, bool)> {
    let pattern = match (bits >> 1) & 0b11 {
        0b01 => GeneratorPattern::Incremental,
        0b10 => GeneratorPattern::Alternating,
        0b11 => GeneratorPattern::Constant,
        _ => return Err(Error::Config("reserved generator pattern bits 00".into())),
    };
    let size = (((bits >> 8) & 0xff) as usize + 1) * 32;
    let random = bits & (1 << 16) != 0;
    Ok((pattern, size, random))
}

/// Temperature conversion over the 10-bit raw reading.
fn convert_temperature_raw(raw: u32) -> Option<f32> {
    const REGISTER_MAX: u32 = 1023;
    if raw == 0 || raw > REGISTER_MAX {
        return None;
    }
    Some((693.0 * raw as f32) / 1024.0 - 265.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar0() -> CruBar {
        CruBar::new(BarRegion::anonymous(0x1000, 0))
    }

    fn bar2() -> CruBar {
        CruBar::new(BarRegion::anonymous(0x800000, 2))
    }

    #[test]
    fn descriptor_push_writes_address_then_doorbell() {
        let bar = bar0();
        let region = bar.region().clone();
        bar.push_superpage_descriptor(1, 256, 0x1_2345_8000).unwrap();
        assert_eq!(region.read32(regs::link_superpage_address_high(1)).unwrap(), 0x1);
        assert_eq!(region.read32(regs::link_superpage_address_low(1)).unwrap(), 0x2345_8000);
        assert_eq!(region.read32(regs::link_superpage_size(1)).unwrap(), 256);
    }

    #[test]
    fn superpage_count_reads_per_link_counter() {
        let bar = bar0();
        bar.region().write32(regs::link_superpages_pushed(4), 17).unwrap();
        assert_eq!(bar.superpage_count(4).unwrap(), 17);
        assert!(matches!(
            bar.superpage_count(MAX_LINKS),
            Err(Error::InvalidLinkId { .. })
        ));
    }

    #[test]
    fn bar2_operations_reject_bar0() {
        let bar = bar0();
        assert!(matches!(
            bar.serial_number(),
            Err(Error::WrongBarForOperation { required: 2, actual: 0, .. })
        ));
        assert!(matches!(
            bar.temperature_celsius(),
            Err(Error::WrongBarForOperation { .. })
        ));
    }

    #[test]
    fn bar0_operations_reject_bar2() {
        let bar = bar2();
        assert!(matches!(
            bar.push_superpage_descriptor(0, 1, 0),
            Err(Error::WrongBarForOperation { required: 0, actual: 2, .. })
        ));
    }

    #[test]
    fn serial_all_ones_is_fatal() {
        let bar = bar2();
        bar.region().write32(regs::SERIAL_NUMBER, 0xffff_ffff).unwrap();
        assert!(matches!(bar.serial_number(), Err(Error::InvalidSerial)));
        bar.region().write32(regs::SERIAL_NUMBER, 1041).unwrap();
        assert_eq!(bar.serial_number().unwrap(), 1041);
    }

    #[test]
    fn generator_control_roundtrip() {
        for pattern in [
            GeneratorPattern::Incremental,
            GeneratorPattern::Alternating,
            GeneratorPattern::Constant,
        ] {
            for size in [32usize, 64, 4096, 8192] {
                for random in [false, true] {
                    let mut bits = 0;
                    bits = encode_generator_pattern(bits, pattern);
                    bits = encode_generator_size(bits, size).unwrap();
                    bits = encode_generator_random(bits, random);
                    assert_eq!(
                        decode_generator_control(bits).unwrap(),
                        (pattern, size, random)
                    );
                }
            }
        }
    }

    #[test]
    fn generator_size_bounds() {
        for size in [0usize, 16, 33, 8193, 16384] {
            assert!(
                matches!(
                    encode_generator_size(0, size),
                    Err(Error::UnsupportedGeneratorSize { .. })
                ),
                "size {size} must be rejected"
            );
        }
        // 8192 is the largest legal size.
        assert_eq!(encode_generator_size(0, 8192).unwrap() >> 8 & 0xff, 255);
    }

    #[test]
    fn set_pattern_preserves_enable_bit() {
        let bar = bar0();
        bar.region()
            .write32(regs::DATA_GENERATOR_CONTROL, 0x1)
            .unwrap();
        bar.set_data_generator_pattern(GeneratorPattern::Constant, 64, true)
            .unwrap();
        let bits = bar.region().read32(regs::DATA_GENERATOR_CONTROL).unwrap();
        assert_eq!(bits & 0x1, 0x1);
        assert_eq!(
            decode_generator_control(bits).unwrap(),
            (GeneratorPattern::Constant, 64, true)
        );
    }

    #[test]
    fn emulator_toggle_sets_dma_control_and_enable_bit() {
        let bar = bar0();
        bar.set_data_emulator_enabled(true).unwrap();
        assert_eq!(bar.region().read32(regs::DMA_CONTROL).unwrap(), 1);
        assert_eq!(
            bar.region().read32(regs::DATA_GENERATOR_CONTROL).unwrap() & 1,
            1
        );
        bar.set_data_emulator_enabled(false).unwrap();
        assert_eq!(bar.region().read32(regs::DMA_CONTROL).unwrap(), 0);
        assert_eq!(
            bar.region().read32(regs::DATA_GENERATOR_CONTROL).unwrap() & 1,
            0
        );
    }

    #[test]
    fn firmware_feature_word_decoding() {
        // Integrated firmware has everything.
        let f = FirmwareFeatures::from_register(0x4000_0000);
        assert!(!f.standalone && f.serial && f.temperature && f.firmware_info && f.chip_id);

        // Standalone with everything enabled.
        let f = FirmwareFeatures::from_register(0x4000_5afe);
        assert!(f.standalone && f.serial && f.data_selection && !f.chip_id);

        // Standalone with everything disabled.
        let f = FirmwareFeatures::from_register(0x4000_5afe | (0b1111 << 16));
        assert!(f.standalone && !f.serial && !f.data_selection && !f.temperature && !f.firmware_info);

        // Individual feature bits.
        assert!(!FirmwareFeatures::from_register(0x5afe | (1 << 16)).data_selection);
        assert!(!FirmwareFeatures::from_register(0x5afe | (1 << 17)).temperature);
        assert!(!FirmwareFeatures::from_register(0x5afe | (1 << 18)).serial);
        assert!(!FirmwareFeatures::from_register(0x5afe | (1 << 19)).firmware_info);
    }

    #[test]
    fn temperature_conversion() {
        assert_eq!(convert_temperature_raw(0), None);
        assert_eq!(convert_temperature_raw(1024), None);
        let t = convert_temperature_raw(512).unwrap();
        assert!((t - 81.5).abs() < 1.0, "t = {t}");
    }

    #[test]
    fn debug_register_roundtrip() {
        let bar = bar0();
        bar.set_debug_register(0xa5).unwrap();
        assert_eq!(bar.debug_register().unwrap(), 0xa5);
    }
}
