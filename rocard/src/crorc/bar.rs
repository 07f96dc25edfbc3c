//! Semantic register operations on the CRORC.
//!
//! The command/response procedures busy-wait on status bits. The wait bound
//! is counted in register-read loops, not wall clock (MMIO read cost
//! dominates), using a loops-per-microsecond constant calibrated once per
//! device open ([`CrorcBar::calibrate`]).

use std::cell::Cell;
use std::time::Instant;

use rocard_mmio::BarRegion;

use super::regs::{self, ChannelCsr, ResetMask, RorcCsr, StatusWord};
use crate::error::{Error, Result};
use crate::types::GeneratorPattern;

/// Reads used for the loops-per-microsecond calibration.
const CALIBRATION_READS: u64 = 10_000;

/// Fallback loop rate before calibration has run.
const DEFAULT_LOOPS_PER_USEC: u64 = 100;

/// Flash word address where the hardware identification text starts.
const FLASH_SERIAL_ADDRESS: u32 = 0x0147_0000;

/// Words of identification text read from flash.
const FLASH_SERIAL_WORDS: usize = 48;

/// What kind of DIU sits behind the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiuVersion {
    /// No DIU answered the version request.
    NoDiu,
    /// Pre-final DIU protocol.
    Old,
    /// Final DIU protocol.
    New,
    /// DIU embedded in the RORC (integrated revisions).
    Embedded,
}

/// Link-stack parameters discovered at open.
#[derive(Debug, Clone, Copy)]
pub struct DiuConfig {
    /// RORC hardware revision.
    pub rorc_revision: u32,
    /// DIU flavour behind this channel.
    pub diu_version: DiuVersion,
}

/// A CRORC BAR 0 with the card's semantic operations on top.
#[derive(Debug)]
pub struct CrorcBar {
    bar: BarRegion,
    loops_per_usec: Cell<u64>,
}

impl CrorcBar {
    /// Hardware revision from which the DIU is embedded in the RORC.
    pub const REVISION_INTEGRATED: u32 = 6;

    /// Wraps a mapped BAR 0.
    #[must_use]
    pub fn new(bar: BarRegion) -> Self {
        Self {
            bar,
            loops_per_usec: Cell::new(DEFAULT_LOOPS_PER_USEC),
        }
    }

    /// The underlying region (shared with engines and tests).
    #[must_use]
    pub fn region(&self) -> &BarRegion {
        &self.bar
    }

    /// BAR index.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.bar.index()
    }

    /// BAR size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bar.size()
    }

    pub(crate) fn read_reg(&self, word: usize) -> Result<u32> {
        self.bar
            .read32(regs::byte_offset(word))
            .map_err(|e| Error::from_mmio(e, self.bar.index()))
    }

    pub(crate) fn write_reg(&self, word: usize, value: u32) -> Result<()> {
        self.bar
            .write32(regs::byte_offset(word), value)
            .map_err(|e| Error::from_mmio(e, self.bar.index()))
    }

    // -----------------------------------------------------------------------
    // Busy-wait plumbing
    // -----------------------------------------------------------------------

    /// Calibrates the loops-per-microsecond constant with one burst of
    /// register reads. Wall clock is only used here, never inside a wait.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn calibrate(&self) -> Result<()> {
        let started = Instant::now();
        for _ in 0..CALIBRATION_READS {
            self.read_reg(regs::RCSR)?;
        }
        let elapsed_us = started.elapsed().as_micros().max(1) as u64;
        let loops = (CALIBRATION_READS / elapsed_us).max(1);
        self.loops_per_usec.set(loops);
        log::debug!("calibrated {loops} register read(s) per microsecond");
        Ok(())
    }

    /// Current loop rate (reads per microsecond).
    #[must_use]
    pub fn loops_per_usec(&self) -> u64 {
        self.loops_per_usec.get()
    }

    /// Spins until `done(csr)` or the bound expires.
    fn wait_csr(
        &self,
        timeout_us: u64,
        operation: &'static str,
        done: impl Fn(ChannelCsr) -> bool,
    ) -> Result<()> {
        let loops = timeout_us * self.loops_per_usec.get();
        for _ in 0..loops {
            let csr = ChannelCsr::from_bits_retain(self.read_reg(regs::C_CSR)?);
            if done(csr) {
                return Ok(());
            }
        }
        Err(Error::CommandTimeout {
            operation,
            timeout_us,
        })
    }

    // -----------------------------------------------------------------------
    // DDL command/response
    // -----------------------------------------------------------------------

    /// Fails with `LinkNotOn` when the DDL link is down.
    ///
    /// # Errors
    ///
    /// `LinkNotOn`, or a register fault.
    pub fn check_link(&self) -> Result<()> {
        let csr = ChannelCsr::from_bits_retain(self.read_reg(regs::C_CSR)?);
        if csr.contains(ChannelCsr::LINK_DOWN) {
            return Err(Error::LinkNotOn);
        }
        Ok(())
    }

    /// Sends one DDL command: waits for the command register to drain,
    /// then writes the encoded word.
    ///
    /// # Errors
    ///
    /// `LinkNotOn` for destinations beyond the DIU with the link down,
    /// `CommandTimeout` when the register never drains.
    pub fn send_command(
        &self,
        dest: u32,
        code: u32,
        transid: u32,
        param: u32,
        operation: &'static str,
    ) -> Result<()> {
        if dest > regs::DEST_DIU {
            self.check_link()?;
        }
        self.wait_csr(regs::DDL_RESPONSE_TIME_US, operation, |csr| {
            !csr.contains(ChannelCsr::CMD_NOT_EMPTY)
        })?;
        self.write_reg(regs::C_DCR, regs::encode_command(dest, code, transid, param))
    }

    /// Waits for a status word to arrive, then reads it.
    ///
    /// # Errors
    ///
    /// `CommandTimeout` when nothing arrives within the DDL response time.
    pub fn wait_and_read_status(&self, operation: &'static str) -> Result<StatusWord> {
        self.wait_csr(regs::DDL_RESPONSE_TIME_US, operation, |csr| {
            csr.contains(ChannelCsr::RXSTAT_NOT_EMPTY)
        })?;
        Ok(StatusWord::new(self.read_reg(regs::C_DSR)?))
    }

    /// Reads and validates the command-transmission status word that closes
    /// every command exchange.
    ///
    /// # Errors
    ///
    /// `IllegalCommand` when the card flags the command as illegal,
    /// `CommandNotAccepted` on a mismatched reply, `CommandTimeout` when no
    /// reply arrives.
    pub fn read_ctstw(
        &self,
        transid: u32,
        dest: u32,
        operation: &'static str,
    ) -> Result<StatusWord> {
        let stw = self.wait_and_read_status(operation)?;
        if stw.code() == regs::STW_ILCMD {
            return Err(Error::IllegalCommand { status: stw.raw });
        }
        let code_ok = stw.code() == regs::STW_CTSTW || stw.code() == regs::STW_CTSTW_TO;
        if !code_ok || stw.transid() != transid || stw.dest() != dest {
            return Err(Error::CommandNotAccepted { operation });
        }
        Ok(stw)
    }

    /// Reads and clears the DIU interface status.
    ///
    /// # Errors
    ///
    /// Propagates command and status errors.
    pub fn diu_command(&self, transid: u32) -> Result<u32> {
        self.interface_status(regs::DEST_DIU, transid, "DIU status command")
    }

    /// Reads and clears the SIU interface status.
    ///
    /// # Errors
    ///
    /// Propagates command and status errors.
    pub fn siu_command(&self, transid: u32) -> Result<u32> {
        self.interface_status(regs::DEST_SIU, transid, "SIU status command")
    }

    fn interface_status(&self, dest: u32, transid: u32, operation: &'static str) -> Result<u32> {
        self.send_command(dest, regs::CMD_RANDCIFST, transid, 0, operation)?;
        let stw = self.wait_and_read_status(operation)?;
        if stw.code() != regs::STW_IFSTW || stw.transid() != transid || stw.dest() != dest {
            return Err(Error::CommandNotAccepted { operation });
        }
        self.read_ctstw(transid, dest, operation)?;
        Ok(stw.raw)
    }

    // -----------------------------------------------------------------------
    // Resets
    // -----------------------------------------------------------------------

    /// Applies the selected resets.
    ///
    /// FIFO/error/counter clears and the DIU reset go through the channel
    /// CSR; an SIU reset is a DDL command whose acknowledgement is awaited;
    /// a RORC reset pulses the channel-reset bit last.
    ///
    /// # Errors
    ///
    /// `CommandTimeout` when the SIU does not acknowledge,
    /// `CommandNotAccepted` when it answers with an error flag.
    pub fn reset(&self, mask: ResetMask) -> Result<()> {
        let mut cmd = ChannelCsr::empty();
        if mask.contains(ResetMask::DIU) {
            cmd |= ChannelCsr::RESET_DIU;
        }
        if mask.contains(ResetMask::FREE_FIFO) {
            cmd |= ChannelCsr::CLEAR_RXFF | ChannelCsr::CLEAR_TXFF;
        }
        if mask.contains(ResetMask::FIFOS) {
            cmd |= ChannelCsr::CLEAR_FIFOS;
        }
        if mask.contains(ResetMask::ERROR) {
            cmd |= ChannelCsr::CLEAR_ERROR;
        }
        if mask.contains(ResetMask::COUNTERS) {
            cmd |= ChannelCsr::CLEAR_COUNTERS;
        }
        if !cmd.is_empty() {
            self.write_reg(regs::C_CSR, cmd.bits())?;
        }

        if mask.contains(ResetMask::SIU) {
            self.write_reg(regs::C_DCR, regs::CMD_RESET_SIU)?;
            let stw = self.wait_and_read_status("SIU reset")?;
            if stw.error() {
                return Err(Error::CommandNotAccepted {
                    operation: "SIU reset",
                });
            }
        }

        if mask.is_empty() || mask.contains(ResetMask::RORC) {
            self.write_reg(regs::RCSR, RorcCsr::RESET_CHAN.bits())?;
        }
        Ok(())
    }

    /// Discovers the RORC revision and the DIU flavour.
    ///
    /// Integrated revisions embed the DIU and answer locally; older cards
    /// are asked over the DDL for their hardware version, and the number of
    /// replies tells old from new protocol.
    ///
    /// # Errors
    ///
    /// Propagates command and register errors.
    pub fn find_diu_version(&self) -> Result<DiuConfig> {
        let revision = self.read_reg(regs::RHID)? >> 24;
        if revision >= Self::REVISION_INTEGRATED {
            return Ok(DiuConfig {
                rorc_revision: revision,
                diu_version: DiuVersion::Embedded,
            });
        }

        self.reset(ResetMask::empty())?;
        self.send_command(
            regs::DEST_DIU,
            regs::CMD_RHWVER,
            0,
            0,
            "DIU version request",
        )?;

        let mut replies = 0;
        while replies < regs::DDL_MAX_REPLY {
            if self.wait_and_read_status("DIU version reply").is_err() {
                break;
            }
            replies += 1;
        }
        let diu_version = match replies {
            0 => DiuVersion::NoDiu,
            2 => DiuVersion::New,
            _ => DiuVersion::Old,
        };
        Ok(DiuConfig {
            rorc_revision: revision,
            diu_version,
        })
    }

    // -----------------------------------------------------------------------
    // Receiver and free FIFO
    // -----------------------------------------------------------------------

    /// Points the receiver at the ready-FIFO and switches reception on.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn start_data_receiver(&self, ready_fifo_bus: u64) -> Result<()> {
        self.write_reg(regs::C_RRBAR, (ready_fifo_bus & 0xffff_ffff) as u32)?;
        self.write_reg(regs::C_RRBX, (ready_fifo_bus >> 32) as u32)?;
        let csr = ChannelCsr::from_bits_retain(self.read_reg(regs::C_CSR)?);
        if !csr.contains(ChannelCsr::DATA_RX_ON_OFF) {
            self.write_reg(regs::C_CSR, ChannelCsr::DATA_RX_ON_OFF.bits())?;
        }
        Ok(())
    }

    /// Switches reception off.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn stop_data_receiver(&self) -> Result<()> {
        let csr = ChannelCsr::from_bits_retain(self.read_reg(regs::C_CSR)?);
        if csr.contains(ChannelCsr::DATA_RX_ON_OFF) {
            self.write_reg(regs::C_CSR, ChannelCsr::DATA_RX_ON_OFF.bits())?;
        }
        Ok(())
    }

    /// Pushes one page into the card's free FIFO.
    ///
    /// The low address write and the packed length/index word follow the
    /// extension word; the length/index write is the doorbell.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn push_free_fifo_page(
        &self,
        index: usize,
        bus_address: u64,
        length_words: u32,
    ) -> Result<()> {
        self.write_reg(regs::C_RAFX, (bus_address >> 32) as u32)?;
        self.write_reg(regs::C_RAFH, (bus_address & 0xffff_ffff) as u32)?;
        self.write_reg(regs::C_RAFL, (length_words << 8) | index as u32)
    }

    /// Toggles the internal loopback to the requested state.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn set_internal_loopback(&self, enabled: bool) -> Result<()> {
        let csr = ChannelCsr::from_bits_retain(self.read_reg(regs::C_CSR)?);
        if csr.contains(ChannelCsr::LOOPB_ON_OFF) != enabled {
            self.write_reg(regs::C_CSR, ChannelCsr::LOOPB_ON_OFF.bits())?;
        }
        Ok(())
    }

    /// Commands the SIU into loopback mode.
    ///
    /// # Errors
    ///
    /// Propagates command and status errors.
    pub fn set_siu_loopback(&self) -> Result<()> {
        self.write_reg(regs::C_DCR, regs::CMD_RESET_SIU)?;
        let stw = self.wait_and_read_status("SIU loopback")?;
        if stw.error() {
            return Err(Error::CommandNotAccepted {
                operation: "SIU loopback",
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Data generator
    // -----------------------------------------------------------------------

    /// Arms the data generator. Returns the (possibly rounded) event length
    /// in words actually programmed.
    ///
    /// With a random seed the event length is rounded down to a power of
    /// two, as the hardware requires.
    ///
    /// # Errors
    ///
    /// `UnsupportedGeneratorSize` for event lengths outside 1..0x80000
    /// words.
    pub fn arm_data_generator(
        &self,
        initial_event_number: u32,
        initial_word: u32,
        pattern: GeneratorPattern,
        event_length_words: u32,
        seed: u32,
    ) -> Result<u32> {
        if event_length_words < 1 || event_length_words >= 0x0008_0000 {
            return Err(Error::UnsupportedGeneratorSize {
                size: event_length_words as usize * 4,
            });
        }

        let pattern_code = match pattern {
            GeneratorPattern::Constant => 1,
            GeneratorPattern::Alternating => 2,
            GeneratorPattern::Incremental => 5,
        };

        let rounded = if seed != 0 {
            let rounded = round_power_of_2(event_length_words);
            self.write_reg(regs::C_DG2, seed)?;
            self.write_reg(
                regs::C_DG1,
                0x8000_0000 | ((rounded - 1) << 4) | pattern_code,
            )?;
            rounded
        } else {
            self.write_reg(regs::C_DG2, initial_word)?;
            self.write_reg(
                regs::C_DG1,
                ((event_length_words - 1) << 4) | pattern_code,
            )?;
            event_length_words
        };
        self.write_reg(regs::C_DG3, initial_event_number)?;
        Ok(rounded)
    }

    /// Starts the armed generator; `max_events == 0` runs forever.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn start_data_generator(&self, max_events: u32) -> Result<()> {
        let cycle = if max_events == 0 {
            0x8000_0000
        } else {
            (max_events - 1) & 0x7fff_ffff
        };
        self.write_reg(regs::C_DG4, cycle)?;
        self.write_reg(regs::C_CSR, ChannelCsr::START_DG.bits())
    }

    /// Stops the generator.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn stop_data_generator(&self) -> Result<()> {
        self.write_reg(regs::C_CSR, ChannelCsr::STOP_DG.bits())
    }

    // -----------------------------------------------------------------------
    // Front-end trigger
    // -----------------------------------------------------------------------

    /// Sends RDYRX to the front-end and awaits the acknowledgement.
    ///
    /// # Errors
    ///
    /// `LinkNotOn`/`CommandTimeout` from the send, `CommandNotAccepted`
    /// when no reply arrives, `RdyRxRejected` when the front-end answers
    /// with an error flag.
    pub fn start_trigger(&self) -> Result<StatusWord> {
        self.send_command(regs::DEST_FEE, regs::CMD_RDYRX, 0, 0, "RDYRX")?;
        let stw = match self.wait_and_read_status("RDYRX reply") {
            Ok(stw) => stw,
            Err(Error::CommandTimeout { .. }) => {
                return Err(Error::CommandNotAccepted { operation: "RDYRX" })
            }
            Err(other) => return Err(other),
        };
        if stw.error() || stw.code() == regs::STW_ILCMD {
            return Err(Error::RdyRxRejected { status: stw.raw });
        }
        Ok(stw)
    }

    /// Sends EOBTR to the front-end, retrying once like the hardware
    /// procedure prescribes.
    ///
    /// # Errors
    ///
    /// `LinkNotOn`/`CommandTimeout` from the send, `CommandNotAccepted`
    /// when no reply arrives on either attempt.
    pub fn stop_trigger(&self) -> Result<StatusWord> {
        for attempt in 0..2 {
            self.send_command(regs::DEST_FEE, regs::CMD_EOBTR, 0, 0, "EOBTR")?;
            match self.wait_and_read_status("EOBTR reply") {
                Ok(stw) => return Ok(stw),
                Err(Error::CommandTimeout { .. }) if attempt == 0 => {}
                Err(Error::CommandTimeout { .. }) => {
                    return Err(Error::CommandNotAccepted { operation: "EOBTR" })
                }
                Err(other) => return Err(other),
            }
        }
        unreachable!("EOBTR retry loop returns on every branch")
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    /// Firmware version string `major.minor`.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn firmware_version(&self) -> Result<String> {
        let fw = self.read_reg(regs::RFID)?;
        Ok(format!("{}.{}", (fw >> 20) & 0xf, (fw >> 13) & 0x7f))
    }

    /// Serial number from the identification text in flash, or `None` when
    /// the flash carries no serial tag or never becomes ready.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn serial(&self) -> Result<Option<i32>> {
        const FLASH_READY_TIMEOUT_US: u64 = 100;

        let mut text = String::with_capacity(FLASH_SERIAL_WORDS);
        for i in 0..FLASH_SERIAL_WORDS as u32 {
            self.write_reg(regs::F_IADR, FLASH_SERIAL_ADDRESS + i)?;
            let loops = FLASH_READY_TIMEOUT_US * self.loops_per_usec.get();
            let mut ready = false;
            for _ in 0..loops {
                if self.read_reg(regs::F_LRD)? & 0x1 != 0 {
                    ready = true;
                    break;
                }
            }
            if !ready {
                log::debug!("flash did not become ready, no serial available");
                return Ok(None);
            }
            let word = self.read_reg(regs::F_IFDSR)?;
            if word == 0xffff_ffff {
                return Ok(None);
            }
            text.push((word & 0xff) as u8 as char);
        }
        Ok(parse_flash_serial(&text))
    }
}

/// Rounds down to the nearest power of two.
fn round_power_of_2(value: u32) -> u32 {
    let mut result = 1;
    while result * 2 <= value {
        result *= 2;
    }
    result
}

/// Extracts the number following the `S/N:` tag of the flash text.
fn parse_flash_serial(text: &str) -> Option<i32> {
    let position = text.find("S/N:")?;
    let digits: String = text[position + 4..]
        .chars()
        .skip_while(|c| c.is_whitespace())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar() -> CrorcBar {
        CrorcBar::new(BarRegion::anonymous(0x1000, 0))
    }

    fn set_csr(bar: &CrorcBar, bits: ChannelCsr) {
        bar.region()
            .write32(regs::byte_offset(regs::C_CSR), bits.bits())
            .unwrap();
    }

    #[test]
    fn link_check_reports_down_link() {
        let bar = bar();
        bar.check_link().unwrap();
        set_csr(&bar, ChannelCsr::LINK_DOWN);
        assert!(matches!(bar.check_link(), Err(Error::LinkNotOn)));
    }

    #[test]
    fn send_to_fee_requires_link() {
        let bar = bar();
        set_csr(&bar, ChannelCsr::LINK_DOWN);
        assert!(matches!(
            bar.send_command(regs::DEST_FEE, regs::CMD_RDYRX, 0, 0, "RDYRX"),
            Err(Error::LinkNotOn)
        ));
        // DIU-bound commands do not need the link.
        bar.send_command(regs::DEST_DIU, regs::CMD_RANDCIFST, 0, 0, "DIU status")
            .unwrap();
    }

    #[test]
    fn status_wait_times_out_on_silent_card() {
        let bar = bar();
        match bar.wait_and_read_status("test wait") {
            Err(Error::CommandTimeout {
                operation: "test wait",
                timeout_us,
            }) => assert_eq!(timeout_us, regs::DDL_RESPONSE_TIME_US),
            other => panic!("expected CommandTimeout, got {other:?}"),
        }
    }

    #[test]
    fn status_read_returns_the_word() {
        let bar = bar();
        set_csr(&bar, ChannelCsr::RXSTAT_NOT_EMPTY);
        bar.region()
            .write32(regs::byte_offset(regs::C_DSR), 0x0000_1230)
            .unwrap();
        let stw = bar.wait_and_read_status("read").unwrap();
        assert_eq!(stw.raw, 0x1230);
        assert_eq!(stw.code(), 3);
    }

    #[test]
    fn illegal_command_status_is_surfaced() {
        let bar = bar();
        set_csr(&bar, ChannelCsr::RXSTAT_NOT_EMPTY);
        bar.region()
            .write32(
                regs::byte_offset(regs::C_DSR),
                regs::DEST_DIU | (regs::STW_ILCMD << 4),
            )
            .unwrap();
        assert!(matches!(
            bar.read_ctstw(0, regs::DEST_DIU, "test"),
            Err(Error::IllegalCommand { .. })
        ));
    }

    #[test]
    fn rdyrx_rejection_carries_status() {
        let bar = bar();
        set_csr(&bar, ChannelCsr::RXSTAT_NOT_EMPTY);
        bar.region()
            .write32(regs::byte_offset(regs::C_DSR), (1 << 31) | regs::DEST_FEE)
            .unwrap();
        match bar.start_trigger() {
            Err(Error::RdyRxRejected { status }) => assert_eq!(status >> 31, 1),
            other => panic!("expected RdyRxRejected, got {other:?}"),
        }
    }

    #[test]
    fn rdyrx_without_reply_is_not_accepted() {
        let bar = bar();
        assert!(matches!(
            bar.start_trigger(),
            Err(Error::CommandNotAccepted { operation: "RDYRX" })
        ));
    }

    #[test]
    fn free_fifo_push_packs_length_and_index() {
        let bar = bar();
        bar.push_free_fifo_page(5, 0x2_0000_1000, 0x800).unwrap();
        let region = bar.region();
        assert_eq!(region.read32(regs::byte_offset(regs::C_RAFX)).unwrap(), 0x2);
        assert_eq!(
            region.read32(regs::byte_offset(regs::C_RAFH)).unwrap(),
            0x0000_1000
        );
        assert_eq!(
            region.read32(regs::byte_offset(regs::C_RAFL)).unwrap(),
            (0x800 << 8) | 5
        );
    }

    #[test]
    fn generator_arming_encodes_length_and_pattern() {
        let bar = bar();
        let rounded = bar
            .arm_data_generator(0, 0xcafe, GeneratorPattern::Incremental, 0x400, 0)
            .unwrap();
        assert_eq!(rounded, 0x400);
        let dg1 = bar.region().read32(regs::byte_offset(regs::C_DG1)).unwrap();
        assert_eq!(dg1, ((0x400 - 1) << 4) | 5);
        assert_eq!(
            bar.region().read32(regs::byte_offset(regs::C_DG2)).unwrap(),
            0xcafe
        );
    }

    #[test]
    fn generator_with_seed_rounds_to_power_of_two() {
        let bar = bar();
        let rounded = bar
            .arm_data_generator(0, 0, GeneratorPattern::Constant, 1000, 42)
            .unwrap();
        assert_eq!(rounded, 512);
        let dg1 = bar.region().read32(regs::byte_offset(regs::C_DG1)).unwrap();
        assert_eq!(dg1 & 0x8000_0000, 0x8000_0000);
        assert_eq!(
            bar.region().read32(regs::byte_offset(regs::C_DG2)).unwrap(),
            42
        );
    }

    #[test]
    fn generator_length_bounds() {
        let bar = bar();
        assert!(matches!(
            bar.arm_data_generator(0, 0, GeneratorPattern::Constant, 0, 0),
            Err(Error::UnsupportedGeneratorSize { .. })
        ));
        assert!(matches!(
            bar.arm_data_generator(0, 0, GeneratorPattern::Constant, 0x8_0000, 0),
            Err(Error::UnsupportedGeneratorSize { .. })
        ));
    }

    #[test]
    fn embedded_revision_skips_the_ddl_query() {
        let bar = bar();
        bar.region()
            .write32(regs::byte_offset(regs::RHID), 7 << 24)
            .unwrap();
        let config = bar.find_diu_version().unwrap();
        assert_eq!(config.rorc_revision, 7);
        assert_eq!(config.diu_version, DiuVersion::Embedded);
    }

    #[test]
    fn receiver_start_programs_base_and_toggle() {
        let bar = bar();
        bar.start_data_receiver(0x1_0000_2000).unwrap();
        let region = bar.region();
        assert_eq!(
            region.read32(regs::byte_offset(regs::C_RRBAR)).unwrap(),
            0x2000
        );
        assert_eq!(region.read32(regs::byte_offset(regs::C_RRBX)).unwrap(), 0x1);
        assert_eq!(
            region.read32(regs::byte_offset(regs::C_CSR)).unwrap(),
            ChannelCsr::DATA_RX_ON_OFF.bits()
        );
    }

    #[test]
    fn flash_serial_parsing() {
        assert_eq!(parse_flash_serial("CRORC2 HW S/N: 1041 LD:EP2"), Some(1041));
        assert_eq!(parse_flash_serial("S/N:0007"), Some(7));
        assert_eq!(parse_flash_serial("no tag here"), None);
        assert_eq!(parse_flash_serial("S/N: none"), None);
    }

    #[test]
    fn round_power_of_2_rounds_down() {
        assert_eq!(round_power_of_2(1), 1);
        assert_eq!(round_power_of_2(2), 2);
        assert_eq!(round_power_of_2(1000), 512);
        assert_eq!(round_power_of_2(1024), 1024);
    }
}
