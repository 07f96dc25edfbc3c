//! TTC subsystem: clock selection, PLL calibration, and the PON upstream.
//!
//! All operations run on BAR 2. Bring-up sleeps are bounded hardware settle
//! times and taken outside any lock.

use std::thread;
use std::time::Duration;

use super::regs;
use super::bar::CruBar;
use crate::error::{Error, Result};
use crate::types::{Clock, DownstreamData};

/// Offset of the ONU calibration status word inside the user-logic block.
const ONU_CALIBRATION_STATUS: usize = 0xc;

/// Bit set in the calibration status once the PON TX has locked.
const ONU_CALIBRATED: u32 = 0x1;

/// TTC operations over a CRU BAR 2.
pub struct Ttc<'a> {
    bar: &'a CruBar,
}

impl<'a> Ttc<'a> {
    /// Creates the accessor.
    #[must_use]
    pub fn new(bar: &'a CruBar) -> Self {
        Self { bar }
    }

    /// Calibrates the TTC PLL chain.
    ///
    /// Switches the PON wrapper to reference clock 0 and runs the ATX and
    /// TX/RX calibration sequences. The 2 s settle at the end is the
    /// documented lock time of the PLL chain.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn calibrate(&self) -> Result<()> {
        // Switch the PON wrapper PLL to refclk 0 by mirroring the current
        // selection register into the select request.
        let sel0 = self.bar.read(regs::PON_WRAPPER_PLL + 0x44c)?;
        self.bar.write(regs::PON_WRAPPER_PLL + 0x448, sel0)?;

        calibrate_pll_block(self.bar, regs::PON_WRAPPER_PLL)?;
        calibrate_pll_block(self.bar, regs::PON_WRAPPER_TX)?;

        thread::sleep(Duration::from_secs(2));
        Ok(())
    }

    /// Selects the TTC clock source.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn set_clock(&self, clock: Clock) -> Result<()> {
        if clock == Clock::Ttc {
            // The recovered clock needs the 240 MHz reference generator.
            self.bar.write(
                regs::ONU_USER_REFGEN + regs::REFGEN1_OFFSET,
                0x1102_0000,
            )?;
        }
        self.bar.write(regs::LOCK_CLOCK_TO_REF, 0)?;
        let code = match clock {
            Clock::Ttc => 0x0,
            Clock::Local => 0x2,
        };
        self.bar.modify(regs::TTC_DATA, 0, 2, code)
    }

    /// Reads back the selected clock source.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn clock(&self) -> Result<Clock> {
        let code = self.bar.read(regs::TTC_DATA)? & 0x3;
        Ok(if code == 0x0 { Clock::Ttc } else { Clock::Local })
    }

    /// Pulses the fPLL reset bit.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn reset_fpll(&self) -> Result<()> {
        self.bar.modify(regs::CLOCK_CONTROL, 24, 1, 0x1)?;
        self.bar.modify(regs::CLOCK_CONTROL, 24, 1, 0x0)
    }

    /// Configures the PON transmitter for the given ONU address.
    ///
    /// # Errors
    ///
    /// [`Error::PonCalibrationFailed`] when the transmitter does not report
    /// lock after the sequence.
    pub fn configure_pon_tx(&self, onu_address: u32) -> Result<()> {
        // fPLL to refclk 1, then calibrate it.
        self.bar.write(regs::CLOCK_ONU_FPLL + 0x448, 0x1)?;
        calibrate_pll_block(self.bar, regs::CLOCK_ONU_FPLL)?;

        self.bar.write(regs::CLOCK_PLL_CONTROL_ONU, 0x1)?;
        self.bar.modify(regs::ONU_USER_LOGIC, 1, 8, onu_address & 0xff)?;

        let status = self.bar.read(regs::ONU_USER_LOGIC + ONU_CALIBRATION_STATUS)?;
        if status & ONU_CALIBRATED == 0 {
            return Err(Error::PonCalibrationFailed { status });
        }
        Ok(())
    }

    /// Reads the raw ONU status word (for the status tool).
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn onu_status(&self) -> Result<u32> {
        self.bar.read(regs::ONU_USER_LOGIC + ONU_CALIBRATION_STATUS)
    }

    /// Selects the downstream data source.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn select_downstream_data(&self, data: DownstreamData) -> Result<()> {
        let code = match data {
            DownstreamData::Ctp => 0x0,
            DownstreamData::Pattern => 0x1,
            DownstreamData::Midtrg => 0x2,
        };
        self.bar.modify(regs::TTC_DATA, 16, 2, code)
    }

    /// Reads back the downstream data source.
    ///
    /// # Errors
    ///
    /// Fails on a register fault.
    pub fn downstream_data(&self) -> Result<DownstreamData> {
        Ok(match (self.bar.read(regs::TTC_DATA)? >> 16) & 0x3 {
            0x1 => DownstreamData::Pattern,
            0x2 => DownstreamData::Midtrg,
            _ => DownstreamData::Ctp,
        })
    }
}

/// Runs the generic Intel PLL calibration handshake on a register block:
/// request user access, enable calibration, and hand the bus back.
fn calibrate_pll_block(bar: &CruBar, base: usize) -> Result<()> {
    // 0x02 to user-access request register.
    bar.write(base + 0x000, 0x2)?;
    // Set the calibration enable bit.
    bar.modify(base + 0x100, 1, 1, 0x1)?;
    // Release bus arbitration back to the hardware.
    bar.write(base + 0x000, 0x1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocard_mmio::BarRegion;

    fn bar2() -> CruBar {
        CruBar::new(BarRegion::anonymous(0x800000, 2))
    }

    #[test]
    fn clock_selection_roundtrip() {
        let bar = bar2();
        let ttc = Ttc::new(&bar);
        ttc.set_clock(Clock::Local).unwrap();
        assert_eq!(ttc.clock().unwrap(), Clock::Local);
        ttc.set_clock(Clock::Ttc).unwrap();
        assert_eq!(ttc.clock().unwrap(), Clock::Ttc);
    }

    #[test]
    fn downstream_data_roundtrip() {
        let bar = bar2();
        let ttc = Ttc::new(&bar);
        for data in [DownstreamData::Ctp, DownstreamData::Pattern, DownstreamData::Midtrg] {
            ttc.select_downstream_data(data).unwrap();
            assert_eq!(ttc.downstream_data().unwrap(), data);
        }
    }

    #[test]
    fn downstream_selection_leaves_clock_bits() {
        let bar = bar2();
        let ttc = Ttc::new(&bar);
        ttc.set_clock(Clock::Local).unwrap();
        ttc.select_downstream_data(DownstreamData::Pattern).unwrap();
        assert_eq!(ttc.clock().unwrap(), Clock::Local);
    }

    #[test]
    fn pon_calibration_failure_reports_status() {
        let bar = bar2();
        let ttc = Ttc::new(&bar);
        // Status register reads 0 → not calibrated.
        match ttc.configure_pon_tx(0x2a) {
            Err(Error::PonCalibrationFailed { status: 0 }) => {}
            other => panic!("expected PonCalibrationFailed, got {other:?}"),
        }
        // Simulate a locked transmitter.
        bar.region()
            .write32(regs::ONU_USER_LOGIC + ONU_CALIBRATION_STATUS, ONU_CALIBRATED)
            .unwrap();
        ttc.configure_pon_tx(0x2a).unwrap();
        // The ONU address landed in bits [8:1].
        let logic = bar.region().read32(regs::ONU_USER_LOGIC).unwrap();
        assert_eq!((logic >> 1) & 0xff, 0x2a);
    }
}
