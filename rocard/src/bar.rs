//! BAR-only sessions: the common accessor surface over the card families.
//!
//! Tools that read registers or run card bring-up do not need a DMA
//! channel; the factory hands them a [`Bar`] instead. Like the transfer
//! engines, the family is decided once at open time and dispatched through
//! a sum type.

use crate::crorc::CrorcBar;
use crate::cru::CruBar;
use crate::dummy::DummyBar;
use crate::error::{Error, Result};
use crate::types::CardType;

/// One mapped BAR of whichever card family.
#[derive(Debug)]
pub enum Bar {
    /// CRU accessor.
    Cru(CruBar),
    /// CRORC accessor.
    Crorc(CrorcBar),
    /// Dummy accessor.
    Dummy(DummyBar),
}

impl Bar {
    /// The family of the card behind this BAR.
    #[must_use]
    pub fn card_type(&self) -> CardType {
        match self {
            Bar::Cru(_) => CardType::Cru,
            Bar::Crorc(_) => CardType::Crorc,
            Bar::Dummy(_) => CardType::Dummy,
        }
    }

    /// BAR index.
    #[must_use]
    pub fn index(&self) -> u32 {
        match self {
            Bar::Cru(bar) => bar.index(),
            Bar::Crorc(bar) => bar.index(),
            Bar::Dummy(bar) => bar.index(),
        }
    }

    /// BAR size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Bar::Cru(bar) => bar.size(),
            Bar::Crorc(bar) => bar.size(),
            Bar::Dummy(bar) => bar.size(),
        }
    }

    fn region(&self) -> &rocard_mmio::BarRegion {
        match self {
            Bar::Cru(bar) => bar.region(),
            Bar::Crorc(bar) => bar.region(),
            Bar::Dummy(bar) => bar.region(),
        }
    }

    /// Raw 32-bit register read (register tools).
    ///
    /// # Errors
    ///
    /// Offset violations per the register-space contract.
    pub fn read32(&self, offset: usize) -> Result<u32> {
        self.region()
            .read32(offset)
            .map_err(|e| Error::from_mmio(e, self.index()))
    }

    /// Raw 32-bit register write (register tools).
    ///
    /// # Errors
    ///
    /// Offset violations per the register-space contract.
    pub fn write32(&self, offset: usize, value: u32) -> Result<()> {
        self.region()
            .write32(offset, value)
            .map_err(|e| Error::from_mmio(e, self.index()))
    }

    /// Serial number, when the card exposes one.
    ///
    /// # Errors
    ///
    /// Propagates register errors, including `InvalidSerial`.
    pub fn serial(&self) -> Result<Option<i32>> {
        match self {
            Bar::Cru(bar) => Ok(Some(bar.serial_number()? as i32)),
            Bar::Crorc(bar) => bar.serial(),
            Bar::Dummy(_) => Ok(Some(crate::dummy::DUMMY_SERIAL)),
        }
    }

    /// Temperature in °C, when the card has a readable sensor.
    ///
    /// # Errors
    ///
    /// Propagates register errors.
    pub fn temperature(&self) -> Result<Option<f32>> {
        match self {
            Bar::Cru(bar) => bar.temperature_celsius(),
            Bar::Crorc(_) | Bar::Dummy(_) => Ok(None),
        }
    }

    /// Firmware identity, when the card exposes one.
    ///
    /// # Errors
    ///
    /// Propagates register errors.
    pub fn firmware_info(&self) -> Result<Option<String>> {
        match self {
            Bar::Cru(bar) => Ok(Some(bar.firmware_info()?)),
            Bar::Crorc(bar) => Ok(Some(bar.firmware_version()?)),
            Bar::Dummy(_) => Ok(None),
        }
    }

    /// Card id string, when the card exposes one.
    ///
    /// # Errors
    ///
    /// Propagates register errors.
    pub fn card_id(&self) -> Result<Option<String>> {
        match self {
            Bar::Cru(bar) => Ok(Some(bar.card_id_string()?)),
            Bar::Crorc(_) | Bar::Dummy(_) => Ok(None),
        }
    }

    /// Full card bring-up (CRU only).
    ///
    /// # Errors
    ///
    /// `ParameterNotApplicable` on other families; bring-up errors on CRU.
    pub fn configure(&self) -> Result<()> {
        match self {
            Bar::Cru(bar) => bar.configure(),
            Bar::Dummy(_) => Ok(()),
            Bar::Crorc(_) => Err(Error::ParameterNotApplicable {
                parameter: "configure",
                reason: "card bring-up is only supported on the CRU".into(),
            }),
        }
    }

    /// Bring-up only when the card state differs (CRU only).
    ///
    /// # Errors
    ///
    /// `ParameterNotApplicable` on other families; bring-up errors on CRU.
    pub fn reconfigure(&self) -> Result<()> {
        match self {
            Bar::Cru(bar) => bar.reconfigure(),
            Bar::Dummy(_) => Ok(()),
            Bar::Crorc(_) => Err(Error::ParameterNotApplicable {
                parameter: "configure",
                reason: "card bring-up is only supported on the CRU".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_bar_raw_access() {
        let bar = Bar::Dummy(DummyBar::new(0));
        bar.write32(0x40, 0x1234_5678).unwrap();
        assert_eq!(bar.read32(0x40).unwrap(), 0x1234_5678);
        assert_eq!(bar.card_type(), CardType::Dummy);
        assert_eq!(bar.serial().unwrap(), Some(crate::dummy::DUMMY_SERIAL));
    }

    #[test]
    fn out_of_range_keeps_bar_context() {
        let bar = Bar::Dummy(DummyBar::new(3));
        match bar.read32(0x100000) {
            Err(Error::BarOutOfRange { bar: 3, .. }) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn configure_is_cru_only() {
        let bar = Bar::Crorc(CrorcBar::new(rocard_mmio::BarRegion::anonymous(0x1000, 0)));
        assert!(matches!(
            bar.configure(),
            Err(Error::ParameterNotApplicable { .. })
        ));
    }
}
