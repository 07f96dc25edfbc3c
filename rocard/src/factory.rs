//! Channel and BAR assembly.
//!
//! The factory is the only place the pieces meet: it resolves the card,
//! takes the channel lock, binds the DMA buffer, maps the BARs, and builds
//! the family-specific engine. The magic serial −1 short-circuits to the
//! dummy card so everything above can run without hardware.

use crate::bar::Bar;
use crate::channel::DmaChannel;
use crate::crorc::{CrorcBar, CrorcDmaChannel, ReadyFifo, DEFAULT_DMA_PAGE_SIZE};
use crate::cru::{CruBar, CruDmaChannel, DMA_PAGE_SIZE};
use crate::dummy::{DummyBar, DummyDmaChannel, DUMMY_SERIAL};
use crate::error::{Error, Result};
use crate::lock::ChannelLock;
use crate::memory::DmaMemory;
use crate::parameters::{BufferParameters, CardId, Parameters};
use crate::paths::ChannelPaths;
use crate::registry::{DeviceHandle, DeviceRegistry};
use crate::types::CardType;

/// Builds channels and BAR sessions from [`Parameters`].
#[derive(Debug, Default)]
pub struct ChannelFactory;

impl ChannelFactory {
    /// The serial number that selects the dummy card.
    #[must_use]
    pub fn dummy_serial() -> i32 {
        DUMMY_SERIAL
    }

    /// Opens a DMA channel.
    ///
    /// # Errors
    ///
    /// Resolution (`CardNotFound`/`AmbiguousCardId`), locking
    /// (`ChannelBusy`), buffer binding, BAR mapping, and engine
    /// construction errors.
    pub fn obtain_channel(&self, params: &Parameters) -> Result<DmaChannel> {
        let card_id = params.require_card_id()?;

        if is_dummy(&card_id) {
            let buffer_size = match params.buffer_parameters() {
                Some(BufferParameters::Memory { size, .. })
                | Some(BufferParameters::File { size, .. }) => Some(*size),
                None => None,
            };
            log::info!("opening dummy DMA channel");
            return Ok(DmaChannel::Dummy(DummyDmaChannel::new(buffer_size)));
        }

        // Reclaim pinnings from crashed owners before adding our own.
        match crate::memory::cleanup_orphans(&crate::paths::buffer_registry_dir()) {
            Ok(reclaimed) if !reclaimed.is_empty() => {
                log::info!("reclaimed {} orphaned buffer registration(s)", reclaimed.len());
            }
            Ok(_) => {}
            Err(err) => log::warn!("orphaned buffer scan failed: {err}"),
        }

        let registry = DeviceRegistry::open()?;
        let handle = registry.find(&card_id)?;
        let descriptor = handle.descriptor().clone();
        let channel_number = params.require_channel_number()?;
        check_channel_number(descriptor.card_type, channel_number)?;

        let paths = ChannelPaths::new(descriptor.pci_address, channel_number);
        let lock = ChannelLock::acquire(&paths.lock())?;

        log::info!(
            "opening {} channel {channel_number} on {} (serial {})",
            descriptor.card_type,
            descriptor.pci_address,
            descriptor.serial_id,
        );

        match descriptor.card_type {
            CardType::Cru => self.build_cru(&handle, channel_number, lock, params),
            CardType::Crorc => self.build_crorc(&handle, &paths, channel_number, lock, params),
            CardType::Dummy => unreachable!("dummy cards are not enumerated"),
        }
    }

    fn build_cru(
        &self,
        handle: &DeviceHandle,
        channel_number: u32,
        lock: ChannelLock,
        params: &Parameters,
    ) -> Result<DmaChannel> {
        let memory = DmaMemory::bind(
            params.require_buffer_parameters()?,
            DMA_PAGE_SIZE,
            Some(registration_id(handle, channel_number)),
        )?;
        let bar0 = CruBar::new(handle.bar(0)?);
        let bar2 = CruBar::with_parameters(handle.bar(2)?, params);
        Ok(DmaChannel::Cru(CruDmaChannel::new(
            bar0,
            bar2,
            memory,
            Some(lock),
            params,
        )?))
    }

    fn build_crorc(
        &self,
        handle: &DeviceHandle,
        paths: &ChannelPaths,
        channel_number: u32,
        lock: ChannelLock,
        params: &Parameters,
    ) -> Result<DmaChannel> {
        let page_size = params
            .dma_page_size()
            .copied()
            .unwrap_or(DEFAULT_DMA_PAGE_SIZE);
        let memory = DmaMemory::bind(
            params.require_buffer_parameters()?,
            page_size,
            Some(registration_id(handle, channel_number)),
        )?;
        let bar = CrorcBar::new(handle.bar(0)?);
        let fifo = ReadyFifo::create(&paths.fifo())?;
        Ok(DmaChannel::Crorc(CrorcDmaChannel::new(
            bar,
            memory,
            fifo,
            Some(lock),
            params,
        )?))
    }

    /// Opens a BAR-only session; `channel_number` selects the BAR index
    /// (the convention the register tools use).
    ///
    /// # Errors
    ///
    /// Resolution and BAR mapping errors.
    pub fn obtain_bar(&self, params: &Parameters) -> Result<Bar> {
        let card_id = params.require_card_id()?;
        let bar_index = params.channel_number().copied().unwrap_or(0);

        if is_dummy(&card_id) {
            return Ok(Bar::Dummy(DummyBar::new(bar_index)));
        }

        let registry = DeviceRegistry::open()?;
        let handle = registry.find(&card_id)?;
        let region = handle.bar(bar_index)?;
        Ok(match handle.descriptor().card_type {
            CardType::Cru => Bar::Cru(CruBar::with_parameters(region, params)),
            CardType::Crorc => Bar::Crorc(CrorcBar::new(region)),
            CardType::Dummy => unreachable!("dummy cards are not enumerated"),
        })
    }
}

fn is_dummy(card_id: &CardId) -> bool {
    matches!(card_id, CardId::Serial(id) if id.serial == DUMMY_SERIAL)
}

/// Name of the DMA buffer registration marker for one channel.
fn registration_id(handle: &DeviceHandle, channel: u32) -> String {
    let address = handle.descriptor().pci_address;
    format!(
        "{:02x}_{:02x}_{}_ch{channel}_pages",
        address.bus, address.device, address.function
    )
}

/// Channels available per card family.
fn check_channel_number(card_type: CardType, channel: u32) -> Result<()> {
    let allowed = match card_type {
        // One DMA channel per CRU endpoint.
        CardType::Cru => 0..1,
        // The C-RORC serves six DDL channels.
        CardType::Crorc => 0..6,
        CardType::Dummy => 0..u32::MAX,
    };
    if allowed.contains(&channel) {
        Ok(())
    } else {
        Err(Error::InvalidChannelNumber { channel })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SerialId;

    #[test]
    fn dummy_serial_opens_without_hardware() {
        let params = Parameters::for_channel(
            CardId::Serial(SerialId::new(DUMMY_SERIAL, 0)),
            0,
        );
        let factory = ChannelFactory;
        let channel = factory.obtain_channel(&params).unwrap();
        assert_eq!(channel.card_type(), CardType::Dummy);

        let bar = factory.obtain_bar(&params).unwrap();
        assert_eq!(bar.card_type(), CardType::Dummy);
    }

    #[test]
    fn channel_numbers_are_family_gated() {
        assert!(check_channel_number(CardType::Cru, 0).is_ok());
        assert!(matches!(
            check_channel_number(CardType::Cru, 1),
            Err(Error::InvalidChannelNumber { channel: 1 })
        ));
        assert!(check_channel_number(CardType::Crorc, 5).is_ok());
        assert!(check_channel_number(CardType::Crorc, 6).is_err());
    }
}
