//! The uniform transfer contract over the card-specific engines.
//!
//! The card family is decided once at open time; afterwards every call
//! dispatches through the [`DmaChannel`] sum type. A channel is
//! single-threaded and cooperative: the caller drives progress by invoking
//! `fill_superpages` / `push_superpage` / `pop_superpage` from one thread,
//! and two threads on the same channel are not supported.

use crate::crorc::CrorcDmaChannel;
use crate::cru::CruDmaChannel;
use crate::dummy::DummyDmaChannel;
use crate::error::Result;
use crate::superpage::Superpage;
use crate::types::{CardType, ResetLevel};

/// Whether the DMA engine is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DmaState {
    /// Not transferring; bring-up and reset are legal.
    #[default]
    Stopped,
    /// Transferring; push/fill/pop are legal.
    Started,
}

impl DmaState {
    /// Lower-case name for messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DmaState::Stopped => "stopped",
            DmaState::Started => "started",
        }
    }
}

/// One open DMA channel of whichever card family.
#[derive(Debug)]
pub enum DmaChannel {
    /// CRU superpage engine.
    Cru(CruDmaChannel),
    /// CRORC page engine.
    Crorc(CrorcDmaChannel),
    /// Software loopback engine.
    Dummy(DummyDmaChannel),
}

macro_rules! dispatch {
    ($self:expr, $channel:ident => $body:expr) => {
        match $self {
            DmaChannel::Cru($channel) => $body,
            DmaChannel::Crorc($channel) => $body,
            DmaChannel::Dummy($channel) => $body,
        }
    };
}

impl DmaChannel {
    /// The family of the card behind this channel.
    #[must_use]
    pub fn card_type(&self) -> CardType {
        match self {
            DmaChannel::Cru(_) => CardType::Cru,
            DmaChannel::Crorc(_) => CardType::Crorc,
            DmaChannel::Dummy(_) => CardType::Dummy,
        }
    }

    /// Current DMA state.
    #[must_use]
    pub fn dma_state(&self) -> DmaState {
        dispatch!(self, channel => channel.dma_state())
    }

    /// Starts (or arms) the DMA engine.
    ///
    /// # Errors
    ///
    /// See the engine implementations.
    pub fn start_dma(&mut self) -> Result<()> {
        dispatch!(self, channel => channel.start_dma())
    }

    /// Stops the DMA engine, reclaiming in-flight superpages into the
    /// ready queue. The next `start_dma` is legal afterwards.
    ///
    /// # Errors
    ///
    /// See the engine implementations.
    pub fn stop_dma(&mut self) -> Result<()> {
        dispatch!(self, channel => channel.stop_dma())
    }

    /// Resets the channel at the given level.
    ///
    /// # Errors
    ///
    /// See the engine implementations.
    pub fn reset_channel(&mut self, level: ResetLevel) -> Result<()> {
        match self {
            DmaChannel::Cru(channel) => channel.reset_channel(level),
            DmaChannel::Crorc(channel) => channel.reset_channel(level),
            DmaChannel::Dummy(_) => Ok(()),
        }
    }

    /// Hands a superpage to the engine for filling.
    ///
    /// # Errors
    ///
    /// See the engine implementations.
    pub fn push_superpage(&mut self, superpage: Superpage) -> Result<()> {
        dispatch!(self, channel => channel.push_superpage(superpage))
    }

    /// Polls completions and promotes finished superpages to the ready
    /// queue.
    ///
    /// # Errors
    ///
    /// See the engine implementations.
    pub fn fill_superpages(&mut self) -> Result<()> {
        dispatch!(self, channel => channel.fill_superpages())
    }

    /// The head of the ready queue, without popping it.
    ///
    /// # Errors
    ///
    /// `ReadyQueueEmpty` when nothing has been delivered.
    pub fn get_superpage(&self) -> Result<Superpage> {
        dispatch!(self, channel => channel.get_superpage())
    }

    /// Pops and returns the head of the ready queue.
    ///
    /// # Errors
    ///
    /// `ReadyQueueEmpty` when nothing has been delivered.
    pub fn pop_superpage(&mut self) -> Result<Superpage> {
        dispatch!(self, channel => channel.pop_superpage())
    }

    /// Free slots on the transfer side.
    #[must_use]
    pub fn transfer_queue_available(&self) -> usize {
        dispatch!(self, channel => channel.transfer_queue_available())
    }

    /// Superpages delivered and awaiting pickup.
    #[must_use]
    pub fn ready_queue_size(&self) -> usize {
        dispatch!(self, channel => channel.ready_queue_size())
    }

    /// Injects one error into a generated data stream; returns whether the
    /// card's generator was armed to do so.
    ///
    /// # Errors
    ///
    /// See the engine implementations.
    pub fn inject_error(&self) -> Result<bool> {
        match self {
            DmaChannel::Cru(channel) => channel.inject_error(),
            DmaChannel::Crorc(_) | DmaChannel::Dummy(_) => Ok(false),
        }
    }

    /// Serial number, when the card exposes one.
    ///
    /// # Errors
    ///
    /// See the engine implementations.
    pub fn serial(&self) -> Result<Option<i32>> {
        match self {
            DmaChannel::Cru(channel) => channel.serial(),
            DmaChannel::Crorc(channel) => channel.serial(),
            DmaChannel::Dummy(_) => Ok(Some(crate::dummy::DUMMY_SERIAL)),
        }
    }

    /// Temperature in °C, when the card has a readable sensor.
    ///
    /// # Errors
    ///
    /// See the engine implementations.
    pub fn temperature(&self) -> Result<Option<f32>> {
        match self {
            DmaChannel::Cru(channel) => channel.temperature(),
            DmaChannel::Crorc(_) | DmaChannel::Dummy(_) => Ok(None),
        }
    }

    /// Firmware identity, when the card exposes one.
    ///
    /// # Errors
    ///
    /// See the engine implementations.
    pub fn firmware_info(&self) -> Result<Option<String>> {
        match self {
            DmaChannel::Cru(channel) => channel.firmware_info(),
            DmaChannel::Crorc(channel) => channel.firmware_info(),
            DmaChannel::Dummy(_) => Ok(None),
        }
    }

    /// Card id string, when the card exposes one.
    ///
    /// # Errors
    ///
    /// See the engine implementations.
    pub fn card_id(&self) -> Result<Option<String>> {
        match self {
            DmaChannel::Cru(channel) => channel.card_id(),
            DmaChannel::Crorc(_) | DmaChannel::Dummy(_) => Ok(None),
        }
    }
}
