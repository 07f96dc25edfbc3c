//! Software-only stand-in card.
//!
//! Lets everything above the factory run without PCIe hardware: the BAR is
//! anonymous memory, and the transfer engine completes every pushed
//! superpage on the next `fill_superpages` call. Selected through the
//! factory with the magic serial −1. A testing collaborator, not part of
//! the production contract.

use std::collections::VecDeque;

use rocard_mmio::BarRegion;

use crate::channel::DmaState;
use crate::error::{Error, Result};
use crate::superpage::Superpage;

/// Serial number that selects the dummy card in the factory.
pub const DUMMY_SERIAL: i32 = -1;

/// Size of the dummy's anonymous BAR.
const DUMMY_BAR_SIZE: usize = 32 * 1024;

/// Queue depth, mirroring the real cards' descriptor rings.
const QUEUE_CAPACITY: usize = 128;

/// An anonymous-memory BAR that accepts any in-range access.
#[derive(Debug, Clone)]
pub struct DummyBar {
    bar: BarRegion,
}

impl DummyBar {
    /// Creates a dummy BAR with the given index.
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self {
            bar: BarRegion::anonymous(DUMMY_BAR_SIZE, index),
        }
    }

    /// The underlying region.
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
}

impl Default for DummyBar {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Transfer engine that loops every superpage straight back.
#[derive(Debug, Default)]
pub struct DummyDmaChannel {
    transfer_queue: VecDeque<Superpage>,
    ready_queue: VecDeque<Superpage>,
    dma_state: DmaState,
    /// Buffer bound at open, when one was supplied.
    buffer_size: Option<usize>,
}

impl DummyDmaChannel {
    /// Creates the engine; `buffer_size` enables bounds checking when the
    /// caller bound a buffer.
    #[must_use]
    pub fn new(buffer_size: Option<usize>) -> Self {
        Self {
            buffer_size,
            ..Self::default()
        }
    }

    fn require_started(&self, operation: &'static str) -> Result<()> {
        if self.dma_state == DmaState::Started {
            Ok(())
        } else {
            Err(Error::InvalidDmaState {
                operation,
                state: self.dma_state.as_str(),
            })
        }
    }

    /// Current DMA state.
    #[must_use]
    pub fn dma_state(&self) -> DmaState {
        self.dma_state
    }

    /// Starts the loopback engine.
    ///
    /// # Errors
    ///
    /// `InvalidDmaState` when already started.
    pub fn start_dma(&mut self) -> Result<()> {
        if self.dma_state == DmaState::Started {
            return Err(Error::InvalidDmaState {
                operation: "start DMA",
                state: self.dma_state.as_str(),
            });
        }
        self.transfer_queue.clear();
        self.ready_queue.clear();
        self.dma_state = DmaState::Started;
        Ok(())
    }

    /// Stops the engine, flushing in-flight superpages.
    ///
    /// # Errors
    ///
    /// `InvalidDmaState` when not started.
    pub fn stop_dma(&mut self) -> Result<()> {
        self.require_started("stop DMA")?;
        while let Some(mut superpage) = self.transfer_queue.pop_front() {
            superpage.ready = true;
            superpage.received = superpage.size;
            self.ready_queue.push_back(superpage);
        }
        self.dma_state = DmaState::Stopped;
        Ok(())
    }

    /// Accepts a superpage for immediate loopback.
    ///
    /// # Errors
    ///
    /// `TransferQueueFull` at queue depth, `InvalidSuperpage` for a region
    /// outside a bound buffer.
    pub fn push_superpage(&mut self, superpage: Superpage) -> Result<()> {
        self.require_started("push superpage")?;
        if superpage.size == 0 {
            return Err(Error::InvalidSuperpage {
                offset: superpage.offset,
                size: superpage.size,
                reason: "size is zero",
            });
        }
        if let Some(buffer_size) = self.buffer_size {
            if superpage
                .offset
                .checked_add(superpage.size)
                .is_none_or(|end| end > buffer_size)
            {
                return Err(Error::InvalidSuperpage {
                    offset: superpage.offset,
                    size: superpage.size,
                    reason: "region exceeds the DMA buffer",
                });
            }
        }
        if self.transfer_queue.len() >= QUEUE_CAPACITY {
            return Err(Error::TransferQueueFull);
        }
        self.transfer_queue.push_back(superpage);
        Ok(())
    }

    /// Completes everything in flight.
    ///
    /// # Errors
    ///
    /// `InvalidDmaState` when not started.
    pub fn fill_superpages(&mut self) -> Result<()> {
        self.require_started("fill superpages")?;
        while let Some(mut superpage) = self.transfer_queue.pop_front() {
            superpage.ready = true;
            superpage.received = superpage.size;
            self.ready_queue.push_back(superpage);
        }
        Ok(())
    }

    /// The head of the ready queue, without popping it.
    ///
    /// # Errors
    ///
    /// `ReadyQueueEmpty` when nothing has been delivered.
    pub fn get_superpage(&self) -> Result<Superpage> {
        self.ready_queue
            .front()
            .copied()
            .ok_or(Error::ReadyQueueEmpty)
    }

    /// Pops and returns the head of the ready queue.
    ///
    /// # Errors
    ///
    /// `ReadyQueueEmpty` when nothing has been delivered.
    pub fn pop_superpage(&mut self) -> Result<Superpage> {
        self.ready_queue.pop_front().ok_or(Error::ReadyQueueEmpty)
    }

    /// Free slots in the transfer queue.
    #[must_use]
    pub fn transfer_queue_available(&self) -> usize {
        QUEUE_CAPACITY - self.transfer_queue.len()
    }

    /// Superpages awaiting pickup.
    #[must_use]
    pub fn ready_queue_size(&self) -> usize {
        self.ready_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_roundtrip() {
        let mut channel = DummyDmaChannel::new(Some(1024 * 1024));
        channel.start_dma().unwrap();
        channel.push_superpage(Superpage::new(0, 32 * 1024)).unwrap();
        channel
            .push_superpage(Superpage::new(32 * 1024, 32 * 1024))
            .unwrap();
        channel.fill_superpages().unwrap();

        let first = channel.pop_superpage().unwrap();
        assert!(first.ready);
        assert_eq!(first.received, first.size);
        assert_eq!(first.offset, 0);
        assert_eq!(channel.ready_queue_size(), 1);
    }

    #[test]
    fn bounds_checked_when_buffer_known() {
        let mut channel = DummyDmaChannel::new(Some(64 * 1024));
        channel.start_dma().unwrap();
        assert!(matches!(
            channel.push_superpage(Superpage::new(64 * 1024, 32 * 1024)),
            Err(Error::InvalidSuperpage { .. })
        ));
    }

    #[test]
    fn capacity_matches_real_rings() {
        let mut channel = DummyDmaChannel::new(None);
        channel.start_dma().unwrap();
        for i in 0..QUEUE_CAPACITY {
            channel
                .push_superpage(Superpage::new(i * 4096, 4096))
                .unwrap();
        }
        assert!(matches!(
            channel.push_superpage(Superpage::new(0, 4096)),
            Err(Error::TransferQueueFull)
        ));
    }
}
