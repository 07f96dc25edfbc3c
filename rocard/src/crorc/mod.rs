//! CRORC card family: BAR accessor, DDL command plumbing, the ready-FIFO,
//! and the page DMA engine.

mod bar;
mod channel;
mod ready_fifo;
pub mod regs;

pub use bar::{CrorcBar, DiuConfig, DiuVersion};
pub use channel::CrorcDmaChannel;
pub use ready_fifo::{DataArrival, ReadyFifo, READY_FIFO_ENTRIES};

/// Default CRORC DMA page size in bytes (card-configurable).
pub const DEFAULT_DMA_PAGE_SIZE: usize = 8 * 1024;
