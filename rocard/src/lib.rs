//! Host-side DMA driver core for ALICE readout cards.
//!
//! Two PCIe card families, the C-RORC and the CRU, stream detector
//! fragments into host memory. This crate implements the transfer engines
//! that cooperate with the cards' firmware FIFOs, plus the resource stack
//! underneath them: pinned DMA buffers with scatter-gather translation,
//! typed BAR accessors, card enumeration, and cross-process channel locks.
//!
//! The entry point is the [`ChannelFactory`]: give it [`Parameters`] naming
//! a card, a channel, and a buffer, and it assembles a [`DmaChannel`]. The
//! steady-state loop is then
//!
//! ```ignore
//! channel.start_dma()?;
//! loop {
//!     while channel.transfer_queue_available() > 0 {
//!         channel.push_superpage(next_free_region())?;
//!     }
//!     channel.fill_superpages()?;
//!     while channel.ready_queue_size() > 0 {
//!         consume(channel.pop_superpage()?);
//!     }
//! }
//! ```
//!
//! A channel is single-threaded and cooperative; channels are independent
//! of each other and may be driven from different threads.

pub mod bar;
pub mod channel;
pub mod config;
pub mod crorc;
pub mod cru;
pub mod dummy;
pub mod error;
pub mod factory;
pub mod lock;
pub mod memory;
pub mod parameters;
pub mod paths;
pub mod registry;
pub mod superpage;
pub mod types;

pub use bar::Bar;
pub use channel::{DmaChannel, DmaState};
pub use config::CardConfigurator;
pub use error::{Error, Result};
pub use factory::ChannelFactory;
pub use lock::ChannelLock;
pub use memory::{cleanup_orphans, DmaMemory, Segment};
pub use parameters::{BufferParameters, CardId, Parameters};
pub use registry::{CardDescriptor, DeviceRegistry};
pub use superpage::Superpage;
pub use types::{
    CardType, Clock, DatapathMode, DownstreamData, GbtMode, GbtMux, GeneratorPattern,
    LoopbackMode, ResetLevel, SerialId,
};
