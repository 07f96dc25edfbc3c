//! The CRU superpage DMA engine.
//!
//! One instance per open channel. The client hands in superpages, the
//! engine pushes their descriptors to the least-loaded link, polls the
//! firmware completion counters, and delivers filled superpages back
//! through the ready queue. Single-threaded and cooperative: the caller
//! drives all progress through `fill_superpages`.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use super::bar::{CruBar, FirmwareFeatures};
use super::{regs, DMA_PAGE_SIZE, MAX_LINKS, MAX_SUPERPAGE_DESCRIPTORS};
use crate::channel::DmaState;
use crate::error::{Error, FatalKind, Result};
use crate::lock::ChannelLock;
use crate::memory::DmaMemory;
use crate::parameters::Parameters;
use crate::superpage::Superpage;
use crate::types::{GeneratorPattern, LoopbackMode};

/// Max superpages outstanding per link; equals the firmware descriptor
/// ring depth. Exceeding it host-side is a bug, firmware-side never allowed.
const LINK_QUEUE_CAPACITY: usize = MAX_SUPERPAGE_DESCRIPTORS;

/// One enabled link and its in-flight superpages.
#[derive(Debug)]
struct Link {
    /// Link id on the card.
    id: u32,
    /// Superpages received from this link since `start_dma`.
    superpage_counter: u32,
    /// Superpages pushed to the firmware and not yet completed, in push
    /// order (completions are strictly FIFO per link).
    queue: VecDeque<Superpage>,
}

/// The CRU transfer engine.
#[derive(Debug)]
pub struct CruDmaChannel {
    bar0: CruBar,
    bar2: CruBar,
    features: FirmwareFeatures,
    memory: DmaMemory,
    /// Held for the channel lifetime; absent only on engine-level tests.
    _lock: Option<ChannelLock>,
    links: Vec<Link>,
    /// Free descriptor slots summed over all links.
    link_queues_available: usize,
    ready_queue: VecDeque<Superpage>,
    ready_queue_capacity: usize,
    dma_state: DmaState,
    poison: Option<FatalKind>,
    loopback: LoopbackMode,
    generator_enabled: bool,
    generator_pattern: GeneratorPattern,
    generator_data_size: usize,
    generator_random_size: bool,
}

impl CruDmaChannel {
    /// Builds the engine from its already-acquired resources.
    ///
    /// # Errors
    ///
    /// Rejects a non-8 KiB `dma_page_size` (`ParameterNotApplicable`), a
    /// DIU/SIU loopback (`UnsupportedLoopback`, the CRU has no DDL), and
    /// link ids beyond the card.
    pub fn new(
        bar0: CruBar,
        bar2: CruBar,
        memory: DmaMemory,
        lock: Option<ChannelLock>,
        params: &Parameters,
    ) -> Result<Self> {
        if let Some(&page_size) = params.dma_page_size() {
            if page_size != DMA_PAGE_SIZE {
                return Err(Error::ParameterNotApplicable {
                    parameter: "dmaPageSize",
                    reason: format!(
                        "CRU only supports the fixed {DMA_PAGE_SIZE} byte page size, got {page_size}"
                    ),
                });
            }
        }

        let mut loopback = params
            .loopback_mode()
            .copied()
            .unwrap_or(LoopbackMode::None);
        if loopback.is_external() {
            return Err(Error::UnsupportedLoopback {
                mode: loopback,
                reason: "the CRU has no DIU/SIU stage",
            });
        }

        let generator_enabled = params.generator_enabled().copied().unwrap_or(true);
        if generator_enabled && loopback == LoopbackMode::None {
            log::info!("no loopback mode specified; defaulting to internal");
            loopback = LoopbackMode::Internal;
        }

        let mut links = Vec::new();
        let default_mask = std::collections::BTreeSet::from([0]);
        for &id in params.link_mask().unwrap_or(&default_mask) {
            if id >= MAX_LINKS {
                return Err(Error::InvalidLinkId {
                    link: id,
                    max: MAX_LINKS - 1,
                });
            }
            links.push(Link {
                id,
                superpage_counter: 0,
                queue: VecDeque::with_capacity(LINK_QUEUE_CAPACITY),
            });
        }
        log::info!(
            "enabling link(s): {:?}",
            links.iter().map(|l| l.id).collect::<Vec<_>>()
        );

        let features = bar0.firmware_features()?;
        if features.standalone {
            log::info!("standalone firmware, features: {features:?}");
        }

        let ready_queue_capacity = LINK_QUEUE_CAPACITY * links.len();
        let link_queues_available = ready_queue_capacity;

        Ok(Self {
            bar0,
            bar2,
            features,
            memory,
            _lock: lock,
            links,
            link_queues_available,
            ready_queue: VecDeque::new(),
            ready_queue_capacity,
            dma_state: DmaState::Stopped,
            poison: None,
            loopback,
            generator_enabled,
            generator_pattern: params
                .generator_pattern()
                .copied()
                .unwrap_or(GeneratorPattern::Incremental),
            generator_data_size: params
                .generator_data_size()
                .copied()
                .unwrap_or(DMA_PAGE_SIZE),
            generator_random_size: params
                .generator_random_size_enabled()
                .copied()
                .unwrap_or(false),
        })
    }

    fn check_poison(&self) -> Result<()> {
        match self.poison {
            Some(kind) => Err(kind.into()),
            None => Ok(()),
        }
    }

    fn require_state(&self, required: DmaState, operation: &'static str) -> Result<()> {
        if self.dma_state == required {
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

    /// Enables the links, configures generator and data source, resets the
    /// card, and switches the emulator (and with it the DMA engine) on.
    ///
    /// # Errors
    ///
    /// Propagates poisoning, state, loopback-legality and register errors.
    pub fn start_dma(&mut self) -> Result<()> {
        self.check_poison()?;
        self.require_state(DmaState::Stopped, "start DMA")?;

        // One bit per enabled link, programmed through the datapath wrapper.
        let mut mask = 0u32;
        for link in &self.links {
            mask |= 1 << link.id;
        }
        self.bar2.set_links_enabled(mask)?;

        if self.generator_enabled {
            if self.loopback != LoopbackMode::Internal {
                return Err(Error::UnsupportedLoopback {
                    mode: self.loopback,
                    reason: "the CRU data generator only supports internal loopback",
                });
            }
            self.bar0.set_data_generator_pattern(
                self.generator_pattern,
                self.generator_data_size,
                self.generator_random_size,
            )?;
            if self.features.data_selection {
                self.bar0.set_data_source(regs::DATA_SOURCE_INTERNAL)?;
            } else {
                log::warn!("firmware cannot select the internal data source");
            }
        } else {
            if self.loopback != LoopbackMode::None {
                return Err(Error::UnsupportedLoopback {
                    mode: self.loopback,
                    reason: "loopback without the data generator",
                });
            }
            if self.features.data_selection {
                self.bar0.set_data_source(regs::DATA_SOURCE_GBT)?;
            } else {
                log::warn!("firmware cannot select the front-end data source");
            }
        }

        self.reset_cru()?;

        for link in &mut self.links {
            link.queue.clear();
            link.superpage_counter = 0;
        }
        self.ready_queue.clear();
        self.link_queues_available = LINK_QUEUE_CAPACITY * self.links.len();

        self.bar0.set_data_emulator_enabled(true)?;
        thread::sleep(Duration::from_millis(10));

        self.dma_state = DmaState::Started;
        log::info!("DMA started");
        Ok(())
    }

    /// Disables the emulator and reclaims the in-flight superpages into the
    /// ready queue as flushed (size preserved, `ready` set).
    ///
    /// # Errors
    ///
    /// Propagates state and register errors.
    pub fn stop_dma(&mut self) -> Result<()> {
        self.require_state(DmaState::Started, "stop DMA")?;
        self.bar0.set_data_emulator_enabled(false)?;

        let mut moved = 0usize;
        for index in 0..self.links.len() {
            while !self.links[index].queue.is_empty() {
                self.transfer_to_ready(index);
                moved += 1;
            }
        }
        debug_assert_eq!(
            self.link_queues_available,
            LINK_QUEUE_CAPACITY * self.links.len()
        );
        log::info!("moved {moved} remaining superpage(s) to ready queue");

        self.dma_state = DmaState::Stopped;
        Ok(())
    }

    /// Resets the channel at the given level. The CRU knows only one
    /// device-level reset, so anything above `Nothing` resets the card.
    ///
    /// # Errors
    ///
    /// Propagates poisoning, state and register errors.
    pub fn reset_channel(&mut self, level: crate::types::ResetLevel) -> Result<()> {
        self.check_poison()?;
        self.require_state(DmaState::Stopped, "reset channel")?;
        if level == crate::types::ResetLevel::Nothing {
            return Ok(());
        }
        self.reset_cru()
    }

    fn reset_cru(&self) -> Result<()> {
        self.bar0.reset_data_generator_counter()?;
        thread::sleep(Duration::from_millis(100));
        self.bar0.reset_card()?;
        thread::sleep(Duration::from_millis(100));
        Ok(())
    }

    /// Validates a superpage against the channel contract and the buffer.
    fn check_superpage(&self, superpage: &Superpage) -> Result<()> {
        let invalid = |reason| Error::InvalidSuperpage {
            offset: superpage.offset,
            size: superpage.size,
            reason,
        };
        if superpage.size == 0 {
            return Err(invalid("size is zero"));
        }
        if superpage.size % Superpage::SIZE_GRANULARITY != 0 {
            return Err(invalid("size is not a multiple of 32 KiB"));
        }
        if superpage.offset % 4 != 0 {
            return Err(invalid("offset is not 4-byte aligned"));
        }
        if superpage
            .offset
            .checked_add(superpage.size)
            .is_none_or(|end| end > self.memory.size())
        {
            return Err(invalid("region exceeds the DMA buffer"));
        }
        Ok(())
    }

    /// Index of the link to push to: fewest outstanding superpages, ties
    /// broken by smallest link id (the links are kept in id order).
    fn next_link_index(&self) -> usize {
        let mut best = 0;
        for (index, link) in self.links.iter().enumerate() {
            if link.queue.len() < self.links[best].queue.len() {
                best = index;
            }
        }
        best
    }

    /// Places `superpage` on the least-loaded link and pushes its
    /// descriptor to the firmware.
    ///
    /// # Errors
    ///
    /// `TransferQueueFull` when every link is at ring depth;
    /// `InvalidSuperpage` on contract violations; plus poisoning, state and
    /// register errors.
    pub fn push_superpage(&mut self, superpage: Superpage) -> Result<()> {
        self.check_poison()?;
        self.require_state(DmaState::Started, "push superpage")?;
        self.check_superpage(&superpage)?;

        if self.link_queues_available == 0 {
            return Err(Error::TransferQueueFull);
        }

        let index = self.next_link_index();
        // With slots available the least-loaded link cannot be at capacity.
        debug_assert!(self.links[index].queue.len() < LINK_QUEUE_CAPACITY);

        let bus_address = self.memory.translate(superpage.offset)?;
        let pages = (superpage.size / DMA_PAGE_SIZE) as u32;

        self.link_queues_available -= 1;
        self.links[index].queue.push_back(superpage);
        let link_id = self.links[index].id;
        self.bar0
            .push_superpage_descriptor(link_id, pages, bus_address)
    }

    /// Moves the front superpage of `links[index]` into the ready queue.
    fn transfer_to_ready(&mut self, index: usize) {
        let link = &mut self.links[index];
        let mut superpage = link.queue.pop_front().expect("transfer from empty link queue");
        superpage.ready = true;
        superpage.received = superpage.size;
        link.superpage_counter += 1;
        self.link_queues_available += 1;
        self.ready_queue.push_back(superpage);
    }

    /// Polls each link's completion counter and promotes finished
    /// superpages, in link order, until the ready queue is full.
    ///
    /// # Errors
    ///
    /// [`Error::FirmwareOvercommit`] (fatal, poisons the channel) when the
    /// firmware reports more completions than the driver has outstanding.
    pub fn fill_superpages(&mut self) -> Result<()> {
        self.check_poison()?;
        self.require_state(DmaState::Started, "fill superpages")?;

        for index in 0..self.links.len() {
            let link_id = self.links[index].id;
            let pushed = self.bar0.superpage_count(link_id)?;
            let counter = self.links[index].superpage_counter;
            if pushed <= counter {
                continue;
            }
            let available = pushed - counter;
            let outstanding = self.links[index].queue.len() as u32;
            if available > outstanding {
                let kind = FatalKind::FirmwareOvercommit {
                    link: link_id,
                    reported: available,
                    outstanding,
                };
                log::error!(
                    "firmware reported {available} completed superpage(s) on link {link_id} \
                     with only {outstanding} outstanding ({counter} received per driver, \
                     {pushed} pushed per firmware)"
                );
                self.poison = Some(kind);
                return Err(kind.into());
            }
            for _ in 0..available {
                if self.ready_queue.len() >= self.ready_queue_capacity {
                    return Ok(());
                }
                self.transfer_to_ready(index);
            }
        }
        Ok(())
    }

    /// The head of the ready queue, without popping it.
    ///
    /// # Errors
    ///
    /// `ReadyQueueEmpty` when nothing has been delivered.
    pub fn get_superpage(&self) -> Result<Superpage> {
        self.check_poison()?;
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
        self.check_poison()?;
        self.ready_queue.pop_front().ok_or(Error::ReadyQueueEmpty)
    }

    /// Free descriptor slots summed over all links.
    #[must_use]
    pub fn transfer_queue_available(&self) -> usize {
        self.link_queues_available
    }

    /// Superpages delivered and awaiting pickup.
    #[must_use]
    pub fn ready_queue_size(&self) -> usize {
        self.ready_queue.len()
    }

    /// Injects one error into the generated stream; returns whether the
    /// generator was armed to do so.
    ///
    /// # Errors
    ///
    /// Propagates register errors.
    pub fn inject_error(&self) -> Result<bool> {
        if self.generator_enabled {
            self.bar0.data_generator_inject_error()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Serial number, when the firmware exposes it.
    ///
    /// # Errors
    ///
    /// Propagates register errors, including `InvalidSerial`.
    pub fn serial(&self) -> Result<Option<i32>> {
        if self.features.serial {
            Ok(Some(self.bar2.serial_number()? as i32))
        } else {
            Ok(None)
        }
    }

    /// Temperature in °C, when the firmware exposes the sensor.
    ///
    /// # Errors
    ///
    /// Propagates register errors.
    pub fn temperature(&self) -> Result<Option<f32>> {
        if self.features.temperature {
            self.bar2.temperature_celsius()
        } else {
            Ok(None)
        }
    }

    /// Firmware identity string, when the firmware exposes it.
    ///
    /// # Errors
    ///
    /// Propagates register errors.
    pub fn firmware_info(&self) -> Result<Option<String>> {
        if self.features.firmware_info {
            Ok(Some(self.bar2.firmware_info()?))
        } else {
            Ok(None)
        }
    }

    /// FPGA chip id string, when the firmware exposes it.
    ///
    /// # Errors
    ///
    /// Propagates register errors.
    pub fn card_id(&self) -> Result<Option<String>> {
        if self.features.chip_id {
            Ok(Some(self.bar2.card_id_string()?))
        } else {
            Ok(None)
        }
    }
}

impl Drop for CruDmaChannel {
    fn drop(&mut self) {
        if self.dma_state == DmaState::Started {
            if let Err(err) = self.stop_dma() {
                log::warn!("failed to stop DMA on drop: {err}");
            }
        }
        if !self.ready_queue.is_empty() {
            log::info!(
                "remaining superpages in the ready queue: {}",
                self.ready_queue.len()
            );
        }
    }
}
