//! The CRORC page DMA engine.
//!
//! Same external contract as the CRU engine, over a very different wire
//! protocol: the unit of transfer is one fixed-size page, tracked through
//! the card's free FIFO (push side) and the host-memory ready FIFO
//! (completion side). Completions are strictly in ring order.
//!
//! DMA start is *pending*: the free FIFO needs at least one page before
//! reception can begin, so `start_dma` arms the channel and the first
//! `push_superpage` performs the actual bring-up.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use super::bar::{CrorcBar, DiuConfig};
use super::ready_fifo::{DataArrival, ReadyFifo, READY_FIFO_ENTRIES};
use super::regs::ResetMask;
use super::DEFAULT_DMA_PAGE_SIZE;
use crate::channel::DmaState;
use crate::error::{Error, FatalKind, Result};
use crate::lock::ChannelLock;
use crate::memory::{self, DmaMemory};
use crate::parameters::Parameters;
use crate::superpage::Superpage;
use crate::types::{GeneratorPattern, LoopbackMode, ResetLevel};

/// Transfer queue depth; one slot per ready-FIFO entry.
const TRANSFER_QUEUE_CAPACITY: usize = READY_FIFO_ENTRIES;

/// Ready queue depth.
const READY_QUEUE_CAPACITY: usize = READY_FIFO_ENTRIES;

/// Settle time after link-stack resets.
const RESET_SETTLE: Duration = Duration::from_millis(100);

/// The CRORC transfer engine.
#[derive(Debug)]
pub struct CrorcDmaChannel {
    bar: CrorcBar,
    memory: DmaMemory,
    /// Held for the channel lifetime; absent only on engine-level tests.
    _lock: Option<ChannelLock>,
    fifo: ReadyFifo,
    fifo_bus_address: u64,
    /// Ring index of the oldest outstanding page.
    fifo_back: usize,
    /// Outstanding pages in the ring.
    fifo_size: usize,
    transfer_queue: VecDeque<Superpage>,
    ready_queue: VecDeque<Superpage>,
    dma_state: DmaState,
    pending_start: bool,
    poison: Option<FatalKind>,
    diu_config: Option<DiuConfig>,
    page_size: usize,
    initial_reset_level: ResetLevel,
    loopback: LoopbackMode,
    no_rdy_rx: bool,
    generator_enabled: bool,
    generator_pattern: GeneratorPattern,
    generator_data_size: usize,
    generator_seed: u32,
}

impl CrorcDmaChannel {
    /// Builds the engine from its already-acquired resources.
    ///
    /// # Errors
    ///
    /// Rejects a page size that is not a positive multiple of the 32-bit
    /// word, and propagates ready-FIFO bus translation failures.
    pub fn new(
        bar: CrorcBar,
        memory: DmaMemory,
        fifo: ReadyFifo,
        lock: Option<ChannelLock>,
        params: &Parameters,
    ) -> Result<Self> {
        let page_size = params
            .dma_page_size()
            .copied()
            .unwrap_or(DEFAULT_DMA_PAGE_SIZE);
        if page_size == 0 || page_size % 4 != 0 {
            return Err(Error::ParameterNotApplicable {
                parameter: "dmaPageSize",
                reason: format!("page size {page_size} is not a positive multiple of 4"),
            });
        }

        let fifo_bus_address = memory::region_bus_address(fifo.base_address())?;

        Ok(Self {
            bar,
            memory,
            _lock: lock,
            fifo,
            fifo_bus_address,
            fifo_back: 0,
            fifo_size: 0,
            transfer_queue: VecDeque::with_capacity(TRANSFER_QUEUE_CAPACITY),
            ready_queue: VecDeque::with_capacity(READY_QUEUE_CAPACITY),
            dma_state: DmaState::Stopped,
            pending_start: false,
            poison: None,
            diu_config: None,
            page_size,
            initial_reset_level: params
                .initial_reset_level()
                .copied()
                .unwrap_or(ResetLevel::Rorc),
            loopback: params.loopback_mode().copied().unwrap_or(LoopbackMode::None),
            no_rdy_rx: params.no_rdy_rx().copied().unwrap_or(false),
            generator_enabled: params.generator_enabled().copied().unwrap_or(true),
            generator_pattern: params
                .generator_pattern()
                .copied()
                .unwrap_or(GeneratorPattern::Incremental),
            generator_data_size: params.generator_data_size().copied().unwrap_or(page_size),
            generator_seed: 0,
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

    /// Which reset level / loopback combinations make sense on the wire.
    fn check_loopback_legality(&self) -> Result<()> {
        if self.loopback == LoopbackMode::Internal
            && self.initial_reset_level.includes_external()
        {
            return Err(Error::UnsupportedLoopback {
                mode: self.loopback,
                reason: "internal loopback cannot reach the DIU/SIU resets",
            });
        }
        if self.loopback == LoopbackMode::Diu
            && self.initial_reset_level == ResetLevel::RorcDiuSiu
        {
            return Err(Error::UnsupportedLoopback {
                mode: self.loopback,
                reason: "the SIU is unreachable behind a DIU loopback",
            });
        }
        if !self.generator_enabled && self.loopback != LoopbackMode::None {
            return Err(Error::UnsupportedLoopback {
                mode: self.loopback,
                reason: "loopback without the data generator",
            });
        }
        Ok(())
    }

    /// Arms the channel: discovers the DIU, resets the link stack, starts
    /// the receiver, and leaves the actual DMA start pending until the
    /// first superpage arrives.
    ///
    /// # Errors
    ///
    /// `UnsupportedLoopback` for illegal mode combinations, `LinkNotOn`
    /// when the fibre is down, plus command and register errors.
    pub fn start_dma(&mut self) -> Result<()> {
        self.check_poison()?;
        self.require_state(DmaState::Stopped, "start DMA")?;
        self.check_loopback_legality()?;

        self.bar.calibrate()?;
        let diu_config = self.bar.find_diu_version()?;
        log::debug!("DIU discovery: {diu_config:?}");
        self.diu_config = Some(diu_config);

        self.reset_card(self.initial_reset_level)?;
        self.start_data_receiving()?;

        self.transfer_queue.clear();
        self.ready_queue.clear();
        self.fifo_back = 0;
        self.fifo_size = 0;
        self.pending_start = true;
        self.dma_state = DmaState::Started;
        log::info!("DMA armed, waiting for the first superpage");
        Ok(())
    }

    /// Link check, FIFO reset, receiver base programming.
    fn start_data_receiving(&mut self) -> Result<()> {
        if self.loopback != LoopbackMode::Internal {
            self.bar.check_link()?;
        }
        self.fifo.reset();
        self.bar.reset(ResetMask::FREE_FIFO)?;
        self.bar.start_data_receiver(self.fifo_bus_address)
    }

    /// Applies the reset ladder for `level`.
    ///
    /// Each level is a superset of the previous; between the SIU reset and
    /// the following DIU reset a 100 ms settle is mandatory.
    fn reset_card(&self, level: ResetLevel) -> Result<()> {
        match level {
            ResetLevel::Nothing => return Ok(()),
            ResetLevel::Rorc => {
                self.bar.reset(ResetMask::RORC)?;
            }
            ResetLevel::RorcDiu | ResetLevel::RorcDiuSiu => {
                self.bar.reset(ResetMask::DIU)?;
                if level == ResetLevel::RorcDiuSiu {
                    thread::sleep(RESET_SETTLE);
                    self.bar.reset(ResetMask::SIU)?;
                    self.bar.reset(ResetMask::DIU)?;
                }
                self.bar.reset(ResetMask::RORC)?;
            }
        }
        thread::sleep(RESET_SETTLE);
        Ok(())
    }

    /// First-superpage bring-up: fills the free FIFO with everything queued
    /// so far, then starts the generator or sends RDYRX.
    fn start_pending_dma(&mut self) -> Result<()> {
        for index in 0..self.transfer_queue.len() {
            let offset = self.transfer_queue[index].offset;
            self.push_page_to_firmware(index, offset)?;
        }
        self.fifo_size = self.transfer_queue.len();

        if self.generator_enabled {
            self.start_data_generator()?;
        } else if !self.no_rdy_rx {
            self.bar.check_link()?;
            self.bar.siu_command(0)?;
            self.bar.diu_command(0)?;
            let reply = self.bar.start_trigger()?;
            log::debug!("RDYRX acknowledged with status 0x{:08x}", reply.raw);
        }

        self.pending_start = false;
        log::info!("DMA started");
        Ok(())
    }

    fn start_data_generator(&self) -> Result<()> {
        if self.loopback == LoopbackMode::None {
            self.bar.start_trigger()?;
        }
        self.bar.arm_data_generator(
            0,
            0,
            self.generator_pattern,
            (self.generator_data_size / 4) as u32,
            self.generator_seed,
        )?;
        match self.loopback {
            LoopbackMode::Internal => {
                self.bar.set_internal_loopback(true)?;
                thread::sleep(RESET_SETTLE);
            }
            LoopbackMode::Siu => {
                self.bar.set_siu_loopback()?;
                thread::sleep(RESET_SETTLE);
                self.bar.check_link()?;
                self.bar.siu_command(0)?;
                self.bar.diu_command(0)?;
            }
            LoopbackMode::None | LoopbackMode::Diu => {}
        }
        self.bar.start_data_generator(0)
    }

    /// Stops generator or trigger and reclaims in-flight pages into the
    /// ready queue as flushed.
    ///
    /// # Errors
    ///
    /// Propagates state, command and register errors.
    pub fn stop_dma(&mut self) -> Result<()> {
        self.require_state(DmaState::Started, "stop DMA")?;

        if !self.pending_start {
            if self.generator_enabled {
                self.bar.stop_data_generator()?;
                self.bar.stop_data_receiver()?;
            } else if !self.no_rdy_rx {
                let reply = self.bar.stop_trigger()?;
                log::debug!("EOBTR acknowledged with status 0x{:08x}", reply.raw);
            }
        }

        let mut moved = 0usize;
        while let Some(mut superpage) = self.transfer_queue.pop_front() {
            superpage.ready = true;
            superpage.received = superpage.size;
            self.ready_queue.push_back(superpage);
            moved += 1;
        }
        self.fifo_back = 0;
        self.fifo_size = 0;
        log::info!("moved {moved} remaining superpage(s) to ready queue");

        self.pending_start = false;
        self.dma_state = DmaState::Stopped;
        Ok(())
    }

    /// Resets the channel at the given level.
    ///
    /// # Errors
    ///
    /// Propagates poisoning, state and register errors.
    pub fn reset_channel(&mut self, level: ResetLevel) -> Result<()> {
        self.check_poison()?;
        self.require_state(DmaState::Stopped, "reset channel")?;
        self.reset_card(level)
    }

    fn check_superpage(&self, superpage: &Superpage) -> Result<()> {
        let invalid = |reason| Error::InvalidSuperpage {
            offset: superpage.offset,
            size: superpage.size,
            reason,
        };
        if superpage.size != self.page_size {
            return Err(invalid("CRORC superpage size must equal the DMA page size"));
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

    /// Pushes one page-sized superpage; the ring index it occupies is the
    /// current tail of the ready FIFO.
    ///
    /// # Errors
    ///
    /// `TransferQueueFull` at ring depth, `InvalidSuperpage` on contract
    /// violations, plus poisoning, state, command and register errors.
    pub fn push_superpage(&mut self, superpage: Superpage) -> Result<()> {
        self.check_poison()?;
        self.require_state(DmaState::Started, "push superpage")?;
        self.check_superpage(&superpage)?;

        if self.transfer_queue.len() >= TRANSFER_QUEUE_CAPACITY {
            return Err(Error::TransferQueueFull);
        }

        if self.pending_start {
            // Queued now, pushed to the firmware by the pending bring-up.
            self.transfer_queue.push_back(superpage);
            return self.start_pending_dma();
        }

        let ring_index = (self.fifo_back + self.fifo_size) % READY_FIFO_ENTRIES;
        self.push_page_to_firmware(ring_index, superpage.offset)?;
        self.transfer_queue.push_back(superpage);
        self.fifo_size += 1;
        Ok(())
    }

    fn push_page_to_firmware(&self, ring_index: usize, offset: usize) -> Result<()> {
        self.fifo.reset_entry(ring_index);
        let bus_address = self.memory.translate(offset)?;
        self.bar
            .push_free_fifo_page(ring_index, bus_address, (self.page_size / 4) as u32)
    }

    /// Promotes arrived pages from the ring, in FIFO order, until an entry
    /// is still in flight or the ready queue is full.
    ///
    /// # Errors
    ///
    /// [`Error::DataArrivalError`] when an entry carries an error status,
    /// plus poisoning and state errors.
    pub fn fill_superpages(&mut self) -> Result<()> {
        self.check_poison()?;
        self.require_state(DmaState::Started, "fill superpages")?;
        if self.pending_start {
            return Ok(());
        }

        while self.fifo_size > 0 {
            if self.ready_queue.len() >= READY_QUEUE_CAPACITY {
                return Ok(());
            }
            match self.fifo.data_arrived(self.fifo_back)? {
                DataArrival::NoneArrived | DataArrival::PartArrived => return Ok(()),
                DataArrival::WholeArrived { length } => {
                    let mut superpage = self
                        .transfer_queue
                        .pop_front()
                        .expect("ring count ahead of transfer queue");
                    superpage.ready = true;
                    superpage.received = (length as usize * 4).min(superpage.size);
                    self.ready_queue.push_back(superpage);
                    self.fifo_back = (self.fifo_back + 1) % READY_FIFO_ENTRIES;
                    self.fifo_size -= 1;
                }
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

    /// Free slots in the transfer ring.
    #[must_use]
    pub fn transfer_queue_available(&self) -> usize {
        TRANSFER_QUEUE_CAPACITY - self.transfer_queue.len()
    }

    /// Superpages delivered and awaiting pickup.
    #[must_use]
    pub fn ready_queue_size(&self) -> usize {
        self.ready_queue.len()
    }

    /// The channel's DMA page size in bytes.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Serial number from flash, when present.
    ///
    /// # Errors
    ///
    /// Propagates register errors.
    pub fn serial(&self) -> Result<Option<i32>> {
        self.bar.serial()
    }

    /// Firmware version string.
    ///
    /// # Errors
    ///
    /// Propagates register errors.
    pub fn firmware_info(&self) -> Result<Option<String>> {
        Ok(Some(self.bar.firmware_version()?))
    }
}

impl Drop for CrorcDmaChannel {
    fn drop(&mut self) {
        if self.dma_state == DmaState::Started {
            if let Err(err) = self.stop_dma() {
                log::warn!("failed to stop DMA on drop: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::regs::{self, ChannelCsr};
    use crate::parameters::{BufferParameters, CardId};
    use rocard_mmio::BarRegion;

    struct TestRig {
        _dir: tempfile::TempDir,
        channel: CrorcDmaChannel,
        bar: BarRegion,
    }

    fn rig(configure: impl FnOnce(Parameters) -> Parameters) -> TestRig {
        let dir = tempfile::tempdir().unwrap();
        let bar = BarRegion::anonymous(0x1000, 0);

        let params = configure(
            Parameters::for_channel(CardId::Sequence(0), 0).set_buffer_parameters(
                BufferParameters::File {
                    path: dir.path().join("buffer"),
                    size: 16 * 1024 * 1024,
                },
            ),
        );

        let memory = DmaMemory::bind(
            params.require_buffer_parameters().unwrap(),
            DEFAULT_DMA_PAGE_SIZE,
            None,
        )
        .unwrap();
        let fifo = ReadyFifo::create(&dir.path().join("fifo")).unwrap();

        // Integrated revision: DIU discovery answers locally.
        bar.write32(regs::byte_offset(regs::RHID), 7 << 24).unwrap();

        let channel = CrorcDmaChannel::new(
            CrorcBar::new(bar.clone()),
            memory,
            fifo,
            None,
            &params,
        )
        .unwrap();
        TestRig {
            _dir: dir,
            channel,
            bar,
        }
    }

    /// Generator + internal loopback: bring-up runs without link traffic.
    fn generator_rig() -> TestRig {
        rig(|p| {
            p.set_generator_enabled(true)
                .set_loopback_mode(LoopbackMode::Internal)
                .set_initial_reset_level(ResetLevel::Rorc)
        })
    }

    #[test]
    fn pending_start_fires_on_first_push() {
        let mut rig = generator_rig();
        rig.channel.start_dma().unwrap();
        assert!(rig.channel.pending_start);

        rig.channel
            .push_superpage(Superpage::new(0, DEFAULT_DMA_PAGE_SIZE))
            .unwrap();
        assert!(!rig.channel.pending_start);

        // The generator was armed and started.
        let dg1 = rig.bar.read32(regs::byte_offset(regs::C_DG1)).unwrap();
        assert_ne!(dg1, 0);
        let csr = rig.bar.read32(regs::byte_offset(regs::C_CSR)).unwrap();
        assert_eq!(
            csr & ChannelCsr::START_DG.bits(),
            ChannelCsr::START_DG.bits()
        );
        // The page landed in the free FIFO with ring index 0.
        let rafl = rig.bar.read32(regs::byte_offset(regs::C_RAFL)).unwrap();
        assert_eq!(rafl & 0xff, 0);
        assert_eq!(rafl >> 8, (DEFAULT_DMA_PAGE_SIZE / 4) as u32);
    }

    #[test]
    fn arrival_promotes_pages_in_ring_order() {
        let mut rig = generator_rig();
        rig.channel.start_dma().unwrap();
        for i in 0..3 {
            rig.channel
                .push_superpage(Superpage::new(i * DEFAULT_DMA_PAGE_SIZE, DEFAULT_DMA_PAGE_SIZE))
                .unwrap();
        }

        // Nothing arrived yet.
        rig.channel.fill_superpages().unwrap();
        assert_eq!(rig.channel.ready_queue_size(), 0);

        // Firmware reports entry 0 and 1 complete: 0x400 words each.
        rig.channel.fifo.write_entry(0, 0x400, 0x82);
        rig.channel.fifo.write_entry(1, 0x400, 0x82);
        rig.channel.fill_superpages().unwrap();
        assert_eq!(rig.channel.ready_queue_size(), 2);

        let first = rig.channel.pop_superpage().unwrap();
        assert_eq!(first.offset, 0);
        assert!(first.ready);
        assert_eq!(first.received, 0x400 * 4);
        let second = rig.channel.pop_superpage().unwrap();
        assert_eq!(second.offset, DEFAULT_DMA_PAGE_SIZE);

        // Entry 2 still pending.
        assert!(matches!(
            rig.channel.pop_superpage(),
            Err(Error::ReadyQueueEmpty)
        ));
    }

    #[test]
    fn arrival_error_carries_ring_context() {
        let mut rig = generator_rig();
        rig.channel.start_dma().unwrap();
        rig.channel
            .push_superpage(Superpage::new(0, DEFAULT_DMA_PAGE_SIZE))
            .unwrap();
        rig.channel.fifo.write_entry(0, 0x10, 0x8000_0082);
        assert!(matches!(
            rig.channel.fill_superpages(),
            Err(Error::DataArrivalError { index: 0, .. })
        ));
    }

    #[test]
    fn ring_depth_back_pressure() {
        let mut rig = generator_rig();
        rig.channel.start_dma().unwrap();
        for i in 0..READY_FIFO_ENTRIES {
            rig.channel
                .push_superpage(Superpage::new(i * DEFAULT_DMA_PAGE_SIZE, DEFAULT_DMA_PAGE_SIZE))
                .unwrap();
        }
        assert_eq!(rig.channel.transfer_queue_available(), 0);
        assert!(matches!(
            rig.channel.push_superpage(Superpage::new(0, DEFAULT_DMA_PAGE_SIZE)),
            Err(Error::TransferQueueFull)
        ));
    }

    #[test]
    fn superpage_must_match_page_size() {
        let mut rig = generator_rig();
        rig.channel.start_dma().unwrap();
        assert!(matches!(
            rig.channel
                .push_superpage(Superpage::new(0, 2 * DEFAULT_DMA_PAGE_SIZE)),
            Err(Error::InvalidSuperpage { .. })
        ));
    }

    #[test]
    fn down_link_fails_start_for_external_loopback() {
        let mut rig = rig(|p| {
            p.set_generator_enabled(true)
                .set_loopback_mode(LoopbackMode::Siu)
                .set_initial_reset_level(ResetLevel::Nothing)
        });
        rig.bar
            .write32(
                regs::byte_offset(regs::C_CSR),
                ChannelCsr::LINK_DOWN.bits(),
            )
            .unwrap();
        assert!(matches!(rig.channel.start_dma(), Err(Error::LinkNotOn)));
    }

    #[test]
    fn siu_reset_without_response_times_out() {
        let mut rig = rig(|p| {
            p.set_generator_enabled(true)
                .set_loopback_mode(LoopbackMode::Siu)
                .set_initial_reset_level(ResetLevel::RorcDiuSiu)
        });
        // The dead BAR never raises RXSTAT_NOT_EMPTY, so the SIU reset
        // acknowledgement cannot arrive.
        assert!(matches!(
            rig.channel.start_dma(),
            Err(Error::CommandTimeout { operation: "SIU reset", .. })
        ));
    }

    #[test]
    fn illegal_loopback_reset_combinations() {
        let mut internal = rig(|p| {
            p.set_loopback_mode(LoopbackMode::Internal)
                .set_initial_reset_level(ResetLevel::RorcDiuSiu)
        });
        assert!(matches!(
            internal.channel.start_dma(),
            Err(Error::UnsupportedLoopback { mode: LoopbackMode::Internal, .. })
        ));

        let mut diu = rig(|p| {
            p.set_loopback_mode(LoopbackMode::Diu)
                .set_initial_reset_level(ResetLevel::RorcDiuSiu)
        });
        assert!(matches!(
            diu.channel.start_dma(),
            Err(Error::UnsupportedLoopback { mode: LoopbackMode::Diu, .. })
        ));

        let mut no_generator = rig(|p| {
            p.set_generator_enabled(false)
                .set_loopback_mode(LoopbackMode::Internal)
        });
        assert!(matches!(
            no_generator.channel.start_dma(),
            Err(Error::UnsupportedLoopback { .. })
        ));
    }

    #[test]
    fn stop_flushes_and_next_start_is_legal() {
        let mut rig = generator_rig();
        rig.channel.start_dma().unwrap();
        for i in 0..2 {
            rig.channel
                .push_superpage(Superpage::new(i * DEFAULT_DMA_PAGE_SIZE, DEFAULT_DMA_PAGE_SIZE))
                .unwrap();
        }
        rig.channel.stop_dma().unwrap();
        assert_eq!(rig.channel.ready_queue_size(), 2);
        for _ in 0..2 {
            let sp = rig.channel.pop_superpage().unwrap();
            assert!(sp.ready);
        }
        rig.channel.start_dma().unwrap();
        assert_eq!(rig.channel.transfer_queue_available(), READY_FIFO_ENTRIES);
    }

    #[test]
    fn no_rdy_rx_skips_the_front_end_handshake() {
        let mut rig = rig(|p| {
            p.set_generator_enabled(false)
                .set_no_rdy_rx(true)
                .set_loopback_mode(LoopbackMode::None)
                .set_initial_reset_level(ResetLevel::Rorc)
        });
        rig.channel.start_dma().unwrap();
        // With RDYRX suppressed the pending start succeeds without any
        // DDL response from the dead BAR.
        rig.channel
            .push_superpage(Superpage::new(0, DEFAULT_DMA_PAGE_SIZE))
            .unwrap();
        assert!(!rig.channel.pending_start);
    }
}
