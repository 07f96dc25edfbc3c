//! CRU register map.
//!
//! All constants are byte offsets into the indicated BAR. The DMA engine
//! lives in BAR 0; identity, monitoring, TTC, GBT and datapath-wrapper
//! registers live in BAR 2.

// ---------------------------------------------------------------------------
// BAR 0: DMA engine
// ---------------------------------------------------------------------------

/// Data emulator control. Bit 0: flow control on.
pub const DMA_CONTROL: usize = 0x200;

/// Stride between per-link descriptor register groups.
pub const LINK_INTERVAL: usize = 0x10;

/// High half of the superpage bus address for link 0.
pub const LINK_SUPERPAGE_ADDRESS_HIGH: usize = 0x204;

/// Low half of the superpage bus address for link 0.
pub const LINK_SUPERPAGE_ADDRESS_LOW: usize = 0x208;

/// Superpage size in 8 KiB pages for link 0. Writing this register is the
/// doorbell that enqueues the descriptor into the link's FIFO.
pub const LINK_SUPERPAGE_SIZE: usize = 0x20c;

/// Stride between per-link completion counters.
pub const SUPERPAGES_PUSHED_INTERVAL: usize = 0x4;

/// Completed-superpage counter for link 0. Monotonically non-decreasing
/// while DMA runs.
pub const LINK_SUPERPAGES_PUSHED: usize = 0x800;

/// Reset control. Write 0x1 to reset the card, 0x2 to reset the data
/// generator counter.
pub const RESET_CONTROL: usize = 0x400;

/// Debug register; the lower 8 bits read back what was written.
pub const DEBUG_READ_WRITE: usize = 0x410;

/// Firmware feature word (see [`super::CruBar::firmware_features`]).
pub const FIRMWARE_FEATURES: usize = 0x41c;

/// Endpoint number of this PCI function (0 or 1).
pub const ENDPOINT_ID: usize = 0x500;

/// Data generator configuration; see the bit helpers in `CruBar`.
pub const DATA_GENERATOR_CONTROL: usize = 0x600;

/// One-shot data generator error injection.
pub const DATA_GENERATOR_INJECT_ERROR: usize = 0x608;

/// Value written to [`DATA_GENERATOR_INJECT_ERROR`].
pub const DATA_GENERATOR_INJECT_ERROR_CMD: u32 = 0x1;

/// DMA data source selection.
pub const DATA_SOURCE_SELECT: usize = 0x700;

/// [`DATA_SOURCE_SELECT`]: front-end data through the datapath wrapper.
pub const DATA_SOURCE_GBT: u32 = 0x0;

/// [`DATA_SOURCE_SELECT`]: internal data generator.
pub const DATA_SOURCE_INTERNAL: u32 = 0x1;

/// Firmware compile info (BAR 0 copy).
pub const FIRMWARE_COMPILE_INFO: usize = 0x280;

// ---------------------------------------------------------------------------
// BAR 2: identity and monitoring
// ---------------------------------------------------------------------------

/// Board serial number.
pub const SERIAL_NUMBER: usize = 0x20002c;

/// Temperature sensor; lower 10 bits are the raw reading.
pub const TEMPERATURE: usize = 0x10008;

/// Firmware git hash.
pub const FIRMWARE_GIT_HASH: usize = 0x4;

/// Firmware build date (BCD yyyymmdd).
pub const FIRMWARE_DATE: usize = 0x8;

/// Firmware build time (BCD hhmmss).
pub const FIRMWARE_TIME: usize = 0xc;

/// Firmware build epoch seconds.
pub const FIRMWARE_EPOCH: usize = 0x1c;

/// FPGA chip id, high word.
pub const FPGA_CHIP_HIGH: usize = 0x10014;

/// FPGA chip id, low word.
pub const FPGA_CHIP_LOW: usize = 0x10018;

/// Dropped-packet counter of the datapath.
pub const NUM_DROPPED_PACKETS: usize = 0x60001c;

/// Board support package user control; bit 0 enables data taking.
pub const BSP_USER_CONTROL: usize = 0x18;

// ---------------------------------------------------------------------------
// BAR 2: TTC
// ---------------------------------------------------------------------------

/// CTP clock frequency readout (Hz).
pub const CTP_CLOCK: usize = 0x240000;

/// Local clock frequency readout (Hz).
pub const LOCAL_CLOCK: usize = 0x240004;

/// Clock control; bit 24 pulses the fPLL reset.
pub const CLOCK_CONTROL: usize = 0x240010;

/// Lock-to-reference control for the recovered clock.
pub const LOCK_CLOCK_TO_REF: usize = 0x220000;

/// TTC data selection. Bits [1:0] clock source, bits [17:16] downstream
/// data source.
pub const TTC_DATA: usize = 0x200000;

/// PON wrapper PLL block base.
pub const PON_WRAPPER_PLL: usize = 0x224000;

/// PON wrapper TX block base.
pub const PON_WRAPPER_TX: usize = 0x226000;

/// ONU fPLL block base.
pub const CLOCK_ONU_FPLL: usize = 0x248000;

/// ONU PLL control.
pub const CLOCK_PLL_CONTROL_ONU: usize = 0x240018;

/// ONU user logic block base; the calibration status lives at +0x0c.
pub const ONU_USER_LOGIC: usize = 0x22a000;

/// Reference generator block base.
pub const ONU_USER_REFGEN: usize = 0x22c000;

/// Offset of refgen 1 inside [`ONU_USER_REFGEN`].
pub const REFGEN1_OFFSET: usize = 0x4;

// ---------------------------------------------------------------------------
// BAR 2: GBT wrappers
// ---------------------------------------------------------------------------

/// GBT wrapper 0 base.
pub const WRAPPER0: usize = 0x400000;

/// GBT wrapper 1 base.
pub const WRAPPER1: usize = 0x500000;

/// Per-bank offset inside a wrapper.
pub const GBT_WRAPPER_BANK_OFFSET: usize = 0x20000;

/// Per-link offset inside a bank.
pub const GBT_BANK_LINK_OFFSET: usize = 0x2000;

/// Wrapper global registers offset.
pub const GBT_WRAPPER_GREGS: usize = 0x0;

/// Wrapper configuration word (links per bank).
pub const GBT_WRAPPER_CONF0: usize = 0x0;

/// Wrapper clock counter; ticks only when the wrapper is clocked.
pub const GBT_WRAPPER_CLOCK_COUNTER: usize = 0xc;

/// Wrapper ATX PLL block offset.
pub const GBT_WRAPPER_ATX_PLL: usize = 0xe0000;

/// Transceiver block offset inside a link.
pub const GBT_LINK_XCVR_OFFSET: usize = 0x1000;

/// Per-link GBT mux select register (2 bits per link).
pub const GBT_MUX_SELECT: usize = 0x1c;

/// Per-link source select (internal data generator).
pub const GBT_LINK_SOURCE_SELECT: usize = 0x38;

/// Per-link TX control; bit 8 selects the TX mode.
pub const GBT_LINK_TX_CONTROL_OFFSET: usize = 0x34;

/// Per-link RX control; bit 8 selects the RX mode, bit 4 the loopback.
pub const GBT_LINK_RX_CONTROL_OFFSET: usize = 0x40;

// ---------------------------------------------------------------------------
// BAR 2: datapath wrappers
// ---------------------------------------------------------------------------

/// Datapath wrapper 0 base.
pub const DWRAPPER_BASE0: usize = 0x600000;

/// Datapath wrapper 1 base.
pub const DWRAPPER_BASE1: usize = 0x700000;

/// Link-enable register offset inside a datapath wrapper.
pub const DWRAPPER_ENREG: usize = 0x0;

/// Per-wrapper datapath generator / arbitration control.
pub const DWRAPPER_DATAGEN_CONTROL: usize = 0x4;

/// Per-link datapath register block offset.
pub const DATAPATHLINK_OFFSET: usize = 0x40000;

/// Stride between per-link datapath register blocks.
pub const DATALINK_OFFSET: usize = 0x1000;

/// Per-link datapath control; bit 31 selects the datapath mode.
pub const DATALINK_CONTROL: usize = 0x0;

/// Flow control block offset inside a datapath wrapper.
pub const FLOW_CONTROL_OFFSET: usize = 0xc0000;

/// Flow control register inside [`FLOW_CONTROL_OFFSET`].
pub const FLOW_CONTROL_REGISTER: usize = 0x0;

/// Byte offset of the descriptor-address-high register of `link`.
#[must_use]
pub fn link_superpage_address_high(link: u32) -> usize {
    LINK_SUPERPAGE_ADDRESS_HIGH + link as usize * LINK_INTERVAL
}

/// Byte offset of the descriptor-address-low register of `link`.
#[must_use]
pub fn link_superpage_address_low(link: u32) -> usize {
    LINK_SUPERPAGE_ADDRESS_LOW + link as usize * LINK_INTERVAL
}

/// Byte offset of the descriptor-size doorbell register of `link`.
#[must_use]
pub fn link_superpage_size(link: u32) -> usize {
    LINK_SUPERPAGE_SIZE + link as usize * LINK_INTERVAL
}

/// Byte offset of the completion counter of `link`.
#[must_use]
pub fn link_superpages_pushed(link: u32) -> usize {
    LINK_SUPERPAGES_PUSHED + link as usize * SUPERPAGES_PUSHED_INTERVAL
}

/// Base address of GBT wrapper `wrapper`.
#[must_use]
pub fn wrapper_base(wrapper: u32) -> usize {
    if wrapper == 0 { WRAPPER0 } else { WRAPPER1 }
}

/// Base address of datapath wrapper `dwrapper`.
#[must_use]
pub fn dwrapper_base(dwrapper: u32) -> usize {
    if dwrapper == 0 { DWRAPPER_BASE0 } else { DWRAPPER_BASE1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_registers_are_strided() {
        assert_eq!(link_superpage_address_high(0), 0x204);
        assert_eq!(link_superpage_address_low(1), 0x218);
        assert_eq!(link_superpage_size(2), 0x22c);
        assert_eq!(link_superpages_pushed(3), 0x80c);
    }
}
