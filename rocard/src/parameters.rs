//! Channel and card configuration parameters.
//!
//! [`Parameters`] is the builder every open path starts from: the factory
//! reads the channel-related options, the BAR layers read the card bring-up
//! options. Unset options fall back to card-specific defaults at the point
//! of use; options that would silently misconfigure a card are rejected
//! there with `ParameterNotApplicable`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use rocard_pci::PciAddress;

use crate::error::Error;
use crate::types::{
    Clock, DatapathMode, DownstreamData, GbtMode, GbtMux, GeneratorPattern, LoopbackMode,
    ResetLevel, SerialId,
};

/// Which physical card a request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardId {
    /// Serial number plus endpoint.
    Serial(SerialId),
    /// PCI geographical address.
    Address(PciAddress),
    /// Position in the stable enumeration order, written `#<n>`.
    Sequence(u32),
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardId::Serial(id) => write!(f, "{id}"),
            CardId::Address(addr) => write!(f, "{addr}"),
            CardId::Sequence(n) => write!(f, "#{n}"),
        }
    }
}

impl FromStr for CardId {
    type Err = Error;

    /// Accepts `#<seq>`, `<bus>:<dev>.<fn>`, `<serial>` or `<serial>:<endpoint>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(seq) = s.strip_prefix('#') {
            let n = seq
                .parse()
                .map_err(|_| Error::Config(format!("invalid sequence number {s:?}")))?;
            return Ok(CardId::Sequence(n));
        }
        if let Ok(addr) = s.parse::<PciAddress>() {
            return Ok(CardId::Address(addr));
        }
        if let Some((serial, endpoint)) = s.split_once(':') {
            if let (Ok(serial), Ok(endpoint)) = (serial.parse(), endpoint.parse()) {
                return Ok(CardId::Serial(SerialId { serial, endpoint }));
            }
        }
        if let Ok(serial) = s.parse::<i32>() {
            return Ok(CardId::Serial(SerialId { serial, endpoint: 0 }));
        }
        Err(Error::Config(format!("could not parse card id {s:?}")))
    }
}

/// The host memory region to bind for DMA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferParameters {
    /// A region the caller already owns, given by base address and size.
    Memory {
        /// User-space base address of the region.
        address: usize,
        /// Size of the region in bytes.
        size: usize,
    },
    /// A file to map (hugetlbfs in production), created if absent.
    File {
        /// Path of the backing file.
        path: PathBuf,
        /// Size of the mapping in bytes.
        size: usize,
    },
}

/// Builder for everything a channel or BAR session can be configured with.
///
/// The recognised options mirror the card bring-up and transfer knobs; see
/// each setter. All setters are chainable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    card_id: Option<CardId>,
    channel_number: Option<u32>,
    buffer_parameters: Option<BufferParameters>,
    dma_page_size: Option<usize>,
    link_mask: Option<BTreeSet<u32>>,
    generator_enabled: Option<bool>,
    generator_pattern: Option<GeneratorPattern>,
    generator_data_size: Option<usize>,
    generator_random_size_enabled: Option<bool>,
    loopback_mode: Option<LoopbackMode>,
    initial_reset_level: Option<ResetLevel>,
    no_rdy_rx: Option<bool>,
    clock: Option<Clock>,
    datapath_mode: Option<DatapathMode>,
    downstream_data: Option<DownstreamData>,
    gbt_mode: Option<GbtMode>,
    gbt_mux: Option<GbtMux>,
    gbt_mux_map: Option<BTreeMap<u32, GbtMux>>,
    link_loopback_enabled: Option<bool>,
    pon_upstream: Option<bool>,
    onu_address: Option<u32>,
    cru_id: Option<u16>,
    allow_rejection: Option<bool>,
}

macro_rules! option_accessors {
    ($(#[$meta:meta])* $set:ident, $get:ident, $field:ident: $ty:ty) => {
        $(#[$meta])*
        #[must_use]
        pub fn $set(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }

        /// Returns the option if it was set.
        #[must_use]
        pub fn $get(&self) -> Option<&$ty> {
            self.$field.as_ref()
        }
    };
}

impl Parameters {
    /// Starts an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor with the two options every request needs.
    #[must_use]
    pub fn for_channel(card_id: CardId, channel_number: u32) -> Self {
        Self::new().set_card_id(card_id).set_channel_number(channel_number)
    }

    option_accessors! {
        /// Which card to open.
        set_card_id, card_id, card_id: CardId
    }
    option_accessors! {
        /// DMA channel number within the card.
        set_channel_number, channel_number, channel_number: u32
    }
    option_accessors! {
        /// Host memory region to bind for DMA.
        set_buffer_parameters, buffer_parameters, buffer_parameters: BufferParameters
    }
    option_accessors! {
        /// DMA page size; CRORC only (the CRU page size is fixed at 8 KiB).
        set_dma_page_size, dma_page_size, dma_page_size: usize
    }
    option_accessors! {
        /// Set of links to enable (CRU).
        set_link_mask, link_mask, link_mask: BTreeSet<u32>
    }
    option_accessors! {
        /// Enable the on-card data generator.
        set_generator_enabled, generator_enabled, generator_enabled: bool
    }
    option_accessors! {
        /// Payload pattern of the data generator.
        set_generator_pattern, generator_pattern, generator_pattern: GeneratorPattern
    }
    option_accessors! {
        /// Event size of the data generator in bytes.
        set_generator_data_size, generator_data_size, generator_data_size: usize
    }
    option_accessors! {
        /// Randomise generated event lengths up to the configured size.
        set_generator_random_size_enabled, generator_random_size_enabled,
        generator_random_size_enabled: bool
    }
    option_accessors! {
        /// Loopback stage for test data.
        set_loopback_mode, loopback_mode, loopback_mode: LoopbackMode
    }
    option_accessors! {
        /// Reset level applied when the channel is opened.
        set_initial_reset_level, initial_reset_level, initial_reset_level: ResetLevel
    }
    option_accessors! {
        /// Suppress the RDYRX/EOBTR commands to the front-end (CRORC).
        ///
        /// The original driver sets this implicitly when the data generator
        /// or the STBRD command is used; here it is always an explicit input.
        set_no_rdy_rx, no_rdy_rx, no_rdy_rx: bool
    }
    option_accessors! {
        /// TTC clock source (CRU bring-up).
        set_clock, clock, clock: Clock
    }
    option_accessors! {
        /// Datapath wrapper mode (CRU bring-up).
        set_datapath_mode, datapath_mode, datapath_mode: DatapathMode
    }
    option_accessors! {
        /// TTC downstream data source (CRU bring-up).
        set_downstream_data, downstream_data, downstream_data: DownstreamData
    }
    option_accessors! {
        /// GBT receive decoding mode (CRU bring-up).
        set_gbt_mode, gbt_mode, gbt_mode: GbtMode
    }
    option_accessors! {
        /// Default GBT mux for every link (CRU bring-up).
        set_gbt_mux, gbt_mux, gbt_mux: GbtMux
    }
    option_accessors! {
        /// Per-link GBT mux overrides (CRU bring-up).
        set_gbt_mux_map, gbt_mux_map, gbt_mux_map: BTreeMap<u32, GbtMux>
    }
    option_accessors! {
        /// Enable GBT transceiver loopback on every link (CRU bring-up).
        set_link_loopback_enabled, link_loopback_enabled, link_loopback_enabled: bool
    }
    option_accessors! {
        /// Enable the PON upstream path (CRU bring-up).
        set_pon_upstream, pon_upstream, pon_upstream: bool
    }
    option_accessors! {
        /// ONU address for PON upstream calibration.
        set_onu_address, onu_address, onu_address: u32
    }
    option_accessors! {
        /// Logical CRU identifier stamped into readout headers.
        set_cru_id, cru_id, cru_id: u16
    }
    option_accessors! {
        /// Allow the datapath to reject packets under back-pressure.
        set_allow_rejection, allow_rejection, allow_rejection: bool
    }

    /// The card id, or a config error if it was never set.
    ///
    /// # Errors
    ///
    /// Fails when the option is missing.
    pub fn require_card_id(&self) -> Result<CardId, Error> {
        self.card_id
            .ok_or_else(|| Error::Config("cardId parameter is required".into()))
    }

    /// The channel number, or a config error if it was never set.
    ///
    /// # Errors
    ///
    /// Fails when the option is missing.
    pub fn require_channel_number(&self) -> Result<u32, Error> {
        self.channel_number
            .ok_or_else(|| Error::Config("channelNumber parameter is required".into()))
    }

    /// The buffer description, or a config error if it was never set.
    ///
    /// # Errors
    ///
    /// Fails when the option is missing.
    pub fn require_buffer_parameters(&self) -> Result<&BufferParameters, Error> {
        self.buffer_parameters
            .as_ref()
            .ok_or_else(|| Error::Config("dmaBuffer parameter is required".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_id_parsing_forms() {
        assert_eq!(
            "1041:0".parse::<CardId>().unwrap(),
            CardId::Serial(SerialId::new(1041, 0))
        );
        assert_eq!(
            "1041".parse::<CardId>().unwrap(),
            CardId::Serial(SerialId::new(1041, 0))
        );
        assert_eq!("#2".parse::<CardId>().unwrap(), CardId::Sequence(2));
        match "42:00.0".parse::<CardId>().unwrap() {
            CardId::Address(addr) => assert_eq!(addr.to_string(), "42:00.0"),
            other => panic!("unexpected {other:?}"),
        }
        assert!("".parse::<CardId>().is_err());
        assert!("#x".parse::<CardId>().is_err());
    }

    #[test]
    fn card_id_display_roundtrip() {
        for text in ["1041:1", "#0", "42:00.0"] {
            let id: CardId = text.parse().unwrap();
            assert_eq!(id.to_string().parse::<CardId>().unwrap(), id);
        }
    }

    #[test]
    fn builder_round_trips_options() {
        let params = Parameters::for_channel(CardId::Sequence(0), 3)
            .set_generator_enabled(true)
            .set_generator_pattern(GeneratorPattern::Incremental)
            .set_loopback_mode(LoopbackMode::Internal)
            .set_dma_page_size(8 * 1024);

        assert_eq!(params.require_channel_number().unwrap(), 3);
        assert_eq!(params.generator_enabled(), Some(&true));
        assert_eq!(params.loopback_mode(), Some(&LoopbackMode::Internal));
        assert_eq!(params.dma_page_size(), Some(&8192));
        assert!(params.clock().is_none());
    }

    #[test]
    fn required_options_report_missing() {
        let params = Parameters::new();
        assert!(params.require_card_id().is_err());
        assert!(params.require_buffer_parameters().is_err());
    }
}
