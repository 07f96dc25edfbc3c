//! Card-level enumerations and their config-file string forms.
//!
//! The string sets are fixed: parsing is case-insensitive, emission uses the
//! canonical capitalised form, and `parse(emit(x)) == x` for every variant
//! (the config round-trip law relies on this).

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[ $( $name::$variant, )+ ];
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let text = match self {
                    $( $name::$variant => $text, )+
                };
                f.write_str(text)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err(Error::Config(format!(
                    concat!("invalid ", stringify!($name), " value {:?}"),
                    s
                )))
            }
        }
    };
}

string_enum! {
    /// The readout card families the driver knows.
    CardType {
        /// Software-only stand-in, no hardware required.
        Dummy => "DUMMY",
        /// C-RORC: PCIe x8 card with the DDL/DIU/SIU link stack.
        Crorc => "CRORC",
        /// CRU: PCIe x16 card with GBT links.
        Cru => "CRU",
    }
}

string_enum! {
    /// TTC clock source.
    Clock {
        /// Free-running local oscillator.
        Local => "LOCAL",
        /// Clock recovered from the TTC distribution network.
        Ttc => "TTC",
    }
}

string_enum! {
    /// Datapath wrapper forwarding mode.
    DatapathMode {
        /// Packetised readout.
        Packet => "PACKET",
        /// Continuous streaming readout.
        Streaming => "STREAMING",
    }
}

string_enum! {
    /// Source of TTC downstream data.
    DownstreamData {
        /// Central Trigger Processor.
        Ctp => "CTP",
        /// Fixed test pattern.
        Pattern => "PATTERN",
        /// Mid-trigger data.
        Midtrg => "MIDTRG",
    }
}

string_enum! {
    /// GBT frame decoding mode on the receive side.
    GbtMode {
        /// Standard GBT frame.
        Gbt => "GBT",
        /// Wide-bus frame.
        Wb => "WB",
    }
}

string_enum! {
    /// GBT downlink multiplexer selection.
    GbtMux {
        /// Timing, trigger and control stream.
        Ttc => "TTC",
        /// Detector data generator stream.
        Ddg => "DDG",
        /// Slow control stream.
        Sc => "SC",
    }
}

string_enum! {
    /// Loopback stage for test data.
    LoopbackMode {
        /// No loopback, data from the front-end.
        None => "NONE",
        /// Loopback inside the card, before the link.
        Internal => "INTERNAL",
        /// Loopback at the DIU.
        Diu => "DIU",
        /// Loopback at the SIU.
        Siu => "SIU",
    }
}

string_enum! {
    /// Data generator payload pattern.
    GeneratorPattern {
        /// Incrementing counter words.
        Incremental => "INCREMENTAL",
        /// Alternating `0xa5a5a5a5`.
        Alternating => "ALTERNATING",
        /// Constant `0x12345678`.
        Constant => "CONSTANT",
    }
}

string_enum! {
    /// How much of the link stack a reset touches. Levels are ordered;
    /// each is a superset of the previous.
    ResetLevel {
        /// No reset at all.
        Nothing => "NOTHING",
        /// Reset the RORC only.
        Rorc => "RORC",
        /// Reset the RORC and the DIU.
        RorcDiu => "RORC_DIU",
        /// Reset the RORC, the DIU and the SIU.
        RorcDiuSiu => "RORC_DIU_SIU",
    }
}

impl ResetLevel {
    /// Whether this level reaches out over the optical link (DIU or beyond).
    #[must_use]
    pub fn includes_external(self) -> bool {
        matches!(self, ResetLevel::RorcDiu | ResetLevel::RorcDiuSiu)
    }
}

impl LoopbackMode {
    /// Whether the loopback point is outside the card (DIU or SIU).
    #[must_use]
    pub fn is_external(self) -> bool {
        matches!(self, LoopbackMode::Diu | LoopbackMode::Siu)
    }
}

impl PartialOrd for ResetLevel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResetLevel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

/// Serial number plus endpoint, the portable identity of a card.
///
/// A dual-endpoint CRU shows up as two PCI functions sharing one serial; the
/// endpoint number tells them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerialId {
    /// Serial number burned into the card.
    pub serial: i32,
    /// Endpoint number (0 or 1; always 0 on CRORC).
    pub endpoint: i32,
}

impl SerialId {
    /// Creates a serial id.
    #[must_use]
    pub const fn new(serial: i32, endpoint: i32) -> Self {
        Self { serial, endpoint }
    }
}

impl fmt::Display for SerialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.serial, self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("internal".parse::<LoopbackMode>().unwrap(), LoopbackMode::Internal);
        assert_eq!("TTC".parse::<Clock>().unwrap(), Clock::Ttc);
        assert_eq!("ttc".parse::<GbtMux>().unwrap(), GbtMux::Ttc);
        assert!("bogus".parse::<Clock>().is_err());
    }

    #[test]
    fn display_parse_roundtrip() {
        for mode in LoopbackMode::ALL {
            assert_eq!(mode.to_string().parse::<LoopbackMode>().unwrap(), *mode);
        }
        for pattern in GeneratorPattern::ALL {
            assert_eq!(
                pattern.to_string().parse::<GeneratorPattern>().unwrap(),
                *pattern
            );
        }
        for level in ResetLevel::ALL {
            assert_eq!(level.to_string().parse::<ResetLevel>().unwrap(), *level);
        }
    }

    #[test]
    fn reset_levels_are_ordered() {
        assert!(ResetLevel::Nothing < ResetLevel::Rorc);
        assert!(ResetLevel::Rorc < ResetLevel::RorcDiu);
        assert!(ResetLevel::RorcDiu < ResetLevel::RorcDiuSiu);
        assert!(ResetLevel::RorcDiuSiu.includes_external());
        assert!(!ResetLevel::Rorc.includes_external());
    }

    #[test]
    fn serial_id_display() {
        assert_eq!(SerialId::new(1041, 0).to_string(), "1041:0");
    }
}
