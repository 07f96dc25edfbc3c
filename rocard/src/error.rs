//! Driver error taxonomy.
//!
//! Every failure the library can produce is a variant here, carrying the
//! structured context a caller (or the CLI renderer) needs. Errors are
//! always returned, never retried on the caller's behalf; the fatal kinds
//! additionally poison the channel they occurred on (see
//! [`crate::channel::DmaChannel`]).

use crate::types::{GeneratorPattern, LoopbackMode};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All error kinds of the driver core.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    // --- Configuration ---------------------------------------------------
    /// A register offset was not 32-bit aligned.
    #[error("register offset 0x{offset:x} is not 4-byte aligned (BAR {bar})")]
    InvalidRegisterOffset {
        /// Offending byte offset.
        offset: usize,
        /// BAR index the access targeted.
        bar: u32,
    },
    /// A register access fell outside the BAR.
    #[error("register offset 0x{offset:x} out of range for BAR {bar} of size 0x{size:x}")]
    BarOutOfRange {
        /// Offending byte offset.
        offset: usize,
        /// BAR index the access targeted.
        bar: u32,
        /// BAR size in bytes.
        size: usize,
    },
    /// The DMA buffer base does not satisfy the alignment contract.
    #[error("DMA buffer at 0x{address:x} is not {alignment}-byte aligned")]
    BufferUnaligned {
        /// User-space base address.
        address: usize,
        /// Required alignment in bytes.
        alignment: usize,
    },
    /// The DMA buffer is empty or not a whole number of DMA pages.
    #[error("DMA buffer size 0x{size:x} is not a positive multiple of the {page_size} byte DMA page")]
    BufferTooSmall {
        /// Buffer size in bytes.
        size: usize,
        /// DMA page size in bytes.
        page_size: usize,
    },
    /// A translation was requested beyond the end of the buffer.
    #[error("offset 0x{offset:x} out of range for DMA buffer of size 0x{size:x}")]
    OffsetOutOfRange {
        /// Offending buffer offset.
        offset: usize,
        /// Buffer size in bytes.
        size: usize,
    },
    /// An option was set that would silently misconfigure this card type.
    #[error("parameter {parameter} is not applicable to this card: {reason}")]
    ParameterNotApplicable {
        /// Name of the offending parameter.
        parameter: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// The data generator does not support the requested pattern.
    #[error("unsupported data generator pattern {pattern}")]
    UnsupportedGeneratorPattern {
        /// Rejected pattern.
        pattern: GeneratorPattern,
    },
    /// The data generator does not support the requested event size.
    #[error("unsupported data generator size of {size} bytes")]
    UnsupportedGeneratorSize {
        /// Rejected size in bytes.
        size: usize,
    },
    /// The loopback mode is illegal for this card or generator setting.
    #[error("unsupported loopback mode {mode}: {reason}")]
    UnsupportedLoopback {
        /// Rejected mode.
        mode: LoopbackMode,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// The operation only makes sense on a different BAR.
    #[error("operation requires BAR {required}, called on BAR {actual}: {operation}")]
    WrongBarForOperation {
        /// BAR index the operation needs.
        required: u32,
        /// BAR index it was invoked on.
        actual: u32,
        /// Short operation name.
        operation: &'static str,
    },
    /// A link id outside the card's link range was requested.
    #[error("link {link} does not exist on this card (maximum {max})")]
    InvalidLinkId {
        /// Rejected link id.
        link: u32,
        /// Highest valid link id.
        max: u32,
    },

    // --- Runtime (recoverable) -------------------------------------------
    /// Every link's transfer queue is at firmware descriptor-ring depth.
    #[error("could not push superpage, transfer queue was full")]
    TransferQueueFull,
    /// No filled superpage is waiting for pickup.
    #[error("could not get superpage, ready queue was empty")]
    ReadyQueueEmpty,
    /// The superpage does not satisfy the size/alignment/bounds contract.
    #[error("invalid superpage (offset 0x{offset:x}, size 0x{size:x}): {reason}")]
    InvalidSuperpage {
        /// Superpage offset into the DMA buffer.
        offset: usize,
        /// Superpage size in bytes.
        size: usize,
        /// Which rule was violated.
        reason: &'static str,
    },
    /// Another process owns the channel.
    #[error("channel is in use (lock {lock_path})")]
    ChannelBusy {
        /// Path of the contended lock file.
        lock_path: String,
    },
    /// No card matched the given identifier.
    #[error("could not find card {card_id}")]
    CardNotFound {
        /// The identifier that failed to resolve.
        card_id: String,
    },
    /// More than one card matched the given identifier.
    #[error("card id {card_id} matches {count} cards")]
    AmbiguousCardId {
        /// The ambiguous identifier.
        card_id: String,
        /// How many cards matched.
        count: usize,
    },
    /// The requested DMA channel does not exist on this card type.
    #[error("channel {channel} is not available on this card")]
    InvalidChannelNumber {
        /// Rejected channel number.
        channel: u32,
    },
    /// The operation is not legal in the channel's current DMA state.
    #[error("{operation} is not allowed while DMA is {state}")]
    InvalidDmaState {
        /// Short operation name.
        operation: &'static str,
        /// The state the channel is in.
        state: &'static str,
    },

    // --- Protocol (command/response with the card) ------------------------
    /// A command/response procedure exceeded its busy-wait bound.
    #[error("{operation} timed out after {timeout_us} us")]
    CommandTimeout {
        /// Short operation name.
        operation: &'static str,
        /// The configured timeout in microseconds.
        timeout_us: u64,
    },
    /// The DDL link is reported down.
    #[error("link is not on")]
    LinkNotOn,
    /// The card did not accept a command.
    #[error("{operation} was not accepted by the card")]
    CommandNotAccepted {
        /// Short operation name.
        operation: &'static str,
    },
    /// The card reported an illegal command status word.
    #[error("card reported illegal command (status word 0x{status:08x})")]
    IllegalCommand {
        /// The offending status word.
        status: u32,
    },
    /// The front-end electronics rejected the RDYRX command.
    #[error("RDYRX command rejected by front-end (status word 0x{status:08x})")]
    RdyRxRejected {
        /// The reply status word.
        status: u32,
    },
    /// A ready-FIFO entry carried an error status.
    #[error(
        "data arrival error on ready-FIFO entry {index} (status 0x{status:08x}, length {length})"
    )]
    DataArrivalError {
        /// Status word of the entry.
        status: u32,
        /// Length word of the entry.
        length: u32,
        /// Ready-FIFO ring index.
        index: usize,
    },
    /// ONU/PON transmitter calibration did not converge.
    #[error("PON TX calibration failed (status 0x{status:08x})")]
    PonCalibrationFailed {
        /// Calibration status register value.
        status: u32,
    },

    // --- Fatal ------------------------------------------------------------
    /// Firmware reported more completions than the driver has outstanding.
    #[error(
        "firmware reported more superpages ({reported}) than outstanding ({outstanding}) on link {link}"
    )]
    FirmwareOvercommit {
        /// Link the inconsistency was observed on.
        link: u32,
        /// Completion count reported by firmware.
        reported: u32,
        /// Superpages the driver has in flight on that link.
        outstanding: u32,
    },
    /// The card reported the all-ones serial, indicating a hardware fault.
    #[error("card reported invalid serial number 0xffffffff, a fatal error may have occurred")]
    InvalidSerial,
    /// The DMA buffer could not be deregistered; the card may still write it.
    #[error("failed to deregister DMA buffer {id}")]
    BufferDeregistrationFailed {
        /// Registration id of the buffer.
        id: String,
    },

    // --- Wrapped lower layers ---------------------------------------------
    /// Config file syntax or content error.
    #[error("configuration error: {0}")]
    Config(String),
    /// PCI enumeration or BAR mapping failure.
    #[error(transparent)]
    Pci(#[from] rocard_pci::PciError),
    /// Filesystem or OS error outside the kinds above.
    #[error("I/O error during {operation}")]
    Io {
        /// Short operation name.
        operation: &'static str,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Translates an MMIO-layer failure into the driver taxonomy, keeping the
    /// offset/size context the CLI renders.
    #[must_use]
    pub fn from_mmio(err: rocard_mmio::MmioError, bar: u32) -> Self {
        match err {
            rocard_mmio::MmioError::UnalignedOffset { offset } => {
                Error::InvalidRegisterOffset { offset, bar }
            }
            rocard_mmio::MmioError::OutOfRange { offset, size } => {
                Error::BarOutOfRange { offset, bar, size }
            }
            rocard_mmio::MmioError::InvalidBitRange { lsb, width } => Error::Config(format!(
                "bit range lsb={lsb} width={width} does not fit in a register"
            )),
            rocard_mmio::MmioError::ValueTooWide { value, width } => Error::Config(format!(
                "value 0x{value:x} does not fit in {width} bits"
            )),
            rocard_mmio::MmioError::Map(source) => Error::Io {
                operation: "BAR mapping",
                source,
            },
        }
    }

    /// Short list of probable causes, rendered by the CLI under the error.
    #[must_use]
    pub fn probable_causes(&self) -> &'static [&'static str] {
        match self {
            Error::CardNotFound { .. } => &[
                "Invalid serial number, endpoint, or PCI address",
                "Card not inserted or not powered",
                "Kernel did not enumerate the card (check lspci)",
            ],
            Error::AmbiguousCardId { .. } => &[
                "Sequence number or serial matches several cards; use the PCI address",
            ],
            Error::ChannelBusy { .. } => &[
                "Another process has the channel open",
                "A previous owner crashed very recently; retry",
            ],
            Error::CommandTimeout { .. } => &[
                "Firmware is in a bad state; reset the card",
                "The link partner is not powered",
            ],
            Error::LinkNotOn => &[
                "Fibre not connected or remote end down",
                "Wrong loopback mode for a disconnected link",
            ],
            Error::BufferUnaligned { .. } | Error::BufferTooSmall { .. } => &[
                "DMA buffers must come from hugepage-backed allocations",
            ],
            Error::InvalidSerial => &[
                "Card may need a power cycle",
                "Firmware image may be corrupted",
            ],
            _ => &[],
        }
    }
}

/// Clonable record of a fatal error, kept by a poisoned channel so every
/// later call can fail with the original cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// See [`Error::FirmwareOvercommit`].
    FirmwareOvercommit {
        /// Link the inconsistency was observed on.
        link: u32,
        /// Completion count reported by firmware.
        reported: u32,
        /// Superpages the driver had in flight on that link.
        outstanding: u32,
    },
    /// See [`Error::InvalidSerial`].
    InvalidSerial,
}

impl From<FatalKind> for Error {
    fn from(kind: FatalKind) -> Self {
        match kind {
            FatalKind::FirmwareOvercommit {
                link,
                reported,
                outstanding,
            } => Error::FirmwareOvercommit {
                link,
                reported,
                outstanding,
            },
            FatalKind::InvalidSerial => Error::InvalidSerial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmio_errors_keep_context() {
        let err = Error::from_mmio(
            rocard_mmio::MmioError::OutOfRange {
                offset: 0x2000,
                size: 0x1000,
            },
            2,
        );
        match err {
            Error::BarOutOfRange { offset, bar, size } => {
                assert_eq!((offset, bar, size), (0x2000, 2, 0x1000));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fatal_kind_reconstructs_error() {
        let kind = FatalKind::FirmwareOvercommit {
            link: 3,
            reported: 5,
            outstanding: 3,
        };
        let err: Error = kind.into();
        assert!(err.to_string().contains("link 3"));
    }

    #[test]
    fn probable_causes_exist_for_lookup_failures() {
        let err = Error::CardNotFound {
            card_id: "#7".into(),
        };
        assert!(!err.probable_causes().is_empty());
    }
}
