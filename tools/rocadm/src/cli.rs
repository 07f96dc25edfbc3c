//! Command-line interface definitions for rocadm.

use clap::{Parser, Subcommand};

/// Readout card administration tool.
#[derive(Parser)]
#[command(name = "rocadm", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose driver logging.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// List the readout cards present on this host.
    List,
    /// Read one 32-bit register.
    RegRead(RegReadArgs),
    /// Read a range of 32-bit registers.
    RegReadRange(RegReadRangeArgs),
    /// Write one 32-bit register.
    RegWrite(RegWriteArgs),
    /// Apply a configuration file to a card.
    Config(ConfigArgs),
    /// Print firmware identity and optionally check it.
    FwCheck(FwCheckArgs),
    /// Run a short internal-loopback DMA transfer.
    Loopback(LoopbackArgs),
    /// Print transfer counters and card health.
    Metrics(CardArgs),
    /// Print the ONU/PON calibration status.
    OnuStatus(CardArgs),
    /// Print per-link packet counters.
    PktMonitor(CardArgs),
    /// Print the card's configuration state.
    Status(CardArgs),
    /// Print the TTC data selection registers.
    TrigMonitor(CardArgs),
    /// Print user-logic information.
    Ul(CardArgs),
    /// Print a CRORC channel's ready-FIFO.
    PrintFifo(PrintFifoArgs),
    /// Write and read back the debug register.
    SanityCheck(CardArgs),
    /// Reclaim state left behind by crashed channel owners.
    Cleanup,
}

/// Options shared by every card-addressed command.
#[derive(Parser)]
pub struct CardArgs {
    /// Card to open: PCI address, serial[:endpoint], or #sequence.
    #[arg(long)]
    pub id: String,

    /// DMA channel (or BAR index for register-level commands).
    #[arg(long, default_value_t = 0)]
    pub channel: u32,
}

/// Arguments for `reg-read`.
#[derive(Parser)]
pub struct RegReadArgs {
    #[command(flatten)]
    pub card: CardArgs,

    /// Byte offset of the register (hex accepted with 0x).
    #[arg(long, value_parser = parse_offset)]
    pub address: usize,
}

/// Arguments for `reg-read-range`.
#[derive(Parser)]
pub struct RegReadRangeArgs {
    #[command(flatten)]
    pub card: CardArgs,

    /// Byte offset of the first register.
    #[arg(long, value_parser = parse_offset)]
    pub address: usize,

    /// Number of consecutive registers to read.
    #[arg(long, default_value_t = 16)]
    pub count: usize,
}

/// Arguments for `reg-write`.
#[derive(Parser)]
pub struct RegWriteArgs {
    #[command(flatten)]
    pub card: CardArgs,

    /// Byte offset of the register.
    #[arg(long, value_parser = parse_offset)]
    pub address: usize,

    /// Value to write (hex accepted with 0x).
    #[arg(long, value_parser = parse_value)]
    pub value: u32,
}

/// Arguments for `config`.
#[derive(Parser)]
pub struct ConfigArgs {
    /// Card to configure.
    #[arg(long)]
    pub id: String,

    /// Configuration URI; must start with `file:`.
    #[arg(long)]
    pub config_uri: String,

    /// Configure unconditionally instead of only on mismatch.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for `fw-check`.
#[derive(Parser)]
pub struct FwCheckArgs {
    #[command(flatten)]
    pub card: CardArgs,

    /// Fail unless the firmware identity equals this string.
    #[arg(long)]
    pub expect: Option<String>,
}

/// Arguments for `loopback`.
#[derive(Parser)]
pub struct LoopbackArgs {
    #[command(flatten)]
    pub card: CardArgs,

    /// Superpages to transfer.
    #[arg(long, default_value_t = 64)]
    pub superpages: usize,

    /// Superpage size in bytes (multiple of 32 KiB).
    #[arg(long, default_value_t = 1024 * 1024, value_parser = parse_offset)]
    pub superpage_size: usize,

    /// Backing file for the DMA buffer (hugetlbfs in production).
    #[arg(long)]
    pub buffer_file: Option<std::path::PathBuf>,
}

/// Arguments for `print-fifo`.
#[derive(Parser)]
pub struct PrintFifoArgs {
    #[command(flatten)]
    pub card: CardArgs,

    /// Print only entries the firmware has written.
    #[arg(long)]
    pub only_filled: bool,
}

/// Parses a decimal or `0x`-prefixed hex offset.
fn parse_offset(input: &str) -> Result<usize, String> {
    parse_prefixed(input).map_err(|()| format!("invalid offset {input:?}"))
}

/// Parses a decimal or `0x`-prefixed hex 32-bit value.
fn parse_value(input: &str) -> Result<u32, String> {
    let wide = parse_prefixed(input).map_err(|()| format!("invalid value {input:?}"))?;
    u32::try_from(wide).map_err(|_| format!("value {input:?} exceeds 32 bits"))
}

fn parse_prefixed(input: &str) -> Result<usize, ()> {
    if let Some(hex) = input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16).map_err(|_| ())
    } else {
        input.parse().map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_parse_in_both_bases() {
        assert_eq!(parse_offset("0x200").unwrap(), 0x200);
        assert_eq!(parse_offset("512").unwrap(), 512);
        assert!(parse_offset("0xzz").is_err());
    }

    #[test]
    fn reg_read_arguments() {
        let cli = Cli::try_parse_from([
            "rocadm", "reg-read", "--id", "42:00.0", "--channel", "2", "--address", "0x20002c",
        ])
        .unwrap();
        match cli.command {
            Command::RegRead(args) => {
                assert_eq!(args.card.id, "42:00.0");
                assert_eq!(args.card.channel, 2);
                assert_eq!(args.address, 0x20002c);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn values_must_fit_32_bits() {
        assert!(parse_value("0x1ffffffff").is_err());
        assert_eq!(parse_value("0xffffffff").unwrap(), u32::MAX);
    }
}
