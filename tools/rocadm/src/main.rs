//! Readout card administration tool.
//!
//! Thin glue over the `rocard` driver core: every subcommand resolves
//! `--id`/`--channel` into [`rocard::Parameters`], asks the factory for a
//! BAR or a channel, and prints what it finds. Exit code 0 on success;
//! failures render the error kind, its context fields, and, where the
//! driver knows them, probable causes.

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Command};

fn main() {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    if let Err(err) = run(cli.command) {
        eprintln!("error: {err:#}");
        if let Some(driver_err) = err.downcast_ref::<rocard::Error>() {
            for cause in driver_err.probable_causes() {
                eprintln!("  possible cause: {cause}");
            }
        }
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::List => commands::list(),
        Command::RegRead(args) => commands::reg_read(&args),
        Command::RegReadRange(args) => commands::reg_read_range(&args),
        Command::RegWrite(args) => commands::reg_write(&args),
        Command::Config(args) => commands::config(&args),
        Command::FwCheck(args) => commands::fw_check(&args),
        Command::Loopback(args) => commands::loopback(&args),
        Command::Metrics(args) => commands::metrics(&args),
        Command::OnuStatus(args) => commands::onu_status(&args),
        Command::PktMonitor(args) => commands::pkt_monitor(&args),
        Command::Status(args) => commands::status(&args),
        Command::TrigMonitor(args) => commands::trig_monitor(&args),
        Command::Ul(args) => commands::user_logic(&args),
        Command::PrintFifo(args) => commands::print_fifo(&args),
        Command::SanityCheck(args) => commands::sanity_check(&args),
        Command::Cleanup => commands::cleanup(),
    }
}
