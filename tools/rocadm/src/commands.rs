//! Subcommand implementations.

use std::time::Instant;

use anyhow::{bail, Context, Result};

use rocard::{
    Bar, BufferParameters, CardId, ChannelFactory, DeviceRegistry, LoopbackMode, Parameters,
    Superpage,
};

use crate::cli::{
    CardArgs, ConfigArgs, FwCheckArgs, LoopbackArgs, PrintFifoArgs, RegReadArgs,
    RegReadRangeArgs, RegWriteArgs,
};

/// Builds the parameters every card-addressed command starts from.
fn card_params(args: &CardArgs) -> Result<Parameters> {
    let card_id: CardId = args
        .id
        .parse()
        .with_context(|| format!("invalid --id {:?}", args.id))?;
    Ok(Parameters::for_channel(card_id, args.channel))
}

fn open_bar(args: &CardArgs) -> Result<Bar> {
    Ok(ChannelFactory.obtain_bar(&card_params(args)?)?)
}

/// `list`: one line per card, in stable enumeration order.
pub fn list() -> Result<()> {
    let registry = DeviceRegistry::open()?;
    let cards = registry.enumerate()?;
    if cards.is_empty() {
        println!("no readout cards found");
        return Ok(());
    }
    println!(
        "{:<4} {:<7} {:<12} {:<10} {:<10} {:<5}",
        "#", "type", "pci address", "vendor:dev", "serial", "numa"
    );
    for (sequence, card) in cards.iter().enumerate() {
        println!(
            "{:<4} {:<7} {:<12} {:<10} {:<10} {:<5}",
            sequence,
            card.card_type.to_string(),
            card.pci_address.to_string(),
            card.pci_id.to_string(),
            card.serial_id.to_string(),
            card.numa_node,
        );
    }
    Ok(())
}

/// `reg-read`: one register.
pub fn reg_read(args: &RegReadArgs) -> Result<()> {
    let bar = open_bar(&args.card)?;
    let value = bar.read32(args.address)?;
    println!("0x{:08x}  0x{value:08x}", args.address);
    Ok(())
}

/// `reg-read-range`: consecutive registers, four per line.
pub fn reg_read_range(args: &RegReadRangeArgs) -> Result<()> {
    let bar = open_bar(&args.card)?;
    for row in 0..args.count.div_ceil(4) {
        let base = args.address + row * 16;
        print!("0x{base:08x} ");
        for column in 0..4 {
            let index = row * 4 + column;
            if index >= args.count {
                break;
            }
            print!(" 0x{:08x}", bar.read32(base + column * 4)?);
        }
        println!();
    }
    Ok(())
}

/// `reg-write`: one register.
pub fn reg_write(args: &RegWriteArgs) -> Result<()> {
    let bar = open_bar(&args.card)?;
    bar.write32(args.address, args.value)?;
    println!("0x{:08x} <- 0x{:08x}", args.address, args.value);
    Ok(())
}

/// `config`: apply a configuration file.
pub fn config(args: &ConfigArgs) -> Result<()> {
    let card_id: CardId = args
        .id
        .parse()
        .with_context(|| format!("invalid --id {:?}", args.id))?;
    let configurator = rocard::CardConfigurator::from_uri(card_id, &args.config_uri, args.force)?;
    configurator.apply()?;
    println!("configuration applied");
    Ok(())
}

/// `fw-check`: print firmware identity, optionally enforcing a match.
pub fn fw_check(args: &FwCheckArgs) -> Result<()> {
    let bar = open_bar(&args.card)?;
    let info = bar
        .firmware_info()?
        .unwrap_or_else(|| "unavailable".to_string());
    println!("firmware: {info}");
    if let Some(expect) = &args.expect {
        if *expect != info {
            bail!("firmware mismatch: expected {expect}, found {info}");
        }
        println!("firmware matches");
    }
    Ok(())
}

/// `metrics`: counters and health for monitoring. Expects `--channel 2`
/// (BAR 2) on the CRU.
pub fn metrics(args: &CardArgs) -> Result<()> {
    let bar = open_bar(args)?;
    if let Some(temperature) = bar.temperature()? {
        println!("temperature_celsius {temperature:.1}");
    }
    if let Bar::Cru(cru) = &bar {
        println!("dropped_packets {}", cru.dropped_packets()?);
        println!("ctp_clock_hz {}", cru.ctp_clock()?);
        println!("local_clock_hz {}", cru.local_clock()?);
    }
    Ok(())
}

/// `onu-status`: PON upstream calibration state.
pub fn onu_status(args: &CardArgs) -> Result<()> {
    let Bar::Cru(cru) = open_bar(args)? else {
        bail!("the ONU status only exists on the CRU");
    };
    let status = rocard::cru::Ttc::new(&cru).onu_status()?;
    println!("onu status word: 0x{status:08x}");
    println!("  calibrated: {}", status & 0x1 != 0);
    Ok(())
}

/// `pkt-monitor`: per-link packet counters.
pub fn pkt_monitor(args: &CardArgs) -> Result<()> {
    let Bar::Cru(cru) = open_bar(args)? else {
        bail!("packet counters only exist on the CRU");
    };
    let datapath = rocard::cru::DatapathWrapper::new(&cru);
    println!("{:<6} {:<9} {:<12}", "link", "enabled", "packets");
    for link in 0..rocard::cru::MAX_LINKS {
        let enabled = datapath.link_enabled(link)?;
        if !enabled {
            continue;
        }
        println!(
            "{:<6} {:<9} {:<12}",
            link,
            enabled,
            datapath.accepted_packets(link)?
        );
    }
    Ok(())
}

/// `status`: card-level configuration snapshot. Expects `--channel 2`
/// (BAR 2) on the CRU.
pub fn status(args: &CardArgs) -> Result<()> {
    let bar = open_bar(args)?;
    println!("card type: {}", bar.card_type());
    if let Some(serial) = bar.serial().ok().flatten() {
        println!("serial: {serial}");
    }
    if let Some(info) = bar.firmware_info().ok().flatten() {
        println!("firmware: {info}");
    }
    if let Bar::Cru(cru) = &bar {
        let report = cru.report()?;
        println!("clock: {}", report.clock);
        println!("downstream data: {}", report.downstream_data);
        for link in report.links.iter().filter(|l| l.enabled) {
            println!(
                "link {:>2}: {} mux={}",
                link.id, link.datapath_mode, link.gbt_mux
            );
        }
    }
    Ok(())
}

/// `trig-monitor`: TTC data selection registers.
pub fn trig_monitor(args: &CardArgs) -> Result<()> {
    let Bar::Cru(cru) = open_bar(args)? else {
        bail!("the TTC monitor only exists on the CRU");
    };
    let ttc = rocard::cru::Ttc::new(&cru);
    println!("clock: {}", ttc.clock()?);
    println!("downstream data: {}", ttc.downstream_data()?);
    Ok(())
}

/// `ul`: user-logic information. Expects `--channel 2` (BAR 2) on the CRU.
pub fn user_logic(args: &CardArgs) -> Result<()> {
    let bar = open_bar(args)?;
    if let Some(info) = bar.firmware_info().ok().flatten() {
        println!("user logic firmware: {info}");
    }
    if let Some(card_id) = bar.card_id().ok().flatten() {
        println!("chip id: {card_id}");
    }
    Ok(())
}

/// `print-fifo`: dump a CRORC channel's ready-FIFO.
pub fn print_fifo(args: &PrintFifoArgs) -> Result<()> {
    let params = card_params(&args.card)?;
    let registry = DeviceRegistry::open()?;
    let handle = registry.find(&params.require_card_id()?)?;
    let paths =
        rocard::paths::ChannelPaths::new(handle.descriptor().pci_address, args.card.channel);
    let fifo = rocard::crorc::ReadyFifo::create(&paths.fifo())?;

    println!("{:<6} {:<12} {:<12}", "index", "length", "status");
    for index in 0..rocard::crorc::READY_FIFO_ENTRIES {
        let (length, status) = (fifo.length(index), fifo.status(index));
        if args.only_filled && status == u32::MAX {
            continue;
        }
        println!("{index:<6} 0x{length:08x}   0x{status:08x}");
    }
    Ok(())
}

/// `sanity-check`: walk a pattern through the debug register.
pub fn sanity_check(args: &CardArgs) -> Result<()> {
    let bar = open_bar(args)?;
    let Bar::Cru(cru) = &bar else {
        bail!("the sanity check uses the CRU debug register");
    };
    for pattern in [0x00u8, 0xff, 0xa5, 0x5a] {
        cru.set_debug_register(pattern)?;
        let read_back = cru.debug_register()?;
        if read_back != pattern {
            bail!("debug register wrote 0x{pattern:02x}, read back 0x{read_back:02x}");
        }
    }
    println!("sanity check passed");
    Ok(())
}

/// `cleanup`: reclaim orphaned DMA buffer registrations.
pub fn cleanup() -> Result<()> {
    let reclaimed = rocard::cleanup_orphans(&rocard::paths::buffer_registry_dir())?;
    if reclaimed.is_empty() {
        println!("nothing to clean up");
    } else {
        for id in reclaimed {
            println!("reclaimed buffer registration {id}");
        }
    }
    Ok(())
}

/// `loopback`: push superpages through the card's internal generator and
/// report throughput.
pub fn loopback(args: &LoopbackArgs) -> Result<()> {
    let buffer_size = args.superpages * args.superpage_size;
    let buffer = match &args.buffer_file {
        Some(path) => BufferParameters::File {
            path: path.clone(),
            size: buffer_size,
        },
        None => BufferParameters::File {
            path: std::env::temp_dir().join(format!("rocadm_loopback_{}", std::process::id())),
            size: buffer_size,
        },
    };

    let params = card_params(&args.card)?
        .set_buffer_parameters(buffer)
        .set_generator_enabled(true)
        .set_loopback_mode(LoopbackMode::Internal);

    let mut channel = ChannelFactory.obtain_channel(&params)?;
    channel.start_dma()?;
    let started = Instant::now();

    let mut pushed = 0;
    let mut popped = 0;
    while popped < args.superpages {
        while pushed < args.superpages && channel.transfer_queue_available() > 0 {
            channel.push_superpage(Superpage::new(
                pushed * args.superpage_size,
                args.superpage_size,
            ))?;
            pushed += 1;
        }
        channel.fill_superpages()?;
        while channel.ready_queue_size() > 0 {
            channel.pop_superpage()?;
            popped += 1;
        }
    }

    let elapsed = started.elapsed();
    channel.stop_dma()?;

    let bytes = (popped * args.superpage_size) as f64;
    let throughput = bytes / elapsed.as_secs_f64() / 1e9;
    println!("transferred {popped} superpage(s) in {elapsed:.2?} ({throughput:.2} GB/s)");
    Ok(())
}
