//! asrc-route - routing negotiation CLI

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use asrc_route::config::{Args, Command, PlatformConfig};
use asrc_route::format::PcmFormat;
use asrc_route::graph::{Direction, NodeId, NodeKind};
use asrc_route::hw::{RegisterFile, SimulatedFirmware};
use asrc_route::RouteEngine;

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    let command = args.command.clone().unwrap_or_default();
    if command == Command::SampleConfig {
        return cmd_sample_config();
    }

    let config = match &args.config {
        Some(path) => PlatformConfig::load(path)?,
        None => PlatformConfig::load_default()?,
    };
    let platform = config.build().context("Failed to build platform")?;

    let bus = Arc::new(RegisterFile::new());
    let (ipc, firmware) = SimulatedFirmware::spawn();
    let engine = RouteEngine::new(platform, bus.clone(), Arc::new(ipc))
        .context("Failed to program converter mapping")?;

    let selections = args.selections().map_err(|e| anyhow!(e))?;
    for (selector, target) in &selections {
        let sel = find_node(&engine, selector)?;
        // empty or "-" opens the selector
        let tgt = if target.is_empty() || target == "-" {
            None
        } else {
            Some(find_node(&engine, target)?)
        };
        engine.graph().set_selection(sel, tgt)?;
    }

    let result = match command {
        Command::Show => cmd_show(&engine),
        Command::Discover { node, direction } => cmd_discover(&engine, &node, direction),
        Command::Resolve { node, direction } => cmd_resolve(&engine, &node, direction),
        Command::Open {
            channel,
            direction,
            rate,
            width,
            channels,
        } => cmd_open(
            &engine,
            direction,
            channel,
            PcmFormat::new(rate, width, channels),
        ),
        Command::Lock {
            channel,
            direction,
            unit,
        } => cmd_lock(&engine, direction, channel, unit),
        Command::Restore => cmd_restore(&engine),
        Command::SampleConfig => cmd_sample_config(),
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }

    info!("{} register writes", bus.write_count());
    drop(engine);
    firmware.join();
    result
}

fn init_logging(args: &Args) -> Result<()> {
    let level = args.log_level();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if let Some(log_file) = &args.log {
        let file = std::fs::File::create(log_file)?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

fn find_node(engine: &RouteEngine, name: &str) -> Result<NodeId> {
    engine
        .graph()
        .find(name)
        .ok_or_else(|| anyhow!("Node not found: {}", name))
}

fn node_name(engine: &RouteEngine, id: NodeId) -> String {
    engine
        .graph()
        .node(id)
        .map(|n| n.name.clone())
        .unwrap_or_else(|_| id.to_string())
}

/// Print topology, slots and pools
fn cmd_show(engine: &RouteEngine) -> Result<()> {
    let graph = engine.graph();

    println!("Nodes:\n");
    for node in graph.nodes() {
        let detail = match &node.kind {
            NodeKind::DmaEndpoint { channel, direction } => format!("dma {} ch{}", direction, channel),
            NodeKind::FormatSlot { slot } => format!("{}", slot),
            NodeKind::ConversionUnit { channel } => format!("asrc ch{}", channel),
            NodeKind::Selector => match graph.selection(node.id) {
                Some(target) => format!("selector -> {}", node_name(engine, target)),
                None => "selector (open)".to_string(),
            },
            NodeKind::PhysicalInterface { override_format } => match override_format {
                Some(fmt) => format!("interface, fixed {}", fmt),
                None => "interface".to_string(),
            },
        };
        println!("  {:12} {}", node.name, detail);
    }

    println!("\nFormat slots:\n");
    for slot in engine.slots() {
        print!("  {:6} {:8} {}", slot.name, slot.direction, slot.stored());
        if slot.auto_config {
            print!(" (floor {})", slot.floor);
        }
        if let Some(master) = slot.master {
            print!(" (follows {})", master);
        }
        println!();
    }

    for direction in Direction::ALL {
        println!("\n{} converters:\n", direction);
        for status in engine.pool_snapshot(direction) {
            println!("  {}", status);
        }
    }

    println!();
    Ok(())
}

/// Print the live path from a node
fn cmd_discover(engine: &RouteEngine, node: &str, direction: Direction) -> Result<()> {
    let start = find_node(engine, node)?;
    let path = engine.graph().discover(start, direction)?;

    let names: Vec<String> = path.iter().map(|id| node_name(engine, id)).collect();
    println!("{}", names.join(" -> "));
    Ok(())
}

fn cmd_resolve(engine: &RouteEngine, node: &str, direction: Direction) -> Result<()> {
    let start = find_node(engine, node)?;
    let format = engine.resolve_format(start, direction)?;
    println!("{}", format);
    Ok(())
}

/// Negotiate a stream open and report what was programmed
fn cmd_open(engine: &RouteEngine, direction: Direction, channel: u8, requested: PcmFormat) -> Result<()> {
    let result = engine.hw_params(direction, channel, requested)?;

    println!("Requested: {}", requested);
    if result.adjusted != requested {
        println!("Adjusted:  {}", result.adjusted);
    }
    println!("Target:    {}", result.target);

    match (result.unit, &result.tick) {
        (Some(unit), Some(tick)) => {
            println!("Converter: unit {} ({:?})", unit, tick.mode);
            println!(
                "  {} {}Hz -> {} {}Hz, ovsf {} dcmf {}",
                tick.input, tick.in_rate, tick.output, tick.out_rate, tick.ovsf, tick.dcmf
            );
            println!("  ifactor {} ofactor {}", tick.ifactor, tick.ofactor);
            if let Some(bus_tick) = tick.bus_tick {
                println!("  bus tick {}/{}", bus_tick.num, bus_tick.div);
            }
        }
        _ => println!("Converter: none"),
    }
    Ok(())
}

fn cmd_lock(engine: &RouteEngine, direction: Direction, channel: u8, unit: u8) -> Result<()> {
    engine.lock_conversion(direction, channel, unit)?;
    println!("Unit {} pinned to {} ch{}", unit, direction, channel);
    for status in engine.pool_snapshot(direction) {
        println!("  {}", status);
    }
    Ok(())
}

fn cmd_restore(engine: &RouteEngine) -> Result<()> {
    let report = engine.restore_all();
    println!(
        "Restored: {} messages acked, {} registers written",
        report.messages_acked, report.registers_restored
    );
    if !report.is_clean() {
        return Err(anyhow!(
            "Restore incomplete: {} ipc failures, {} register failures",
            report.ipc_failures,
            report.register_failures
        ));
    }
    Ok(())
}

fn cmd_sample_config() -> Result<()> {
    print!("{}", PlatformConfig::sample_config()?);
    Ok(())
}
