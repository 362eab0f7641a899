use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{after, select, tick};

use thermopoll::logging::{init_logging, init_logging_with, parse_level};
use thermopoll::mock::ScriptedTransport;
use thermopoll::{
    available_ports, AcquisitionConfig, AcquisitionController, ChannelSink, DisplayEvent,
    FrameCodec, Parity, PortConfig,
};

#[derive(Parser, Debug)]
#[command(name = "thermopoll", about = "Poll a serial temperature sensor and print readings")]
struct Args {
    /// Serial port path (e.g., /dev/ttyUSB0 or COM3)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, default_value_t = 9600)]
    baud: u32,

    /// Data bits (5-8)
    #[arg(long, default_value_t = 8)]
    data_bits: u8,

    /// Stop bits (1 or 2)
    #[arg(long, default_value_t = 1)]
    stop_bits: u8,

    /// Parity: none, odd or even
    #[arg(long, default_value = "none", value_parser = parse_parity)]
    parity: Parity,

    /// JSON file with acquisition settings (poll period, buffer window, ...)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Seconds to acquire before stopping
    #[arg(short, long, default_value_t = 30)]
    duration: u64,

    /// Readout refresh period in milliseconds, independent of the poll period
    #[arg(long, default_value_t = 1000)]
    refresh_ms: u64,

    /// Write every sample recorded this session to this file on exit
    #[arg(short, long)]
    save: Option<std::path::PathBuf>,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Poll a simulated sensor instead of a device
    #[arg(long)]
    simulate: bool,

    /// Log level (error, warn, info, debug, trace); defaults to THERMOPOLL_LOG/RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_parity(value: &str) -> std::result::Result<Parity, String> {
    match value.to_ascii_lowercase().as_str() {
        "none" | "n" => Ok(Parity::None),
        "odd" | "o" => Ok(Parity::Odd),
        "even" | "e" => Ok(Parity::Even),
        other => Err(format!("unknown parity '{other}'")),
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    match parse_level(args.log_level.as_deref()) {
        Some(level) => init_logging_with(Some(level)),
        None => init_logging(),
    }

    if args.list_ports {
        let ports = available_ports();
        if ports.is_empty() {
            println!("No serial ports found.");
        }
        for name in ports {
            println!("{name}");
        }
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => AcquisitionConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AcquisitionConfig::default(),
    };

    let (sink, events) = ChannelSink::new();
    let mut controller = AcquisitionController::new(config, Arc::new(sink))
        .context("Invalid acquisition settings")?;

    if args.simulate {
        println!("--- Polling simulated sensor ---");
        controller.open_transport("simulated", Box::new(simulated_sensor()));
        controller.start().context("Failed to start polling")?;
    } else {
        let port = args
            .port
            .clone()
            .context("No port given; use --port, --simulate or --list-ports")?;
        let port_config = PortConfig {
            port_name: port.clone(),
            baud_rate: args.baud,
            data_bits: args.data_bits,
            stop_bits: args.stop_bits,
            parity: args.parity,
        };
        println!("--- Polling {} @ {} baud ---", port, args.baud);
        controller
            .start_session(&port_config)
            .with_context(|| format!("Failed to open {port}"))?;
    }

    let refresh = tick(Duration::from_millis(args.refresh_ms.max(1)));
    let deadline = after(Duration::from_secs(args.duration));
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(DisplayEvent::Sample { sample, window }) => {
                    println!("{:.3}\t{:.2} °C\t({} in window)", sample.timestamp, sample.value, window.len());
                }
                Ok(DisplayEvent::FrameError(e)) => eprintln!("Frame error: {e}"),
                Ok(DisplayEvent::LinkError(e)) => eprintln!("Link error: {e}"),
                Ok(DisplayEvent::Faulted { failures }) => {
                    eprintln!("Polling halted after {failures} failed writes; reopen the port to continue.");
                    break;
                }
                Err(_) => break,
            },
            recv(refresh) -> _ => {
                if let Some(latest) = controller.latest() {
                    println!("Current: {:.2} °C", latest.value);
                }
            }
            recv(deadline) -> _ => break,
        }
    }

    println!("Stopping...");
    controller.stop_session();

    if let Some(path) = &args.save {
        let saved = controller
            .save_history(path)
            .with_context(|| format!("Failed to save samples to {}", path.display()))?;
        println!("Saved {} samples to {}", saved, path.display());
    }
    println!("Done.");
    Ok(())
}

/// A sensor that answers every request with a slowly drifting temperature.
fn simulated_sensor() -> ScriptedTransport {
    let codec = FrameCodec::new();
    let mut step = 0u32;
    ScriptedTransport::with_responder(move |_request| {
        step = step.wrapping_add(1);
        let celsius = 23.0 + 1.5 * (f64::from(step) / 10.0).sin();
        codec.encode_reply((celsius * 100.0).round() as u16)
    })
}
