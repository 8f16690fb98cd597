//! mixbridge - mode-scoped control surface bridge
//!
//! Stands the protocol dispatchers up from configuration and runs until
//! interrupted. Device and DAW endpoint trees link against the library and
//! register their routings through the mode manager.

use anyhow::{Context, Result};
use clap::Parser;
use mixbridge::config::BridgeConfig;
use mixbridge::{MidiDispatcher, OscDispatcher};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Mixbridge - bridge MIDI control surfaces to DAW and interface mixers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level);

    if args.list_ports {
        return list_ports();
    }

    info!("Starting mixbridge...");
    info!("Configuration file: {}", args.config);
    let config = BridgeConfig::load(&args.config)?;

    let midi = MidiDispatcher::new("mixbridge");
    midi.open(&config.midi.input_port, &config.midi.output_port)
        .context("Failed to open MIDI ports")?;
    midi.listen().context("Failed to start MIDI listener")?;

    let osc = OscDispatcher::new();
    osc.serve(&config.osc.bind_addr)
        .await
        .context("Failed to start OSC listener")?;
    if let Some(remote) = &config.osc.remote_addr {
        osc.set_remote(remote)
            .context("Failed to configure OSC remote")?;
    }

    info!("Bridge running, press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    midi.close();
    Ok(())
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn list_ports() -> Result<()> {
    println!("\n=== MIDI Input Ports ===");
    for name in MidiDispatcher::list_input_ports()? {
        println!("  {name}");
    }

    println!("\n=== MIDI Output Ports ===");
    for name in MidiDispatcher::list_output_ports()? {
        println!("  {name}");
    }
    println!();
    Ok(())
}
