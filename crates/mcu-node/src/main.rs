//! MCU node daemon
//!
//! Serves UDS diagnostics and OTA transfers for the MCU and relays traffic
//! between the external API and the peripheral units.
//!
//! # Usage
//!
//! ```bash
//! ./mcu-node --interface vcan0 --backing-path /dev/loop21
//! ```
//!
//! With config file:
//! ```bash
//! ./mcu-node --config config/mcu.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mcu_uds::{open_transport, Dispatcher, McuConfig, McuContext};

#[derive(Parser, Debug)]
#[command(name = "mcu-node")]
#[command(about = "MCU node: UDS diagnostics, OTA transfer and frame routing")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CAN interface name (overrides config)
    #[arg(short, long)]
    interface: Option<String>,

    /// Unit id of this MCU, e.g. 0x10 (overrides config)
    #[arg(long, value_parser = parse_unit_id)]
    unit_id: Option<u8>,

    /// Backing file or partition firmware is written to (overrides config)
    #[arg(long)]
    backing_path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing; RUST_LOG wins over the defaults
    let default_filter = if args.verbose {
        "mcu_node=debug,mcu_uds=debug"
    } else {
        "mcu_node=info,mcu_uds=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from: {}", path.display());
            McuConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => McuConfig::default(),
    };
    if let Some(interface) = args.interface {
        config.transport.interface = interface;
    }
    if let Some(unit_id) = args.unit_id {
        config.unit_id = unit_id;
    }
    if let Some(backing_path) = args.backing_path {
        config.memory.backing_path = backing_path;
    }

    info!("Starting MCU node");
    info!(
        interface = %config.transport.interface,
        api_interface = config.transport.api_interface.as_deref().unwrap_or("-"),
        unit_id = format!("0x{:02X}", config.unit_id),
        backing_path = %config.memory.backing_path.display()
    );

    if !config.transfer.staging_dir.is_dir() {
        warn!(
            staging_dir = %config.transfer.staging_dir.display(),
            "Staging directory missing, staged transfers will fail"
        );
    }

    // Everything that can fail fatally happens before any task starts
    config.validate().context("Invalid configuration")?;
    let bus = open_transport(&config.transport.interface)
        .with_context(|| format!("Failed to open {}", config.transport.interface))?;
    let api = match &config.transport.api_interface {
        Some(interface) => Some(
            open_transport(interface)
                .with_context(|| format!("Failed to open API interface {}", interface))?,
        ),
        None => None,
    };
    let context = Arc::new(McuContext::open(config).context("Failed to initialise MCU")?);

    let mut dispatcher = Dispatcher::new(context, bus);
    if let Some(api) = api {
        dispatcher = dispatcher.with_api(api);
    }
    let handle = dispatcher.start();

    info!("MCU node ready - waiting for frames");
    info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    handle.shutdown().await;

    info!("MCU node stopped");
    Ok(())
}

fn parse_unit_id(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    u8::from_str_radix(digits, radix).map_err(|e| format!("Invalid unit id '{}': {}", s, e))
}
