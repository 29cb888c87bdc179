//! dfu-server
//!
//! HTTP front end for `dfu-util`: lists DFU devices, flashes and reads back
//! firmware images, and pushes USB hot-plug notifications to clients.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use server::config::ServerConfig;
use server::dfu::DfuUtil;
use server::http::{self, AppState};
use server::images::ImageStore;
use server::usb::{Broadcaster, UsbMonitor};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "dfu-server")]
#[command(author, version, about = "DFU Server - Flash USB DFU devices over HTTP")]
#[command(long_about = "
An HTTP server around dfu-util. Enumerates DFU-capable devices, streams
firmware transfers, and publishes USB hot-plug events as server-sent events.

EXAMPLES:
    # Run with default config
    dfu-server

    # Run with custom config
    dfu-server --config /path/to/config.toml

    # List DFU devices without starting the server
    dfu-server --list-devices

    # Run with debug logging
    dfu-server --log-level debug

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/dfu-server/server.toml
    3. /etc/dfu-server/server.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List DFU devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        ServerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ServerConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("dfu-server v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let dfu = DfuUtil::new(
        config.dfu.tool.clone(),
        config.dfu.verbosity,
        config.dfu.exec_options(),
    );

    if args.list_devices {
        return list_devices_mode(&dfu).await;
    }

    run_server(config, dfu).await
}

/// Enumerate once, print and exit
async fn list_devices_mode(dfu: &DfuUtil) -> Result<()> {
    info!("Listing DFU devices...");
    let devices = dfu
        .list_devices()
        .await
        .context("Failed to enumerate devices")?;

    if devices.is_empty() {
        println!("No DFU devices found.");
        return Ok(());
    }

    println!("Found {} DFU device(s):\n", devices.len());
    for device in devices {
        println!(
            "  [{}] {}:{} ver={} devnum={} path={}",
            device.serial,
            device.vendor_id,
            device.product_id,
            device.version,
            device.device_number,
            device.bus_path.as_deref().unwrap_or("-")
        );
        for alt in &device.alt_settings {
            println!("      alt {}: {}", alt.id, alt.name);
            for sector in &alt.sectors {
                println!("        {} ({} bytes)", sector.address, sector.len_bytes());
            }
        }
        println!();
    }

    Ok(())
}

async fn run_server(config: ServerConfig, dfu: DfuUtil) -> Result<()> {
    let broadcaster = Broadcaster::new(
        config
            .hotplug
            .broadcaster_config()
            .context("Invalid hot-plug configuration")?,
    );

    if config.hotplug.enabled {
        match UsbMonitor::open() {
            Ok(monitor) => broadcaster
                .start(monitor)
                .context("Failed to start hot-plug broadcaster")?,
            Err(e) => warn!("Hot-plug notifications unavailable: {}", e),
        }
    } else {
        info!("Hot-plug notifications disabled");
    }

    let images_dir = config.dfu.images_dir();
    info!("Image directory: {}", images_dir.display());

    let state = AppState {
        dfu,
        images: ImageStore::new(images_dir),
        broadcaster: broadcaster.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!("Listening on http://{}", listener.local_addr()?);
    info!("Press Ctrl+C to shutdown");

    let shutdown_broadcaster = broadcaster.clone();
    let result = axum::serve(listener, http::router(state))
        .with_graceful_shutdown(async move {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                Err(e) => error!("Error waiting for Ctrl+C: {}", e),
            }
            // Ends open event streams so the server can drain
            if let Err(e) = shutdown_broadcaster.stop().await {
                error!("Error stopping hot-plug broadcaster: {}", e);
            }
        })
        .await
        .context("HTTP server failed");

    if let Err(e) = broadcaster.stop().await {
        error!("Error stopping hot-plug broadcaster: {}", e);
    }

    info!("Server shutdown complete");
    result
}
