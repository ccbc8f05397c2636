//! padgrid-gw - bridge MIDI control surfaces to OBS Studio
//!
//! Gateway turning generic and Mackie-Control MIDI surfaces into OBS
//! actions through a mappable pad grid, with a companion remote protocol.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use padgrid_gw::bridge::{ObsBridge, SessionConfig};
use padgrid_gw::cli;
use padgrid_gw::config::AppConfig;
use padgrid_gw::gateway::server as gateway_server;
use padgrid_gw::midi::sources::MidiSources;
use padgrid_gw::paths;
use padgrid_gw::router::Router;

/// PadGrid Gateway - map MIDI surfaces to OBS scenes, recording and mixing
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI input ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Run the interactive console
    #[arg(long)]
    console: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting padgrid-gw...");

    if args.list_ports {
        list_ports_formatted()?;
        return Ok(());
    }

    let config_path = args
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(paths::default_config_path);
    let config = AppConfig::load(&config_path).await?;
    info!("Configuration loaded from {}", config_path.display());

    // Bridge dials lazily on first outbound demand
    let obs = config.obs.clone().unwrap_or_default();
    let bridge = ObsBridge::new(SessionConfig {
        host: obs.host,
        port: obs.port,
        password: obs.password,
    });

    let router = Arc::new(Router::new(
        bridge,
        &config.tunables,
        paths::bindings_path(),
    ));
    router.spawn_notification_task();

    if let Err(e) = router.load_bindings().await {
        warn!("Could not load pad bindings: {:#}", e);
    }

    // Kick the bridge so the catalog is warm for learn defaults
    router.bridge().refresh_catalog();

    // MIDI sources deliver raw bytes into the pipeline channel
    let (source_tx, mut source_rx) = mpsc::channel(1000);
    let mut sources = MidiSources::new(source_tx);
    match sources.connect_matching(&config.midi.sources) {
        Ok(0) => warn!("No MIDI input ports connected; check config 'midi.sources'"),
        Ok(n) => info!("Connected {} MIDI source(s)", n),
        Err(e) => warn!("MIDI source setup failed: {:#}", e),
    }

    // Remote gateway
    if config.gateway.enabled {
        let gateway_router = Arc::clone(&router);
        let gateway_config = config.gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = gateway_server::run(gateway_router, gateway_config).await {
                warn!("Gateway stopped: {:#}", e);
            }
        });
    }

    // Optional interactive console
    if args.console {
        let console_router = Arc::clone(&router);
        tokio::spawn(async move {
            if let Err(e) = cli::run_console(console_router).await {
                warn!("Console ended: {:#}", e);
            }
        });
    }

    info!("Ready to process MIDI events!");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(message) = source_rx.recv() => {
                router.handle_source_message(message).await;
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    // Cleanup
    info!("Shutting down...");
    sources.disconnect_all();
    router.save_bindings().await;
    router.bridge().shutdown();
    info!("padgrid-gw shutdown complete");

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
}

fn list_ports_formatted() -> Result<()> {
    use colored::*;

    let ports = MidiSources::list_input_ports()?;
    println!("\n{}", "Available MIDI input ports:".bold().cyan());
    if ports.is_empty() {
        println!("  (none)");
    }
    for (i, name) in ports.iter().enumerate() {
        println!("  {} {}", format!("[{}]", i).yellow(), name);
    }
    Ok(())
}
