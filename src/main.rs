//! HAPCAN bridge CLI - bidirectional CAN ↔ MQTT/TCP bridge daemon.
//!
//! This is the main binary entry point. See the `hapcan_bridge` library for
//! the core functionality.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hapcan_bridge::config::{default_config_path, BridgeConfig};
use hapcan_bridge::supervisor::Supervisor;
use mimalloc::MiMalloc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// mimalloc outperforms the system allocator under the multi-threaded
/// tokio workload this daemon runs.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Global flag for signal-triggered shutdown (as `Arc` for signal-hook
/// compatibility), mirrored into a [`hapcan_bridge::endpoint::ShutdownSignal`]
/// once the runtime is up.
static SHUTDOWN_FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
    std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));

#[derive(Parser)]
#[command(name = "hapcan-bridge")]
#[command(version)]
#[command(about = "Bidirectional bridge between a HAPCAN CAN bus and MQTT / TCP collaborators")]
struct Cli {
    /// Path to the bridge configuration file; defaults per
    /// `HAPCAN_BRIDGE_CONFIG` / platform config dir resolution.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge daemon and run until a shutdown signal is received.
    Start,
    /// Print the effective configuration as JSON and exit.
    PrintConfig,
}

fn install_signal_handlers() -> Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGHUP, Arc::clone(&SHUTDOWN_FLAG))?;
    Ok(())
}

async fn run_start(config_path: std::path::PathBuf) -> Result<()> {
    install_signal_handlers().context("failed to register signal handlers")?;

    log::info!("hapcan-bridge starting, config = {}", config_path.display());
    let supervisor = Supervisor::new(config_path);

    let shutdown = supervisor.shutdown.clone();
    let watcher_handle = tokio::spawn(async move {
        while !SHUTDOWN_FLAG.load(std::sync::atomic::Ordering::Relaxed) {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        shutdown.trigger();
    });

    supervisor.run().await;
    watcher_handle.abort();

    log::info!("hapcan-bridge shut down cleanly");
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    // rumqttc's "use-rustls-no-provider" feature leaves crypto-provider
    // selection to us; install ring once before any TLS connection is made.
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Start => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
            runtime.block_on(run_start(config_path))?;
        }
        Commands::PrintConfig => {
            let config = BridgeConfig::load(&config_path);
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
