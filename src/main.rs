//! Ripple bridge - main entry point

use clap::{Parser, Subcommand};
use ripple_bridge::config::{BridgeConfig, ConfigError};
use ripple_bridge::observability::{init_default_logging, metrics};
use ripple_bridge::{BridgeError, BridgeHandle, BridgeLoop, MqttClient, SerialReader};
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

/// Default config locations, searched in order
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["ripple-bridge.toml", "config/ripple-bridge.toml"];

/// Serial-to-MQTT bridge for Ripple sensors
#[derive(Parser)]
#[command(name = "ripple-bridge")]
#[command(about = "Forward Ripple sensor readings from a serial device to an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "RIPPLE_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_default_logging() {
        eprintln!("Failed to initialize logging: {e}");
        process::exit(1);
    }

    info!("Starting ripple-bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            process::exit(BridgeError::from(e).exit_code());
        }
    };

    let result = match cli.command {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        process::exit(e.exit_code());
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    if let Some(path) = config_path {
        info!(path = %path.display(), "Loading configuration");
        return BridgeConfig::load_from_file(path);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = Path::new(path_str);
        if path.exists() {
            info!(path = %path.display(), "Loading configuration");
            return BridgeConfig::load_from_file(path);
        }
    }

    Err(ConfigError::InvalidConfig(format!(
        "no configuration file found; pass -c/--config or create {}",
        DEFAULT_CONFIG_PATHS[0]
    )))
}

async fn run_bridge(config: BridgeConfig) -> Result<(), BridgeError> {
    info!(
        device = %config.serial.device,
        broker = %config.mqtt.broker_url,
        sensor_id = config.bridge.sensor_id,
        "Bridge configured"
    );

    let client = MqttClient::new(config.mqtt.clone())?;
    let (bridge, handle) = BridgeLoop::new(&config, client);

    let serial = config.serial.clone();
    let run = tokio::spawn(bridge.run(move || SerialReader::open(&serial)));
    tokio::spawn(forward_shutdown_signals(handle.clone()));

    let result = match run.await {
        Ok(result) => result,
        Err(e) => Err(BridgeError::faulted(format!("Bridge task failed: {e}"))),
    };

    let stats = handle.stats().await;
    match serde_json::to_string(&stats) {
        Ok(json) => info!(stats = %json, "Bridge statistics"),
        Err(e) => warn!(error = %e, "Failed to serialize bridge statistics"),
    }
    match serde_json::to_string(&metrics().get_metrics()) {
        Ok(json) => info!(metrics = %json, "Final metrics"),
        Err(e) => warn!(error = %e, "Failed to serialize metrics"),
    }

    result
}

/// Turn SIGINT/SIGTERM into a graceful bridge shutdown
async fn forward_shutdown_signals(handle: BridgeHandle) {
    let (mut sigint, mut sigterm) = match (
        signal::unix::signal(signal::unix::SignalKind::interrupt()),
        signal::unix::signal(signal::unix::SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Failed to install signal handlers");
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }
    handle.shutdown();
}

fn handle_config_command(config: &BridgeConfig, show: bool) -> Result<(), BridgeError> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::InvalidConfig(format!("cannot render config: {e}")))?;
        println!("Current configuration:");
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}
