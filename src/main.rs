//! mqtt-bridge - Main Entry Point
//!
//! Loads configuration, then serves the HTTP API until SIGINT or SIGTERM.

use clap::{Parser, Subcommand};
use mqtt_bridge::config::{BridgeConfig, ConfigOverrides};
use mqtt_bridge::observability::init_default_logging;
use mqtt_bridge::{BridgeServer, ConnectionManager, MqttTransport};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, Level};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// HTTP-to-MQTT bridge
#[derive(Parser)]
#[command(name = "mqtt-bridge")]
#[command(about = "Publish HTTP requests onto an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker host, overrides the config file
    #[arg(long, env = "MQTT_HOST")]
    mqtt_host: Option<String>,

    /// Broker port, overrides the config file
    #[arg(long, env = "MQTT_PORT")]
    mqtt_port: Option<u16>,

    /// HTTP listen port, overrides the config file
    #[arg(long, env = "HTTP_PORT")]
    http_port: Option<u16>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Run,
    /// Validate configuration
    Config {
        /// Print the resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => None,
        1 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    };
    init_default_logging(level);

    let overrides = ConfigOverrides {
        mqtt_host: cli.mqtt_host,
        mqtt_port: cli.mqtt_port,
        http_port: cli.http_port,
    };

    let config = match load_configuration(cli.config.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: Option<&Path>,
    overrides: ConfigOverrides,
) -> Result<BridgeConfig, BoxError> {
    let config = match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            BridgeConfig::load_from_file(path)?
        }
        None => {
            let default_paths = ["mqtt-bridge.toml", "config/mqtt-bridge.toml"];

            match default_paths.iter().map(Path::new).find(|path| path.exists()) {
                Some(path) => {
                    info!("Loading configuration from: {}", path.display());
                    BridgeConfig::load_from_file(path)?
                }
                None => {
                    info!("No configuration file found, using defaults");
                    BridgeConfig::default()
                }
            }
        }
    };

    Ok(config.apply_overrides(overrides)?)
}

async fn run_bridge(config: BridgeConfig) -> Result<(), BoxError> {
    info!(
        "Starting mqtt-bridge v{} (broker {})",
        env!("CARGO_PKG_VERSION"),
        config.mqtt.broker_url()
    );

    let transport = MqttTransport::new(config.mqtt.clone())?;
    let manager = Arc::new(ConnectionManager::new(transport));
    let server = BridgeServer::new(config.http.clone(), Arc::clone(&manager));

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    };

    server.run(shutdown).await?;

    manager.shutdown().await;
    info!("Application shutdown complete");
    Ok(())
}

fn handle_config_command(config: &BridgeConfig, show: bool) -> Result<(), BoxError> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
