//! Binary entry point.

use clap::Parser;
use pubsub_relay::config::Config;
use pubsub_relay::server;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pubsub-relay")]
#[command(about = "WebSocket relay bridging Redis pub/sub channels to clients")]
#[command(version)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Bind address for the WebSocket listener.
    #[arg(long)]
    bind_host: Option<String>,

    /// Bind port for the WebSocket listener.
    #[arg(long)]
    bind_port: Option<u16>,

    /// Redis broker host.
    #[arg(long)]
    broker_host: Option<String>,

    /// Redis broker port.
    #[arg(long)]
    broker_port: Option<u16>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log_path: Option<String>,
}

fn init_tracing(args: &Args) -> Result<(), String> {
    let filter = EnvFilter::try_new(&args.log_level)
        .map_err(|e| format!("invalid log level '{}': {e}", args.log_level))?;
    match &args.log_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("failed to open log file '{path}': {e}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<Config, String> {
    let mut config = match &args.config {
        Some(path) => {
            Config::from_file(path).map_err(|e| format!("failed to load '{path}': {e}"))?
        }
        None => Config::default(),
    };
    if let Some(host) = &args.bind_host {
        config.listener.address = host.clone();
    }
    if let Some(port) = args.bind_port {
        config.listener.port = port;
    }
    if let Some(host) = &args.broker_host {
        config.broker.address = host.clone();
    }
    if let Some(port) = args.broker_port {
        config.broker.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(message) = init_tracing(&args) {
        eprintln!("{message}");
        std::process::exit(1);
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(message) => {
            error!("{message}");
            std::process::exit(1);
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "starting pubsub-relay");

    if let Err(error) = server::run(config).await {
        error!(%error, "fatal server error");
        std::process::exit(1);
    }
}
