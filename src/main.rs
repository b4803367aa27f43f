//! Setu - telemetry relay and classification daemon
//!
//! One binary for every hop of the pipeline. The configuration decides the
//! role:
//!
//! - **Relay**: `mode = "forward"`, device-facing ingress, TLS or broker egress
//! - **Compute**: `mode = "classify"`, results back on the same link or the result topic
//!
//! Usage:
//!   setu /etc/setu.toml
//!   setu --config relay.toml --log-level debug
//!   setu --bind 127.0.0.1:5000        # defaults, overriding the listen address

use clap::Parser;
use setu::RelayBridge;
use setu::config::Config;
use setu::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Used when no path is given and the file exists
const DEFAULT_CONFIG_PATH: &str = "/etc/setu.toml";

/// Sensor telemetry relay and classification bridge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (positional form)
    #[arg(value_name = "CONFIG")]
    config_path: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, conflicts_with = "config_path")]
    config: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override inbound.bind_address
    #[arg(short, long)]
    bind: Option<String>,
}

fn load_config(args: &Args) -> Result<Config> {
    match args.config.as_ref().or(args.config_path.as_ref()) {
        Some(path) => Config::load(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load(DEFAULT_CONFIG_PATH),
        None => Ok(Config::default()),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Config may fail before logging is up; report it on stderr
    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("setu: {}", e);
            std::process::exit(2);
        }
    };
    if let Some(bind) = &args.bind {
        config.inbound.bind_address = bind.clone();
    }

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    log::info!("Setu v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!(
        "Mode: {:?}, inbound: {:?} on {} ({:?})",
        config.bridge.mode,
        config.inbound.kind,
        config.inbound.bind_address,
        config.inbound.codec
    );

    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let bridge = RelayBridge::start(&config, running)?;
    log::info!("Setu running. Press Ctrl-C to stop.");

    let interval = match config.bridge.stats_interval_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    bridge.wait(interval);
    bridge.shutdown();

    log::info!("Setu stopped");
    Ok(())
}
