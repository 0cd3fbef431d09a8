//! stamp-echo: threaded TCP clients and server exchanging timestamped echoes
//!
//! A server accepts one connection per client and echoes every message
//! back with a refreshed timestamp. After the configured work time a
//! shared shutdown signal stops every client and handler, and the server
//! closes all connections it accepted.
//!
//! Features:
//! - One handler thread per accepted connection
//! - One thread per client, sending on a fixed delay
//! - Cooperative shutdown via a shared signal (also set on Ctrl-C)
//! - Configuration via CLI arguments or TOML file

mod client;
mod codec;
mod config;
mod connection;
mod handler;
mod runner;
mod server;
mod shutdown;

use config::Config;
use shutdown::ShutdownSignal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        clients = config.clients,
        work_time = ?config.work_time,
        delay = ?config.delay,
        buffer_size = config.buffer_size,
        "Starting stamp-echo"
    );

    let shutdown = ShutdownSignal::new();
    let interrupt = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Interrupt received, shutting down");
        interrupt.set();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    runner::run(&config, shutdown)?;
    Ok(())
}
