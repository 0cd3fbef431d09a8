//! Orchestration of one run: server, clients, work period, shutdown.

use crate::client::{Client, ClientReport};
use crate::config::{Config, ConfigError};
use crate::server::{Server, ServerError, ServerReport};
use crate::shutdown::ShutdownSignal;
use std::io;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub server: Option<ServerReport>,
    pub clients: Vec<ClientReport>,
    /// Clients that failed to connect.
    pub failed_clients: usize,
}

/// Run the server and clients until the work time elapses or `shutdown`
/// is set from outside.
pub fn run(config: &Config, shutdown: ShutdownSignal) -> Result<RunReport, RunError> {
    let addr = config.listen_addr()?;
    let server = Server::bind(
        addr,
        config.max_connections(),
        config.buffer_size,
        shutdown.clone(),
    )?;
    let server_addr = server.local_addr();

    let server_handle = thread::Builder::new()
        .name("server".to_string())
        .spawn(move || server.run())
        .map_err(RunError::Spawn)?;

    let mut report = RunReport::default();
    let mut client_handles: Vec<JoinHandle<ClientReport>> = Vec::with_capacity(config.clients);

    for client_id in 0..config.clients {
        let client = match Client::connect(
            server_addr,
            config.delay,
            config.buffer_size,
            shutdown.clone(),
        ) {
            Ok(client) => client,
            Err(e) => {
                warn!(client = client_id, error = %e, "Client failed to connect");
                report.failed_clients += 1;
                continue;
            }
        };

        let handle = thread::Builder::new()
            .name(format!("client-{client_id}"))
            .spawn(move || client.run());
        match handle {
            Ok(handle) => client_handles.push(handle),
            Err(e) => {
                // Nothing else will stop the server once it is running.
                shutdown.set();
                return Err(RunError::Spawn(e));
            }
        }
    }

    if report.failed_clients > 0 {
        warn!(
            missing = report.failed_clients,
            "Server will not leave its accept phase until every expected client connects"
        );
    }

    info!(seconds = config.work_time.as_secs_f64(), "Working");
    if shutdown.wait_timeout(config.work_time) {
        info!("Shutdown requested before work time elapsed");
    }
    shutdown.set();

    // Waits until the server closes all connections and exits
    report.server = match server_handle.join() {
        Ok(Ok(server_report)) => {
            info!(
                accepted = server_report.accepted,
                closed = server_report.closed,
                replies = server_report.replies,
                "Server stopped"
            );
            Some(server_report)
        }
        Ok(Err(e)) => {
            error!(error = %e, "Server failed");
            None
        }
        Err(_) => {
            error!("Server thread panicked");
            None
        }
    };

    for handle in client_handles {
        match handle.join() {
            Ok(client_report) => report.clients.push(client_report),
            Err(_) => error!("Client thread panicked"),
        }
    }

    info!(
        clients = report.clients.len(),
        sent = report.clients.iter().map(|c| c.sent).sum::<u64>(),
        received = report.clients.iter().map(|c| c.received).sum::<u64>(),
        "Run complete"
    );

    Ok(report)
}

/// Errors that abort a run before it starts working.
#[derive(Debug)]
pub enum RunError {
    Config(ConfigError),
    Server(ServerError),
    Spawn(io::Error),
}

impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self {
        RunError::Config(e)
    }
}

impl From<ServerError> for RunError {
    fn from(e: ServerError) -> Self {
        RunError::Server(e)
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Config(e) => write!(f, "{e}"),
            RunError::Server(e) => write!(f, "{e}"),
            RunError::Spawn(e) => write!(f, "Failed to spawn thread: {e}"),
        }
    }
}

impl std::error::Error for RunError {}
