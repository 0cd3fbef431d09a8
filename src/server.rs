//! TCP server for the echo exchange.
//!
//! Accepts exactly `max_connections` connections, spawns one handler
//! thread per connection, then waits for the shutdown signal and closes
//! every registered connection.
//!
//! The accept phase is bounded by count, not by the shutdown signal: if
//! fewer than `max_connections` clients ever connect, [`Server::run`]
//! stays blocked in `accept`.

use crate::connection::{Connection, ConnectionRegistry};
use crate::handler::handle_connection;
use crate::shutdown::ShutdownSignal;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::thread;
use tracing::{debug, info, warn};

/// Lifecycle of a bound server. Transitions only move forward.
///
/// A `Server` value exists only once its listener is open, so the first
/// observable state is `Binding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Binding,
    Accepting { count: usize },
    WaitingForShutdown,
    Closing,
    Closed,
}

/// Summary of a completed server run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerReport {
    /// Connections accepted during the accept phase.
    pub accepted: usize,
    /// Connections closed during shutdown.
    pub closed: usize,
    /// Replies sent by all handlers.
    pub replies: u64,
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_connections: usize,
    buffer_size: usize,
    shutdown: ShutdownSignal,
    registry: ConnectionRegistry,
    state: ServerState,
}

impl Server {
    /// Open the listening socket.
    pub fn bind(
        addr: SocketAddr,
        max_connections: usize,
        buffer_size: usize,
        shutdown: ShutdownSignal,
    ) -> Result<Self, ServerError> {
        debug!(state = ?ServerState::Binding, address = %addr, "Binding");

        let listener =
            create_listener(addr, max_connections).map_err(|e| ServerError::Bind(addr, e))?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind(addr, e))?;

        Ok(Server {
            listener,
            local_addr,
            max_connections,
            buffer_size,
            shutdown,
            registry: ConnectionRegistry::new(max_connections),
            state: ServerState::Binding,
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle state.
    #[cfg(test)]
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Accept connections, wait for shutdown, then close every connection.
    pub fn run(mut self) -> Result<ServerReport, ServerError> {
        info!(
            address = %self.local_addr,
            max_connections = self.max_connections,
            "Server: starting connections"
        );

        if let Err(e) = self.accept_all() {
            self.registry.close_all();
            return Err(e);
        }
        let accepted = self.registry.len();

        self.transition(ServerState::WaitingForShutdown);
        self.shutdown.wait();

        self.transition(ServerState::Closing);
        info!(connections = accepted, "Server: closing connections");
        let closed = self.registry.close_all();
        let replies = self.registry.join_handlers();

        self.transition(ServerState::Closed);
        Ok(ServerReport {
            accepted,
            closed,
            replies,
        })
    }

    /// Accept until the registry holds `max_connections` connections.
    fn accept_all(&mut self) -> Result<(), ServerError> {
        self.transition(ServerState::Accepting { count: 0 });

        while !self.registry.is_full() {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            let registry_handle = match stream.try_clone() {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Failed to register connection");
                    continue;
                }
            };

            let Some(conn_id) = self.registry.insert(Connection::new(registry_handle, peer))
            else {
                break;
            };

            let shutdown = self.shutdown.clone();
            let buffer_size = self.buffer_size;
            let handle = thread::Builder::new()
                .name(format!("handler-{conn_id}"))
                .spawn(move || handle_connection(conn_id, stream, peer, buffer_size, shutdown))
                .map_err(ServerError::Spawn)?;

            if let Some(conn) = self.registry.get_mut(conn_id) {
                conn.attach_handler(handle);
            }

            debug!(conn_id, peer = %peer, "New connection");
            self.transition(ServerState::Accepting {
                count: self.registry.len(),
            });
        }

        Ok(())
    }

    fn transition(&mut self, next: ServerState) {
        debug!(from = ?self.state, to = ?next, "Server state");
        self.state = next;
    }
}

/// Create a TCP listener whose backlog matches the expected client count.
fn create_listener(addr: SocketAddr, backlog: usize) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    Ok(socket.into())
}

/// Server errors
#[derive(Debug)]
pub enum ServerError {
    /// The listening socket could not be created.
    Bind(SocketAddr, io::Error),
    /// A handler thread could not be started.
    Spawn(io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind(addr, e) => write!(f, "Failed to bind {addr}: {e}"),
            ServerError::Spawn(e) => write!(f, "Failed to spawn handler thread: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind(_, e) | ServerError::Spawn(e) => Some(e),
        }
    }
}
