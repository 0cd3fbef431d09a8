//! Registry of accepted connections owned by the server.
//!
//! Each entry keeps a cloned handle of the accepted stream so the server
//! can close the socket at shutdown while the handler thread still holds
//! its own handle and may be blocked in `read`.

use slab::Slab;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Current state of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted and served by a running handler.
    Open,
    /// Closed by the server's shutdown pass.
    Closed,
}

/// A single accepted connection.
#[derive(Debug)]
pub struct Connection {
    /// Server-side handle to the socket.
    stream: TcpStream,
    /// Remote address of the client.
    pub peer: SocketAddr,
    /// Current connection state.
    pub state: ConnState,
    /// Handler thread serving this connection.
    handler: Option<JoinHandle<u64>>,
}

impl Connection {
    /// Create a new open connection.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            state: ConnState::Open,
            handler: None,
        }
    }

    /// Attach the handler thread serving this connection.
    pub fn attach_handler(&mut self, handle: JoinHandle<u64>) {
        self.handler = Some(handle);
    }

    /// Close the socket, terminating any blocking read on other handles.
    ///
    /// Returns `false` if the connection was already closed.
    pub fn close(&mut self) -> bool {
        if self.state == ConnState::Closed {
            return false;
        }
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => {}
            // The peer may have gone away first.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => debug!(peer = %self.peer, error = %e, "Socket shutdown failed"),
        }
        self.state = ConnState::Closed;
        true
    }

    /// Take the handler thread handle, if any.
    pub fn take_handler(&mut self) -> Option<JoinHandle<u64>> {
        self.handler.take()
    }
}

/// Append-only registry of accepted connections using slab allocation.
///
/// Keys are handed out in insertion order since entries are never removed.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    /// Get an immutable reference to a connection.
    #[cfg(test)]
    pub fn get(&self, id: usize) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Check if the registry has reached its capacity.
    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Close every open connection in insertion order.
    ///
    /// Returns the number of connections closed by this call.
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for (id, conn) in self.connections.iter_mut() {
            if conn.close() {
                debug!(conn_id = id, peer = %conn.peer, "Connection closed");
                closed += 1;
            }
        }
        closed
    }

    /// Join every handler thread, returning the total replies they sent.
    pub fn join_handlers(&mut self) -> u64 {
        let mut replies = 0;
        for (id, conn) in self.connections.iter_mut() {
            if let Some(handle) = conn.take_handler() {
                match handle.join() {
                    Ok(sent) => replies += sent,
                    Err(_) => warn!(conn_id = id, "Handler thread panicked"),
                }
            }
        }
        replies
    }

    /// Iterate over all connections.
    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.connections.iter()
    }
}
