//! TCP client for the echo exchange.
//!
//! A client opens one connection and, until the shutdown signal is set,
//! sends its id with the current timestamp, waits the configured delay,
//! and reads whatever reply arrived. There is no reconnection and no
//! request/reply correlation beyond the shared id.

use crate::codec::{self, Message, Received, RecvBuffer};
use crate::shutdown::ShutdownSignal;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Summary of a completed client run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientReport {
    /// Messages written to the server.
    pub sent: u64,
    /// Replies received and decoded.
    pub received: u64,
}

/// A connected client.
pub struct Client {
    id: String,
    stream: TcpStream,
    buffer: RecvBuffer,
    delay: Duration,
    shutdown: ShutdownSignal,
}

impl Client {
    /// Connect with a random identifier.
    pub fn connect(
        addr: SocketAddr,
        delay: Duration,
        buffer_size: usize,
        shutdown: ShutdownSignal,
    ) -> Result<Self, ClientError> {
        Self::connect_with_id(Uuid::new_v4().to_string(), addr, delay, buffer_size, shutdown)
    }

    /// Connect with a fixed identifier.
    pub fn connect_with_id(
        id: impl Into<String>,
        addr: SocketAddr,
        delay: Duration,
        buffer_size: usize,
        shutdown: ShutdownSignal,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).map_err(|e| ClientError::Connect(addr, e))?;
        let id = id.into();
        debug!(id = %id, server = %addr, "Client connected");

        Ok(Client {
            id,
            stream,
            buffer: RecvBuffer::new(buffer_size),
            delay,
            shutdown,
        })
    }

    #[cfg(test)]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Write one message as a single payload.
    pub fn send(&mut self, message: &Message) -> io::Result<()> {
        let payload = codec::encode(message)?;
        self.stream.write_all(&payload)
    }

    /// Perform one blocking read for a reply.
    pub fn receive(&mut self) -> Received {
        self.buffer.receive(&mut self.stream)
    }

    /// Exchange messages until the shutdown signal is set, then close.
    pub fn run(mut self) -> ClientReport {
        let mut report = ClientReport::default();

        while !self.shutdown.is_set() {
            let message = Message::new(self.id.as_str());
            match self.send(&message) {
                Ok(()) => report.sent += 1,
                Err(e) => debug!(id = %self.id, error = %e, "Send failed"),
            }

            // Returns early once shutdown is signalled.
            if self.shutdown.wait_timeout(self.delay) {
                break;
            }

            match self.receive() {
                Received::Message(reply) => {
                    report.received += 1;
                    info!(id = %reply.id, timestamp = reply.timestamp, "Client: received from server");
                }
                Received::Nothing(reason) => {
                    debug!(id = %self.id, %reason, "No reply");
                }
            }
        }

        self.close();
        debug!(id = %self.id, sent = report.sent, received = report.received, "Client stopped");
        report
    }

    fn close(&self) {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => {}
            // The server may have closed the connection first.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => debug!(id = %self.id, error = %e, "Socket shutdown failed"),
        }
    }
}

/// Client errors
#[derive(Debug)]
pub enum ClientError {
    /// The server could not be reached.
    Connect(SocketAddr, io::Error),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Connect(addr, e) => write!(f, "Failed to connect to {addr}: {e}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Connect(_, e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NoMessage;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    const DELAY: Duration = Duration::from_millis(50);

    #[test]
    fn test_connect_error() {
        // Bound but never listening: the port stays reserved for this test
        // and every connection attempt is refused.
        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )
        .unwrap();
        let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();
        socket.bind(&loopback.into()).unwrap();
        let addr = socket.local_addr().unwrap().as_socket().unwrap();

        match Client::connect(addr, DELAY, 1024, ShutdownSignal::new()) {
            Err(ClientError::Connect(failed, _)) => assert_eq!(failed, addr),
            Ok(_) => panic!("connected to a port with no listener"),
        }
        drop(socket);
    }

    #[test]
    fn test_random_ids_are_distinct() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let a = Client::connect(addr, DELAY, 1024, ShutdownSignal::new()).unwrap();
        let b = Client::connect(addr, DELAY, 1024, ShutdownSignal::new()).unwrap();
        assert_ne!(a.id(), b.id());
        assert!(Uuid::parse_str(a.id()).is_ok());
    }

    #[test]
    fn test_receive_reports_closed_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client =
            Client::connect_with_id("a", addr, DELAY, 1024, ShutdownSignal::new()).unwrap();

        let (peer, _) = listener.accept().unwrap();
        drop(peer);

        assert!(matches!(
            client.receive(),
            Received::Nothing(NoMessage::PeerClosed | NoMessage::Io(_))
        ));
    }

    #[test]
    fn test_run_sends_until_signal_and_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = ShutdownSignal::new();
        let client = Client::connect_with_id("a", addr, DELAY, 1024, shutdown.clone()).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        let runner = thread::spawn(move || client.run());

        // Reply to the first message.
        let mut buf = [0u8; 1024];
        let n = peer.read(&mut buf).unwrap();
        let mut message = codec::decode(&buf[..n]).unwrap();
        assert_eq!(message.id, "a");
        message.refresh();
        peer.write_all(&codec::encode(&message).unwrap()).unwrap();

        thread::sleep(DELAY * 2);
        let start = Instant::now();
        shutdown.set();

        // Unblock a client parked in receive.
        let _ = peer.write_all(&codec::encode(&message).unwrap());
        let report = runner.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(report.sent >= 1);
        assert!(report.received >= 1);

        // The client closed its end: reads end in EOF or reset, never a timeout.
        peer.set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut sink = Vec::new();
        if let Err(e) = peer.read_to_end(&mut sink) {
            assert!(!matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ));
        }
    }
}
