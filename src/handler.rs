//! Server-side connection handler.
//!
//! One handler thread serves one accepted connection:
//! - Read: one payload into a fixed-size buffer
//! - Write: the same message with its timestamp refreshed
//!
//! The loop exits once the shutdown signal is observed. The handler never
//! closes its socket; the server's registry does that at shutdown, which
//! also terminates a read the handler may still be blocked in.

use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::codec::{self, NoMessage, Received, RecvBuffer};
use crate::shutdown::ShutdownSignal;

/// Pause after an empty or failed read before trying again.
///
/// A vanished peer makes every read return immediately; without a pause
/// the loop would spin until shutdown.
const IDLE_BACKOFF: Duration = Duration::from_millis(50);

/// Serve one connection until the shutdown signal is set.
///
/// Returns the number of replies sent.
pub fn handle_connection(
    conn_id: usize,
    mut stream: TcpStream,
    peer: SocketAddr,
    buffer_size: usize,
    shutdown: ShutdownSignal,
) -> u64 {
    let mut buffer = RecvBuffer::new(buffer_size);
    let mut replies = 0;

    debug!(conn_id, peer = %peer, "Handler started");

    while !shutdown.is_set() {
        let mut message = match buffer.receive(&mut stream) {
            Received::Message(message) => message,
            Received::Nothing(NoMessage::Decode(e)) => {
                debug!(conn_id, error = %e, "Dropping undecodable payload");
                continue;
            }
            Received::Nothing(reason) => {
                trace!(conn_id, %reason, "No message");
                shutdown.wait_timeout(IDLE_BACKOFF);
                continue;
            }
        };

        info!(id = %message.id, timestamp = message.timestamp, "Server: received from user");

        // Updates timestamp and sends the message back
        message.refresh();
        let payload = match codec::encode(&message) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(conn_id, error = %e, "Failed to encode reply");
                continue;
            }
        };
        match stream.write_all(&payload) {
            Ok(()) => replies += 1,
            Err(e) => debug!(conn_id, error = %e, "Reply failed"),
        }
    }

    debug!(conn_id, replies, "Handler stopped");
    replies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode, Message};
    use std::io::Read;
    use std::net::{Shutdown, TcpListener};
    use std::thread;

    fn spawn_handler(
        shutdown: &ShutdownSignal,
    ) -> (TcpStream, TcpStream, thread::JoinHandle<u64>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        let registry_handle = server.try_clone().unwrap();
        let signal = shutdown.clone();
        let handle = thread::spawn(move || handle_connection(0, server, peer, 1024, signal));
        (client, registry_handle, handle)
    }

    #[test]
    fn test_echo_refreshes_timestamp() {
        let shutdown = ShutdownSignal::new();
        let (mut client, registry_handle, handle) = spawn_handler(&shutdown);

        let sent = Message {
            id: "X".to_string(),
            timestamp: 1000,
        };
        client.write_all(&encode(&sent).unwrap()).unwrap();

        let mut buf = [0u8; 1024];
        let n = client.read(&mut buf).unwrap();
        let reply = decode(&buf[..n]).unwrap();
        assert_eq!(reply.id, "X");
        assert!(reply.timestamp >= 1000);

        shutdown.set();
        registry_handle.shutdown(Shutdown::Both).unwrap();
        assert_eq!(handle.join().unwrap(), 1);
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        let shutdown = ShutdownSignal::new();
        let (mut client, registry_handle, handle) = spawn_handler(&shutdown);

        client.write_all(b"garbage").unwrap();
        thread::sleep(Duration::from_millis(50));

        // The connection stays usable after a dropped payload.
        client.write_all(&encode(&Message::new("after")).unwrap()).unwrap();
        let mut buf = [0u8; 1024];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(decode(&buf[..n]).unwrap().id, "after");

        shutdown.set();
        registry_handle.shutdown(Shutdown::Both).unwrap();
        assert_eq!(handle.join().unwrap(), 1);
    }

    #[test]
    fn test_peer_gone_does_not_close_socket() {
        let shutdown = ShutdownSignal::new();
        let (client, registry_handle, handle) = spawn_handler(&shutdown);

        drop(client);
        thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished());

        shutdown.set();
        assert_eq!(handle.join().unwrap(), 0);
        // Closing remains the registry's job.
        let _ = registry_handle.shutdown(Shutdown::Both);
    }
}
