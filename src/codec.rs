//! Wire codec for timestamped messages.
//!
//! Each message is a single JSON object written in one `write` call:
//!
//! ```text
//! {"id":"3f0c...","timestamp":1700000000}
//! ```
//!
//! There is no length prefix or delimiter. Receivers read one fixed-size
//! buffer and assume it holds exactly one message, so a truncated or
//! coalesced read surfaces as a [`DecodeError`].

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io::{self, Read};

/// A message exchanged between a client and its handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Client-assigned identifier, stable for the connection's lifetime.
    pub id: String,
    /// Seconds since the Unix epoch, set by whichever side last sent it.
    pub timestamp: i64,
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: now(),
        }
    }

    /// Overwrite the timestamp with the current time.
    pub fn refresh(&mut self) {
        self.timestamp = now();
    }
}

/// Current time in whole seconds since the Unix epoch.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Errors produced while decoding a payload.
#[derive(Debug)]
pub enum DecodeError {
    /// The payload contained no bytes.
    Empty,
    /// The payload was not a valid message (malformed or truncated).
    Malformed(serde_json::Error),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Empty => write!(f, "empty payload"),
            DecodeError::Malformed(e) => write!(f, "malformed payload: {e}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Empty => None,
            DecodeError::Malformed(e) => Some(e),
        }
    }
}

/// Outcome of one receive step.
#[derive(Debug)]
pub enum Received {
    /// A complete message was decoded.
    Message(Message),
    /// No message this iteration.
    Nothing(NoMessage),
}

/// Why a receive step produced no message.
#[derive(Debug)]
pub enum NoMessage {
    /// The read returned zero bytes; the peer closed its side.
    PeerClosed,
    /// The read failed.
    Io(io::Error),
    /// The bytes read did not decode.
    Decode(DecodeError),
}

impl std::fmt::Display for NoMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoMessage::PeerClosed => write!(f, "peer closed the connection"),
            NoMessage::Io(e) => write!(f, "read failed: {e}"),
            NoMessage::Decode(e) => write!(f, "{e}"),
        }
    }
}

/// Fixed-size receive buffer.
///
/// One `read` fills at most `capacity` bytes, which are decoded as a
/// single message.
pub struct RecvBuffer {
    buf: BytesMut,
}

impl RecvBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::zeroed(capacity),
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Perform one blocking read and decode whatever arrived.
    pub fn receive(&mut self, reader: &mut impl Read) -> Received {
        match reader.read(&mut self.buf[..]) {
            Ok(0) => Received::Nothing(NoMessage::PeerClosed),
            Ok(n) => match decode(&self.buf[..n]) {
                Ok(message) => Received::Message(message),
                Err(e) => Received::Nothing(NoMessage::Decode(e)),
            },
            Err(e) => Received::Nothing(NoMessage::Io(e)),
        }
    }
}

/// Serialize a message into its wire payload.
pub fn encode(message: &Message) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(message).map(Bytes::from)
}

/// Deserialize a wire payload into a message.
pub fn decode(input: &[u8]) -> Result<Message, DecodeError> {
    if input.is_empty() {
        return Err(DecodeError::Empty);
    }
    serde_json::from_slice(input).map_err(DecodeError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let message = Message {
            id: "client-a".to_string(),
            timestamp: 1000,
        };
        assert_eq!(decode(&encode(&message).unwrap()).unwrap(), message);

        let message = Message {
            id: String::new(),
            timestamp: -1,
        };
        assert_eq!(decode(&encode(&message).unwrap()).unwrap(), message);
    }

    #[test]
    fn test_wire_format() {
        let message = Message {
            id: "a".to_string(),
            timestamp: 42,
        };
        assert_eq!(&encode(&message).unwrap()[..], br#"{"id":"a","timestamp":42}"#);
    }

    #[test]
    fn test_decode_ignores_extra_keys() {
        let message = decode(br#"{"timestamp":7,"id":"x","hops":3}"#).unwrap();
        assert_eq!(message.id, "x");
        assert_eq!(message.timestamp, 7);
    }

    #[test]
    fn test_decode_empty() {
        assert!(matches!(decode(b""), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_truncated() {
        let payload = encode(&Message::new("truncated")).unwrap();
        let cut = &payload[..payload.len() - 3];
        assert!(matches!(decode(cut), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode(b"not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(
            decode(br#"{"id":"a"}"#),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode(br#"{"id":1,"timestamp":2}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_coalesced_messages() {
        let mut payload = encode(&Message::new("a")).unwrap().to_vec();
        payload.extend_from_slice(&encode(&Message::new("a")).unwrap());
        assert!(matches!(decode(&payload), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_receive_message() {
        let payload = encode(&Message {
            id: "a".to_string(),
            timestamp: 5,
        })
        .unwrap();
        let mut buf = RecvBuffer::new(1024);
        match buf.receive(&mut &payload[..]) {
            Received::Message(message) => {
                assert_eq!(message.id, "a");
                assert_eq!(message.timestamp, 5);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_receive_empty_read() {
        let mut buf = RecvBuffer::new(1024);
        match buf.receive(&mut &b""[..]) {
            Received::Nothing(NoMessage::PeerClosed) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_receive_truncates_to_capacity() {
        let payload = encode(&Message::new("a-rather-long-client-identifier")).unwrap();
        let mut buf = RecvBuffer::new(8);
        assert_eq!(buf.capacity(), 8);
        match buf.receive(&mut &payload[..]) {
            Received::Nothing(NoMessage::Decode(DecodeError::Malformed(_))) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_refresh_moves_forward() {
        let mut message = Message {
            id: "a".to_string(),
            timestamp: 1000,
        };
        message.refresh();
        assert!(message.timestamp >= 1000);
        assert_eq!(message.id, "a");
    }
}
