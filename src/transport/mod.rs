//! Frame transports
//!
//! Two framing disciplines move the same payload bytes:
//!
//! - **Length-prefixed stream framing** ([`framing`]) on TCP, optionally
//!   inside TLS ([`link`], [`tcp`]), plus the newline-delimited variant
//!   used by the encrypted device hop ([`lines`])
//! - **Topic-addressed framing** ([`pubsub`]) on an MQTT broker
//!
//! Datagrams ([`udp`]) need no framing: one datagram is one payload.

pub mod framing;
pub mod lines;
pub mod link;
pub mod pubsub;
pub mod tcp;
pub mod udp;

pub use framing::{FrameReader, write_frame};
pub use link::StreamLink;
pub use pubsub::{PubSubMessage, PubSubSession, TopicRole, Topics};
pub use tcp::TcpFrameTransport;
pub use udp::UdpTransport;

use crate::error::TransportError;

/// Blocking, whole-message transport
///
/// `receive` never returns a partial payload. On links opened by the
/// bridge, an expired deadline is reported as an error rather than
/// blocking forever.
pub trait FrameTransport: Send {
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;
    fn receive(&mut self) -> Result<Vec<u8>, TransportError>;
}
