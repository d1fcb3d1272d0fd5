//! # cairn-transport
//!
//! The wire layer of the Cairn DHT:
//!
//! - **RPC message codec** (CBOR-serialized) via [`message`]
//! - **Length-prefixed stream framing** via [`framing`]
//! - **The Switch seam** — dial/accept over duplex streams — via [`switch`]
//! - **QUIC/TLS 1.3 Switch implementation** via [`quic`]
//! - **CBOR serialization helpers** via [`cbor`]
//!
//! ## Architecture
//!
//! ```text
//! cairn-dht (Network / RPC handlers)
//!     |
//!     v
//! Message (message.rs)     -- CBOR RPC envelope: type, key, record, peers
//!     |
//!     v
//! framing (framing.rs)     -- [length:4 LE][data:length] frames
//!     |
//!     v
//! Switch (switch.rs)       -- dial(peer, protocol) -> duplex connection
//!     |
//!     v
//! QuicSwitch (quic.rs)     -- quinn endpoint, one bi-stream per RPC
//! ```

pub mod cbor;
pub mod framing;
pub mod message;
pub mod quic;
pub mod switch;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// CBOR serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// CBOR deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The wire carried a message type code outside the known set.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// A frame exceeded the maximum allowed size.
    #[error("frame too large: {size} bytes, max {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Dial failure: the peer could not be reached.
    #[error("dial failed: {0}")]
    Dial(String),

    /// TLS/certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection-level error after dialing succeeded.
    #[error("connection error: {0}")]
    Connection(String),

    /// I/O error (socket, stream read/write).
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
