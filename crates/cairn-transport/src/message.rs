//! The DHT RPC message.
//!
//! One tagged envelope covers all RPC exchanges. The message type registry
//! is closed: codes 0 through 5 are in use, 6 and 7 are reserved, and any
//! other code on the wire fails decoding.
//!
//! ## Wire format
//!
//! ```text
//! Message {
//!     msg_type:          u8,              // registry code, validated on decode
//!     key:               Vec<u8>,         // raw byte key (often a CID encoding)
//!     record:            Option<Record>,  // PUT_VALUE / GET_VALUE payload
//!     closer_peers:      Vec<PeerInfo>,   // (id, multiaddrs) pairs
//!     provider_peers:    Vec<PeerInfo>,   // (id, multiaddrs) pairs
//!     cluster_level_raw: i32,             // legacy field, carried verbatim
//! }
//! ```

use serde::{Deserialize, Serialize};

use cairn_types::{PeerInfo, Record};

use crate::{cbor, TransportError};

/// Protocol identifier negotiated with the Switch for DHT streams.
pub const PROTOCOL_ID: &str = "/cairn/kad/1.0.0";

/// Message type registry.
///
/// The two codes after [`MessageType::Ping`] (6 and 7) are reserved and never
/// produced; decoding them fails like any other unknown code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Store a record on the receiver.
    PutValue = 0,
    /// Fetch a record, or peers closer to its key.
    GetValue = 1,
    /// Advertise the sender as a provider for a content key.
    AddProvider = 2,
    /// Fetch providers for a content key, plus closer peers.
    GetProviders = 3,
    /// Fetch the peers closest to a key.
    FindNode = 4,
    /// Liveness check; echoed unchanged.
    Ping = 5,
}

impl MessageType {
    /// The wire code for this message type.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Parse a wire code, rejecting reserved and unknown codes.
    pub fn from_code(code: u8) -> Result<Self, TransportError> {
        match code {
            0 => Ok(MessageType::PutValue),
            1 => Ok(MessageType::GetValue),
            2 => Ok(MessageType::AddProvider),
            3 => Ok(MessageType::GetProviders),
            4 => Ok(MessageType::FindNode),
            5 => Ok(MessageType::Ping),
            other => Err(TransportError::UnknownMessageType(other)),
        }
    }
}

/// A single DHT RPC message, either a request or a response.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// What this message asks for or answers.
    pub msg_type: MessageType,
    /// The byte key the request concerns (empty for PING).
    pub key: Vec<u8>,
    /// Record payload for PUT_VALUE requests and GET_VALUE responses.
    pub record: Option<Record>,
    /// Peers closer to `key` than the responder.
    pub closer_peers: Vec<PeerInfo>,
    /// Peers advertising content under `key`.
    pub provider_peers: Vec<PeerInfo>,
    /// Legacy cluster level; carried verbatim, never interpreted.
    pub cluster_level_raw: i32,
}

impl Message {
    /// A bare message of the given type and key.
    pub fn new(msg_type: MessageType, key: Vec<u8>) -> Self {
        Self {
            msg_type,
            key,
            record: None,
            closer_peers: Vec::new(),
            provider_peers: Vec::new(),
            cluster_level_raw: 0,
        }
    }

    /// Attach a record payload.
    pub fn with_record(mut self, record: Record) -> Self {
        self.record = Some(record);
        self
    }

    /// Attach closer peers.
    pub fn with_closer_peers(mut self, peers: Vec<PeerInfo>) -> Self {
        self.closer_peers = peers;
        self
    }

    /// Attach provider peers.
    pub fn with_provider_peers(mut self, peers: Vec<PeerInfo>) -> Self {
        self.provider_peers = peers;
        self
    }

    /// Serialize to CBOR bytes for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        let wire = WireMessage {
            msg_type: self.msg_type.code(),
            key: self.key.clone(),
            record: self.record.clone(),
            closer_peers: self.closer_peers.clone(),
            provider_peers: self.provider_peers.clone(),
            cluster_level_raw: self.cluster_level_raw,
        };
        cbor::to_vec(&wire)
    }

    /// Deserialize from CBOR bytes received from the wire.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Deserialization`] on malformed CBOR and
    /// [`TransportError::UnknownMessageType`] on a reserved or unknown type
    /// code.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TransportError> {
        let wire: WireMessage = cbor::from_slice(data)?;
        let msg_type = MessageType::from_code(wire.msg_type)?;
        Ok(Self {
            msg_type,
            key: wire.key,
            record: wire.record,
            closer_peers: wire.closer_peers,
            provider_peers: wire.provider_peers,
            cluster_level_raw: wire.cluster_level_raw,
        })
    }
}

/// The serde-facing shape of a [`Message`].
///
/// Kept separate so the type code can be validated on decode instead of
/// trusting a derived enum representation.
#[derive(Serialize, Deserialize)]
struct WireMessage {
    msg_type: u8,
    key: Vec<u8>,
    record: Option<Record>,
    closer_peers: Vec<PeerInfo>,
    provider_peers: Vec<PeerInfo>,
    cluster_level_raw: i32,
}
