//! Peer identity and addressing.
//!
//! A [`PeerId`] is an opaque fixed-length identifier assigned by the identity
//! layer. The DHT never inspects its contents: routing position comes from
//! [`PeerId::kad_id`], the SHA-256 projection onto the XOR keyspace.
//!
//! A [`Multiaddr`] is an opaque address string (e.g. `/ip4/127.0.0.1/udp/4433`)
//! carried alongside peer IDs so dialers can reach a peer. The DHT only moves
//! these around; interpreting them is the transport layer's job.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::key::KadId;
use crate::TypesError;

/// Length of a raw peer identifier in bytes.
pub const PEER_ID_LEN: usize = 32;

/// An opaque fixed-length peer identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Construct from raw identifier bytes.
    pub fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Construct from a byte slice, validating the length.
    pub fn try_from_slice(bytes: &[u8]) -> crate::Result<Self> {
        let arr: [u8; PEER_ID_LEN] =
            bytes
                .try_into()
                .map_err(|_| TypesError::InvalidPeerId {
                    expected: PEER_ID_LEN,
                    got: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Generate a random peer ID (tests and random-walk targets).
    pub fn random() -> Self {
        let mut bytes = [0u8; PEER_ID_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    /// The raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    /// This peer's position in the XOR keyspace: SHA-256 of the raw id bytes.
    pub fn kad_id(&self) -> KadId {
        KadId::hash(&self.0)
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", hex::encode(&self.0[..8]))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// An opaque multiaddress.
///
/// Stored as its canonical string form. Equality and serialization are the
/// only operations the DHT relies on; [`Multiaddr::socket_addr`] is a
/// convenience for transports that dial IP endpoints.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Multiaddr(String);

impl Multiaddr {
    /// Parse a multiaddress from its string form.
    ///
    /// Validation is shallow: the string must be non-empty and begin with `/`.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() || !s.starts_with('/') {
            return Err(TypesError::InvalidMultiaddr(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Build a `/ip4/../udp/..` or `/ip6/../udp/..` multiaddress from a socket address.
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self(format!("/ip4/{}/udp/{}", v4.ip(), v4.port())),
            SocketAddr::V6(v6) => Self(format!("/ip6/{}/udp/{}", v6.ip(), v6.port())),
        }
    }

    /// Extract a socket address, if this multiaddress names an IP endpoint.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let mut parts = self.0.split('/').skip(1);
        let family = parts.next()?;
        let host = parts.next()?;
        let _proto = parts.next()?;
        let port: u16 = parts.next()?.parse().ok()?;
        match family {
            "ip4" => {
                let ip: std::net::Ipv4Addr = host.parse().ok()?;
                Some(SocketAddr::from((ip, port)))
            }
            "ip6" => {
                let ip: std::net::Ipv6Addr = host.parse().ok()?;
                Some(SocketAddr::from((ip, port)))
            }
            _ => None,
        }
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Multiaddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Multiaddr({})", self.0)
    }
}

impl std::fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peer identifier together with its known addresses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// The peer's identifier.
    pub id: PeerId,
    /// Known multiaddresses for this peer (possibly empty).
    pub addrs: Vec<Multiaddr>,
}

impl PeerInfo {
    /// A peer with no known addresses.
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            addrs: Vec::new(),
        }
    }

    /// A peer with the given addresses.
    pub fn with_addrs(id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { id, addrs }
    }

    /// Merge addresses from another record for the same peer, deduplicated.
    pub fn merge_addrs(&mut self, addrs: &[Multiaddr]) {
        for addr in addrs {
            if !self.addrs.contains(addr) {
                self.addrs.push(addr.clone());
            }
        }
    }
}
