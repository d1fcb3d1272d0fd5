//! The Switch seam: dialing peers and accepting inbound streams.
//!
//! The DHT talks to the connection layer exclusively through the [`Switch`]
//! trait. A switch knows how to dial a peer for a given protocol and hand
//! back a duplex framed stream, and how to surface inbound streams together
//! with the authenticated identity of the remote peer. [`crate::quic`]
//! provides the production implementation; tests supply in-memory ones.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use cairn_types::{PeerId, PeerInfo};

use crate::framing::{read_frame, write_frame};
use crate::TransportError;

/// One duplex stream to a remote peer.
///
/// Carries exactly the framing the DHT RPC layer needs: one length-prefixed
/// message in each direction per exchange.
pub struct Connection {
    /// The outgoing half.
    pub send: Box<dyn AsyncWrite + Send + Unpin>,
    /// The incoming half.
    pub recv: Box<dyn AsyncRead + Send + Unpin>,
}

impl Connection {
    /// Build a connection from a pair of stream halves.
    pub fn new(
        send: impl AsyncWrite + Send + Unpin + 'static,
        recv: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            send: Box::new(send),
            recv: Box::new(recv),
        }
    }

    /// Write one length-prefixed message.
    pub async fn write_message(&mut self, data: &[u8]) -> Result<(), TransportError> {
        write_frame(&mut self.send, data).await
    }

    /// Read one length-prefixed message.
    pub async fn read_message(&mut self) -> Result<Vec<u8>, TransportError> {
        read_frame(&mut self.recv).await
    }
}

/// An inbound stream surfaced by a switch.
pub struct Inbound {
    /// The authenticated identity of the peer that opened the stream.
    pub remote: PeerInfo,
    /// The stream itself.
    pub conn: Connection,
}

/// The connection layer, as the DHT sees it.
///
/// Implementations authenticate remote peers themselves; the `remote` on an
/// [`Inbound`] is trusted by the RPC handlers (notably ADD_PROVIDER's
/// anti-spoofing check compares against it).
pub trait Switch: Send + Sync + 'static {
    /// This node's own identity and addresses.
    fn local_peer(&self) -> PeerInfo;

    /// Dial `peer` for `protocol` and open one fresh duplex stream.
    fn dial(
        &self,
        peer: &PeerInfo,
        protocol: &str,
    ) -> impl Future<Output = Result<Connection, TransportError>> + Send;

    /// Wait for the next inbound stream.
    ///
    /// Returns `None` once the switch has shut down.
    fn accept(&self) -> impl Future<Output = Option<Inbound>> + Send;

    /// Identify the local peer by id alone.
    fn local_id(&self) -> PeerId {
        self.local_peer().id
    }
}
