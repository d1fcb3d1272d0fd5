//! The DHT RPC client.
//!
//! One request, one response, one fresh stream. [`Network::send_request`]
//! dials the peer through the Switch, writes a single length-prefixed
//! message, and reads exactly one reply under the read timeout. Connection
//! reuse, if any, is the Switch's business.

use std::sync::Arc;
use std::time::Duration;

use cairn_transport::message::{Message, MessageType, PROTOCOL_ID};
use cairn_transport::switch::Switch;
use cairn_types::PeerInfo;

use crate::{DhtError, Result};

/// RPC client over a Switch.
pub struct Network<S: Switch> {
    switch: Arc<S>,
    read_timeout: Duration,
}

impl<S: Switch> Network<S> {
    /// Create a client with the given per-request read timeout.
    pub fn new(switch: Arc<S>, read_timeout: Duration) -> Self {
        Self {
            switch,
            read_timeout,
        }
    }

    /// The Switch this client dials through.
    pub fn switch(&self) -> &Arc<S> {
        &self.switch
    }

    /// Send `msg` to `peer` and await exactly one correlated response.
    ///
    /// # Errors
    ///
    /// - [`DhtError::Dial`] when the peer cannot be reached (not retried).
    /// - [`DhtError::Timeout`] when no response arrives within the read
    ///   timeout; the read is abandoned.
    /// - [`DhtError::Decode`] when the response bytes are malformed.
    pub async fn send_request(&self, peer: &PeerInfo, msg: &Message) -> Result<Message> {
        let mut conn = self
            .switch
            .dial(peer, PROTOCOL_ID)
            .await
            .map_err(|e| DhtError::Dial {
                peer: peer.id.to_string(),
                reason: e.to_string(),
            })?;

        conn.write_message(&msg.to_bytes()?).await?;

        let bytes = tokio::time::timeout(self.read_timeout, conn.read_message())
            .await
            .map_err(|_| {
                tracing::debug!(peer = %peer.id, "request timed out");
                DhtError::Timeout
            })??;

        Message::from_bytes(&bytes).map_err(|e| DhtError::Decode(e.to_string()))
    }

    /// Send `msg` to `peer` without awaiting a reply.
    ///
    /// Used for PUT_VALUE replication and ADD_PROVIDER advertisement, where
    /// the response carries no information the sender needs.
    pub async fn send_message(&self, peer: &PeerInfo, msg: &Message) -> Result<()> {
        let mut conn = self
            .switch
            .dial(peer, PROTOCOL_ID)
            .await
            .map_err(|e| DhtError::Dial {
                peer: peer.id.to_string(),
                reason: e.to_string(),
            })?;
        conn.write_message(&msg.to_bytes()?).await?;
        Ok(())
    }

    /// Liveness check: PING the peer and report whether it echoed in time.
    pub async fn ping(&self, peer: &PeerInfo, timeout: Duration) -> bool {
        let msg = Message::new(MessageType::Ping, Vec::new());
        let request = self.send_request(peer, &msg);
        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(reply)) => reply.msg_type == MessageType::Ping,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_transport::switch::{Connection, Inbound};
    use cairn_transport::TransportError;
    use cairn_types::PeerId;
    use std::time::Instant;

    /// Switch whose dialed peers echo one frame back verbatim.
    struct EchoSwitch {
        local: PeerInfo,
    }

    impl Switch for EchoSwitch {
        fn local_peer(&self) -> PeerInfo {
            self.local.clone()
        }

        async fn dial(
            &self,
            _peer: &PeerInfo,
            _protocol: &str,
        ) -> std::result::Result<Connection, TransportError> {
            let (client, server) = tokio::io::duplex(65536);
            let (client_r, client_w) = tokio::io::split(client);
            let (server_r, server_w) = tokio::io::split(server);
            tokio::spawn(async move {
                let mut conn = Connection::new(server_w, server_r);
                if let Ok(frame) = conn.read_message().await {
                    let _ = conn.write_message(&frame).await;
                }
            });
            Ok(Connection::new(client_w, client_r))
        }

        async fn accept(&self) -> Option<Inbound> {
            None
        }
    }

    /// Switch whose dialed peers accept the request but never respond.
    struct SilentSwitch {
        local: PeerInfo,
    }

    impl Switch for SilentSwitch {
        fn local_peer(&self) -> PeerInfo {
            self.local.clone()
        }

        async fn dial(
            &self,
            _peer: &PeerInfo,
            _protocol: &str,
        ) -> std::result::Result<Connection, TransportError> {
            let (client, server) = tokio::io::duplex(65536);
            let (client_r, client_w) = tokio::io::split(client);
            tokio::spawn(async move {
                // Hold the far end open without ever writing.
                let mut conn = {
                    let (server_r, server_w) = tokio::io::split(server);
                    Connection::new(server_w, server_r)
                };
                let _ = conn.read_message().await;
                tokio::time::sleep(Duration::from_secs(3600)).await;
            });
            Ok(Connection::new(client_w, client_r))
        }

        async fn accept(&self) -> Option<Inbound> {
            None
        }
    }

    /// Switch that refuses every dial.
    struct UnreachableSwitch {
        local: PeerInfo,
    }

    impl Switch for UnreachableSwitch {
        fn local_peer(&self) -> PeerInfo {
            self.local.clone()
        }

        async fn dial(
            &self,
            peer: &PeerInfo,
            _protocol: &str,
        ) -> std::result::Result<Connection, TransportError> {
            Err(TransportError::Dial(format!("no route to {}", peer.id)))
        }

        async fn accept(&self) -> Option<Inbound> {
            None
        }
    }

    fn local() -> PeerInfo {
        PeerInfo::new(PeerId::random())
    }

    fn target() -> PeerInfo {
        PeerInfo::new(PeerId::random())
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let network = Network::new(
            Arc::new(EchoSwitch { local: local() }),
            Duration::from_secs(1),
        );
        let msg = Message::new(MessageType::FindNode, b"some-key".to_vec());
        let reply = network.send_request(&target(), &msg).await.expect("reply");
        assert_eq!(reply, msg);
    }

    #[tokio::test]
    async fn test_unresponsive_peer_times_out() {
        let network = Network::new(
            Arc::new(SilentSwitch { local: local() }),
            Duration::from_millis(50),
        );
        let msg = Message::new(MessageType::Ping, Vec::new());

        let started = Instant::now();
        let result = network.send_request(&target(), &msg).await;
        let elapsed = started.elapsed();

        let err = result.expect_err("should time out");
        assert!(err.to_string().contains("timed out"), "got: {err}");
        assert!(
            elapsed < Duration::from_millis(500),
            "timeout fired too late: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_dial_failure_is_dial_error() {
        let network = Network::new(
            Arc::new(UnreachableSwitch { local: local() }),
            Duration::from_millis(50),
        );
        let msg = Message::new(MessageType::Ping, Vec::new());
        let result = network.send_request(&target(), &msg).await;
        assert!(matches!(result, Err(DhtError::Dial { .. })));
    }

    #[tokio::test]
    async fn test_ping_success_and_failure() {
        let echo = Network::new(
            Arc::new(EchoSwitch { local: local() }),
            Duration::from_secs(1),
        );
        assert!(echo.ping(&target(), Duration::from_secs(1)).await);

        let silent = Network::new(
            Arc::new(SilentSwitch { local: local() }),
            Duration::from_secs(1),
        );
        assert!(!silent.ping(&target(), Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_send_message_fire_and_forget() {
        let network = Network::new(
            Arc::new(SilentSwitch { local: local() }),
            Duration::from_millis(50),
        );
        let msg = Message::new(MessageType::AddProvider, b"cid".to_vec());
        // No reply expected; the call completes once the write lands.
        network.send_message(&target(), &msg).await.expect("send");
    }
}
