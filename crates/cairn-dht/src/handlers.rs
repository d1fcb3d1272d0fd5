//! Server-side RPC dispatch.
//!
//! Each inbound stream carries exactly one request. [`RpcHandler::serve_stream`]
//! decodes it, dispatches by message type, and writes exactly one reply on
//! the same stream. Structural errors (missing key, bad cid, empty record,
//! unknown type) fail only that stream; they never touch routing state.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cairn_db::Datastore;
use cairn_transport::cbor;
use cairn_transport::message::{Message, MessageType};
use cairn_transport::switch::{Inbound, Switch};
use cairn_types::{Cid, KadId, PeerInfo, Record};

use crate::network::Network;
use crate::providers::ProviderStore;
use crate::routing::RoutingTable;
use crate::validators::ValidatorRegistry;
use crate::{block_key, now_millis, record_key, DhtError, Result};

/// Server side of the DHT protocol.
pub struct RpcHandler<S: Switch> {
    local: PeerInfo,
    k: usize,
    read_timeout: Duration,
    ping_timeout: Duration,
    routing: Arc<Mutex<RoutingTable>>,
    providers: Arc<ProviderStore>,
    datastore: Arc<dyn Datastore>,
    validators: Arc<ValidatorRegistry>,
    network: Arc<Network<S>>,
}

impl<S: Switch> RpcHandler<S> {
    /// Wire a handler over the DHT's shared state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local: PeerInfo,
        k: usize,
        read_timeout: Duration,
        ping_timeout: Duration,
        routing: Arc<Mutex<RoutingTable>>,
        providers: Arc<ProviderStore>,
        datastore: Arc<dyn Datastore>,
        validators: Arc<ValidatorRegistry>,
        network: Arc<Network<S>>,
    ) -> Self {
        Self {
            local,
            k,
            read_timeout,
            ping_timeout,
            routing,
            providers,
            datastore,
            validators,
            network,
        }
    }

    /// Serve one inbound stream: read a request, dispatch, reply.
    ///
    /// Failures close the stream without a reply and are logged; they are
    /// local to this one request.
    pub async fn serve_stream(&self, mut inbound: Inbound) {
        let from = inbound.remote.clone();

        let bytes = match tokio::time::timeout(self.read_timeout, inbound.conn.read_message())
            .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                tracing::debug!(peer = %from.id, error = %e, "inbound read failed");
                return;
            }
            Err(_) => {
                tracing::debug!(peer = %from.id, "inbound read timed out");
                return;
            }
        };

        let msg = match Message::from_bytes(&bytes) {
            Ok(msg) => msg,
            Err(e) => {
                let err = match e {
                    cairn_transport::TransportError::UnknownMessageType(code) => {
                        DhtError::UnknownMessageType(code)
                    }
                    other => DhtError::Decode(other.to_string()),
                };
                tracing::debug!(peer = %from.id, error = %err, "inbound decode failed");
                return;
            }
        };

        // A well-formed request proves the sender is alive.
        self.note_sender(&from);

        let reply = match self.handle(&from, msg) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(peer = %from.id, error = %e, "request rejected");
                return;
            }
        };

        match reply.to_bytes() {
            Ok(bytes) => {
                if let Err(e) = inbound.conn.write_message(&bytes).await {
                    tracing::debug!(peer = %from.id, error = %e, "reply write failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "reply serialization failed"),
        }
    }

    /// Dispatch one decoded request to its handler.
    pub fn handle(&self, from: &PeerInfo, msg: Message) -> Result<Message> {
        match msg.msg_type {
            MessageType::Ping => Ok(msg),
            MessageType::FindNode => self.handle_find_node(from, msg),
            MessageType::GetValue => self.handle_get_value(from, msg),
            MessageType::PutValue => self.handle_put_value(msg),
            MessageType::AddProvider => self.handle_add_provider(from, msg),
            MessageType::GetProviders => self.handle_get_providers(from, msg),
        }
    }

    fn handle_find_node(&self, from: &PeerInfo, msg: Message) -> Result<Message> {
        let closer = self.closer_peers(&msg.key, from);
        Ok(Message::new(MessageType::FindNode, msg.key).with_closer_peers(closer))
    }

    fn handle_get_value(&self, from: &PeerInfo, msg: Message) -> Result<Message> {
        if msg.key.is_empty() {
            return Err(DhtError::MissingKey);
        }

        let mut reply = Message::new(MessageType::GetValue, msg.key.clone())
            .with_closer_peers(self.closer_peers(&msg.key, from));

        if let Some(bytes) = self.datastore.get(&record_key(&msg.key))? {
            match cbor::from_slice::<Record>(&bytes) {
                Ok(record) => match self.validators.validate(&msg.key, &record) {
                    Ok(()) => reply.record = Some(record),
                    Err(e) => {
                        // Stale or corrupt local record: answered as absent.
                        tracing::debug!(error = %e, "stored record failed validation");
                    }
                },
                Err(e) => tracing::warn!(error = %e, "stored record failed to decode"),
            }
        }

        Ok(reply)
    }

    fn handle_put_value(&self, msg: Message) -> Result<Message> {
        let record = msg.record.as_ref().ok_or(DhtError::EmptyRecord)?;

        self.validators.validate(&msg.key, record)?;

        let mut stored = record.clone();
        stored.stamp_received(now_millis());
        self.datastore
            .put(&record_key(&msg.key), &cbor::to_vec(&stored)?)?;

        tracing::debug!(key = %String::from_utf8_lossy(&msg.key), "record stored");
        Ok(msg)
    }

    fn handle_add_provider(&self, from: &PeerInfo, msg: Message) -> Result<Message> {
        if msg.key.is_empty() {
            return Err(DhtError::MissingKey);
        }
        let cid = Cid::from_bytes(&msg.key).map_err(|e| DhtError::InvalidCid(e.to_string()))?;

        for provider in &msg.provider_peers {
            if provider.id != from.id {
                // Peers may only advertise themselves.
                tracing::debug!(
                    claimed = %provider.id,
                    sender = %from.id,
                    "ignoring spoofed provider entry"
                );
                continue;
            }

            self.providers.add_provider(&cid, provider.id)?;

            // Remember how to reach the provider: payload addresses win,
            // the sender's own addresses are the fallback.
            let info = if provider.addrs.is_empty() {
                PeerInfo::with_addrs(provider.id, from.addrs.clone())
            } else {
                provider.clone()
            };
            self.note_sender(&info);
        }

        Ok(msg)
    }

    fn handle_get_providers(&self, from: &PeerInfo, msg: Message) -> Result<Message> {
        let cid = Cid::from_bytes(&msg.key).map_err(|e| DhtError::InvalidCid(e.to_string()))?;

        let mut providers: Vec<PeerInfo> = self
            .providers
            .get_providers(&cid)?
            .into_iter()
            .map(|id| self.peer_info_for(id))
            .collect();

        // This node counts as a provider when it holds the block itself.
        if self.datastore.has(&block_key(&cid))?
            && !providers.iter().any(|p| p.id == self.local.id)
        {
            providers.push(self.local.clone());
        }

        Ok(Message::new(MessageType::GetProviders, msg.key.clone())
            .with_provider_peers(providers)
            .with_closer_peers(self.closer_peers(&msg.key, from)))
    }

    /// Closest known peers to a key, excluding the requester and ourselves.
    fn closer_peers(&self, key: &[u8], from: &PeerInfo) -> Vec<PeerInfo> {
        let target = KadId::hash(key);
        lock(&self.routing)
            .closest_peers(&target, self.k)
            .into_iter()
            .filter(|p| p.id != from.id && p.id != self.local.id)
            .collect()
    }

    /// Resolve a peer id to its known addresses, if the routing table has them.
    fn peer_info_for(&self, id: cairn_types::PeerId) -> PeerInfo {
        if id == self.local.id {
            return self.local.clone();
        }
        lock(&self.routing)
            .find(&id)
            .cloned()
            .unwrap_or_else(|| PeerInfo::new(id))
    }

    /// Record contact with a peer, evicting a dead entry if its bucket is full.
    ///
    /// The liveness ping runs in the background so request turnaround never
    /// waits on it.
    fn note_sender(&self, info: &PeerInfo) {
        crate::dht::note_peer(&self.routing, &self.network, self.ping_timeout, info);
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_db::MemoryDatastore;
    use cairn_transport::switch::Connection;
    use cairn_transport::TransportError;
    use cairn_types::{Multiaddr, PeerId};

    /// Switch that refuses every dial; handler tests never dial out.
    struct NullSwitch {
        local: PeerInfo,
    }

    impl Switch for NullSwitch {
        fn local_peer(&self) -> PeerInfo {
            self.local.clone()
        }

        async fn dial(
            &self,
            _peer: &PeerInfo,
            _protocol: &str,
        ) -> std::result::Result<Connection, TransportError> {
            Err(TransportError::Dial("null switch".to_string()))
        }

        async fn accept(&self) -> Option<Inbound> {
            None
        }
    }

    struct Fixture {
        handler: RpcHandler<NullSwitch>,
        datastore: Arc<MemoryDatastore>,
        local: PeerInfo,
    }

    fn fixture() -> Fixture {
        let local = PeerInfo::with_addrs(
            PeerId::random(),
            vec![Multiaddr::parse("/ip4/127.0.0.1/udp/4000").expect("addr")],
        );
        let datastore = Arc::new(MemoryDatastore::new());
        let routing = Arc::new(Mutex::new(RoutingTable::new(local.id, 20, 32)));
        let providers = Arc::new(ProviderStore::new(
            Arc::clone(&datastore) as Arc<dyn Datastore>,
            Duration::from_secs(60),
            Duration::from_secs(60),
            16,
        ));
        let network = Arc::new(Network::new(
            Arc::new(NullSwitch {
                local: local.clone(),
            }),
            Duration::from_millis(50),
        ));
        let handler = RpcHandler::new(
            local.clone(),
            20,
            Duration::from_millis(200),
            Duration::from_millis(50),
            routing,
            providers,
            Arc::clone(&datastore) as Arc<dyn Datastore>,
            Arc::new(ValidatorRegistry::with_defaults()),
            network,
        );
        Fixture {
            handler,
            datastore,
            local,
        }
    }

    fn sender() -> PeerInfo {
        PeerInfo::with_addrs(
            PeerId::random(),
            vec![Multiaddr::parse("/ip4/10.1.1.1/udp/5000").expect("addr")],
        )
    }

    #[tokio::test]
    async fn test_ping_echoes_unchanged() {
        let fx = fixture();
        let msg = Message::new(MessageType::Ping, Vec::new());
        let reply = fx.handler.handle(&sender(), msg.clone()).expect("reply");
        assert_eq!(reply, msg);
    }

    #[tokio::test]
    async fn test_find_node_returns_closer_peers() {
        let fx = fixture();
        let from = sender();

        for seed in 1..=5u8 {
            fx.handler
                .note_sender(&PeerInfo::new(PeerId::from_bytes([seed; 32])));
        }

        let msg = Message::new(MessageType::FindNode, b"target-key".to_vec());
        let reply = fx.handler.handle(&from, msg).expect("reply");
        assert_eq!(reply.closer_peers.len(), 5);
        assert!(reply.provider_peers.is_empty());
        assert!(reply.closer_peers.iter().all(|p| p.id != from.id));
    }

    #[tokio::test]
    async fn test_put_value_requires_record() {
        let fx = fixture();
        let msg = Message::new(MessageType::PutValue, b"/v/k".to_vec());
        let result = fx.handler.handle(&sender(), msg);
        assert!(matches!(result, Err(DhtError::EmptyRecord)));
    }

    #[tokio::test]
    async fn test_put_then_get_value() {
        let fx = fixture();
        let record = Record::new(b"/v/name".to_vec(), b"payload".to_vec());
        let put = Message::new(MessageType::PutValue, b"/v/name".to_vec())
            .with_record(record.clone());
        fx.handler.handle(&sender(), put).expect("put");

        let get = Message::new(MessageType::GetValue, b"/v/name".to_vec());
        let reply = fx.handler.handle(&sender(), get).expect("get");
        let stored = reply.record.expect("record present");
        assert_eq!(stored.value, b"payload");
        assert!(stored.time_received.is_some(), "receipt must be stamped");
    }

    #[tokio::test]
    async fn test_put_value_rejects_invalid_record() {
        let fx = fixture();
        // Value empty: fails the basic validator.
        let record = Record::new(b"/v/name".to_vec(), Vec::new());
        let put =
            Message::new(MessageType::PutValue, b"/v/name".to_vec()).with_record(record);
        assert!(fx.handler.handle(&sender(), put).is_err());
    }

    #[tokio::test]
    async fn test_get_value_absent_still_returns_closer() {
        let fx = fixture();
        fx.handler.note_sender(&sender());

        let get = Message::new(MessageType::GetValue, b"/v/missing".to_vec());
        let reply = fx.handler.handle(&sender(), get).expect("get");
        assert!(reply.record.is_none());
        assert!(!reply.closer_peers.is_empty());
    }

    #[tokio::test]
    async fn test_get_value_missing_key_rejected() {
        let fx = fixture();
        let get = Message::new(MessageType::GetValue, Vec::new());
        assert!(matches!(
            fx.handler.handle(&sender(), get),
            Err(DhtError::MissingKey)
        ));
    }

    #[tokio::test]
    async fn test_add_provider_registers_sender() {
        let fx = fixture();
        let from = sender();
        let cid_bytes = b"\x12\x20some-content".to_vec();

        let msg = Message::new(MessageType::AddProvider, cid_bytes.clone())
            .with_provider_peers(vec![from.clone()]);
        fx.handler.handle(&from, msg).expect("add provider");

        let get = Message::new(MessageType::GetProviders, cid_bytes);
        let reply = fx.handler.handle(&sender(), get).expect("get providers");
        assert_eq!(reply.provider_peers.len(), 1);
        assert_eq!(reply.provider_peers[0].id, from.id);
        // Addresses were learned from the advertisement.
        assert_eq!(reply.provider_peers[0].addrs, from.addrs);
    }

    #[tokio::test]
    async fn test_add_provider_ignores_spoofed_entries() {
        let fx = fixture();
        let from = sender();
        let impostor = sender();
        let cid_bytes = b"\x12\x20spoofed-content".to_vec();

        let msg = Message::new(MessageType::AddProvider, cid_bytes.clone())
            .with_provider_peers(vec![impostor]);
        fx.handler.handle(&from, msg).expect("handled");

        let get = Message::new(MessageType::GetProviders, cid_bytes);
        let reply = fx.handler.handle(&sender(), get).expect("get providers");
        assert!(reply.provider_peers.is_empty());
    }

    #[tokio::test]
    async fn test_add_provider_prefers_payload_addresses() {
        let fx = fixture();
        let mut from = sender();
        let payload_addr = Multiaddr::parse("/ip4/192.168.7.7/udp/7777").expect("addr");
        let advertised =
            PeerInfo::with_addrs(from.id, vec![payload_addr.clone()]);
        from.addrs = vec![Multiaddr::parse("/ip4/10.0.0.9/udp/9").expect("addr")];

        let cid_bytes = b"\x12\x20addressed-content".to_vec();
        let msg = Message::new(MessageType::AddProvider, cid_bytes.clone())
            .with_provider_peers(vec![advertised]);
        fx.handler.handle(&from, msg).expect("handled");

        let reply = fx
            .handler
            .handle(&sender(), Message::new(MessageType::GetProviders, cid_bytes))
            .expect("get providers");
        assert!(reply.provider_peers[0].addrs.contains(&payload_addr));
    }

    #[tokio::test]
    async fn test_add_provider_missing_key_rejected() {
        let fx = fixture();
        let msg = Message::new(MessageType::AddProvider, Vec::new());
        assert!(matches!(
            fx.handler.handle(&sender(), msg),
            Err(DhtError::MissingKey)
        ));
    }

    #[tokio::test]
    async fn test_get_providers_invalid_cid_rejected() {
        let fx = fixture();
        let oversized = vec![0u8; 200];
        let msg = Message::new(MessageType::GetProviders, oversized);
        assert!(matches!(
            fx.handler.handle(&sender(), msg),
            Err(DhtError::InvalidCid(_))
        ));
    }

    #[tokio::test]
    async fn test_get_providers_includes_self_when_block_held() {
        let fx = fixture();
        let cid = Cid::from_bytes(b"\x12\x20held-content").expect("cid");
        fx.datastore
            .put(&block_key(&cid), b"block-bytes")
            .expect("put block");

        let msg = Message::new(MessageType::GetProviders, cid.as_bytes().to_vec());
        let reply = fx.handler.handle(&sender(), msg).expect("get providers");
        assert!(reply.provider_peers.iter().any(|p| p.id == fx.local.id));
    }
}
