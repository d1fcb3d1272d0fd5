//! In-memory Switch for integration tests.
//!
//! A [`MemNetwork`] is a registry of nodes; dialing a registered peer opens a
//! paired duplex stream and delivers the far end to that peer's accept loop,
//! exactly like a real transport but without sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use cairn_transport::switch::{Connection, Inbound, Switch};
use cairn_transport::TransportError;
use cairn_types::{Multiaddr, PeerId, PeerInfo};

static NEXT_PORT: AtomicU16 = AtomicU16::new(4000);

/// A simulated network connecting [`MemSwitch`] instances.
#[derive(Default)]
pub struct MemNetwork {
    peers: Mutex<HashMap<PeerId, mpsc::UnboundedSender<Inbound>>>,
}

impl MemNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new node on this network with a fresh identity.
    pub fn create_switch(self: &Arc<Self>) -> Arc<MemSwitch> {
        let port = NEXT_PORT.fetch_add(1, Ordering::SeqCst);
        let addr = Multiaddr::parse(&format!("/ip4/127.0.0.1/udp/{port}")).expect("addr");
        let local = PeerInfo::with_addrs(PeerId::random(), vec![addr]);

        let (tx, rx) = mpsc::unbounded_channel();
        self.peers
            .lock()
            .expect("registry lock")
            .insert(local.id, tx);

        Arc::new(MemSwitch {
            net: Arc::clone(self),
            local,
            inbound: tokio::sync::Mutex::new(rx),
        })
    }

    /// Drop a node from the network, making it undialable.
    pub fn disconnect(&self, id: &PeerId) {
        self.peers.lock().expect("registry lock").remove(id);
    }
}

/// One node's endpoint on a [`MemNetwork`].
pub struct MemSwitch {
    net: Arc<MemNetwork>,
    local: PeerInfo,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
}

impl Switch for MemSwitch {
    fn local_peer(&self) -> PeerInfo {
        self.local.clone()
    }

    async fn dial(
        &self,
        peer: &PeerInfo,
        _protocol: &str,
    ) -> Result<Connection, TransportError> {
        let sender = self
            .net
            .peers
            .lock()
            .expect("registry lock")
            .get(&peer.id)
            .cloned()
            .ok_or_else(|| TransportError::Dial(format!("peer {} not reachable", peer.id)))?;

        let (near, far) = tokio::io::duplex(65536);
        let (near_r, near_w) = tokio::io::split(near);
        let (far_r, far_w) = tokio::io::split(far);

        sender
            .send(Inbound {
                remote: self.local.clone(),
                conn: Connection::new(far_w, far_r),
            })
            .map_err(|_| TransportError::Dial("peer stopped accepting".to_string()))?;

        Ok(Connection::new(near_w, near_r))
    }

    async fn accept(&self) -> Option<Inbound> {
        self.inbound.lock().await.recv().await
    }
}
