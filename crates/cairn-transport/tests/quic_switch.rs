//! Loopback exchange between two QUIC switches.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cairn_transport::message::PROTOCOL_ID;
use cairn_transport::quic::{QuicConfig, QuicSwitch};
use cairn_transport::switch::Switch;
use cairn_types::PeerId;

fn loopback_config() -> QuicConfig {
    QuicConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        ..QuicConfig::default()
    }
}

#[tokio::test]
async fn test_dial_hello_and_frame_exchange() {
    let a = Arc::new(QuicSwitch::bind(PeerId::random(), loopback_config()).expect("bind a"));
    let b = Arc::new(QuicSwitch::bind(PeerId::random(), loopback_config()).expect("bind b"));

    let b_accept = Arc::clone(&b);
    let server = tokio::spawn(async move {
        let mut inbound = b_accept.accept().await.expect("inbound stream");
        let request = inbound.conn.read_message().await.expect("read request");
        inbound
            .conn
            .write_message(&request)
            .await
            .expect("write reply");
        inbound.remote
    });

    let mut conn = a
        .dial(&b.local_peer(), PROTOCOL_ID)
        .await
        .expect("dial b");
    conn.write_message(b"over quic").await.expect("write");

    let reply = tokio::time::timeout(Duration::from_secs(10), conn.read_message())
        .await
        .expect("reply in time")
        .expect("read reply");
    assert_eq!(reply, b"over quic");

    // The hello frame identified the dialer to the acceptor.
    let remote = tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server in time")
        .expect("server task");
    assert_eq!(remote.id, a.local_peer().id);

    a.close();
    b.close();
}

#[tokio::test]
async fn test_dial_rejects_foreign_protocol() {
    let a = QuicSwitch::bind(PeerId::random(), loopback_config()).expect("bind a");
    let b = QuicSwitch::bind(PeerId::random(), loopback_config()).expect("bind b");

    let result = a.dial(&b.local_peer(), "/other/proto/1.0.0").await;
    assert!(result.is_err());

    a.close();
    b.close();
}

#[tokio::test]
async fn test_dial_unaddressable_peer_fails() {
    let a = QuicSwitch::bind(PeerId::random(), loopback_config()).expect("bind a");
    let ghost = cairn_types::PeerInfo::new(PeerId::random());

    let result = a.dial(&ghost, PROTOCOL_ID).await;
    assert!(result.is_err());

    a.close();
}
