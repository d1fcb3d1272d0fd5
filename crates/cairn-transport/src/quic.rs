//! QUIC/TLS 1.3 Switch implementation.
//!
//! Production transport for the Cairn DHT using [`quinn`]. Nodes use
//! self-signed TLS certificates; peer authentication is deferred to the
//! identity exchange that opens every stream (see below), so TLS serves
//! transport encryption only.
//!
//! ## ALPN
//!
//! The ALPN protocol identifier is the DHT protocol id
//! ([`crate::message::PROTOCOL_ID`]).
//!
//! ## Stream lifecycle
//!
//! 1. The dialer connects (or reuses quinn's connection under the hood) and
//!    opens one bidirectional stream per RPC.
//! 2. The dialer writes a hello frame — its CBOR-encoded [`PeerInfo`] — so
//!    the acceptor learns who opened the stream.
//! 3. The RPC layer then writes exactly one request frame and reads exactly
//!    one response frame.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::{ClientConfig, Endpoint, ServerConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use cairn_types::{Multiaddr, PeerId, PeerInfo};

use crate::framing::{read_frame, write_frame};
use crate::message::PROTOCOL_ID;
use crate::switch::{Connection, Inbound, Switch};
use crate::{cbor, TransportError};

/// Default QUIC idle timeout in milliseconds.
pub const DEFAULT_IDLE_TIMEOUT_MS: u32 = 30_000;

/// Default maximum number of concurrent bidirectional streams per connection.
pub const DEFAULT_MAX_BI_STREAMS: u32 = 128;

/// TLS server name used with self-signed certificates.
const SERVER_NAME: &str = "cairn-node";

/// Configuration for a [`QuicSwitch`].
#[derive(Clone)]
pub struct QuicConfig {
    /// Local address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum idle timeout in milliseconds.
    pub idle_timeout_ms: u32,
    /// Maximum concurrent bidirectional streams per connection.
    pub max_bi_streams: u32,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_bi_streams: DEFAULT_MAX_BI_STREAMS,
        }
    }
}

/// QUIC-backed [`Switch`].
///
/// Every node acts as both dialer and acceptor over a single quinn
/// [`Endpoint`].
pub struct QuicSwitch {
    endpoint: Endpoint,
    local: PeerInfo,
    inbound: Mutex<mpsc::Receiver<Inbound>>,
    accept_task: JoinHandle<()>,
}

impl QuicSwitch {
    /// Bind a QUIC switch for the given local peer id.
    ///
    /// The bound address is appended to the local peer's multiaddresses.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Tls`] if TLS configuration fails or
    /// [`TransportError::Io`] if the socket cannot be bound.
    pub fn bind(local_id: PeerId, config: QuicConfig) -> Result<Self, TransportError> {
        let server_config = build_server_config(config.idle_timeout_ms, config.max_bi_streams)?;
        let client_config = build_client_config()?;

        let mut endpoint = Endpoint::server(server_config, config.bind_addr)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        endpoint.set_default_client_config(client_config);

        let local_addr = endpoint
            .local_addr()
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let local = PeerInfo::with_addrs(local_id, vec![Multiaddr::from_socket_addr(local_addr)]);

        let (tx, rx) = mpsc::channel(64);
        let accept_task = tokio::spawn(accept_loop(endpoint.clone(), tx));

        tracing::info!(%local_addr, peer = %local_id, "QUIC switch started");

        Ok(Self {
            endpoint,
            local,
            inbound: Mutex::new(rx),
            accept_task,
        })
    }

    /// The socket address this switch is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.local_addr().ok()
    }

    /// Close the endpoint and stop accepting streams.
    pub fn close(&self) {
        self.endpoint.close(quinn::VarInt::from_u32(0), b"shutdown");
        self.accept_task.abort();
    }
}

impl Drop for QuicSwitch {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl Switch for QuicSwitch {
    fn local_peer(&self) -> PeerInfo {
        self.local.clone()
    }

    async fn dial(&self, peer: &PeerInfo, protocol: &str) -> Result<Connection, TransportError> {
        if protocol != PROTOCOL_ID {
            return Err(TransportError::Dial(format!(
                "unsupported protocol {protocol}"
            )));
        }

        let addr = peer
            .addrs
            .iter()
            .find_map(|a| a.socket_addr())
            .ok_or_else(|| {
                TransportError::Dial(format!("peer {} has no dialable address", peer.id))
            })?;

        let connecting = self
            .endpoint
            .connect(addr, SERVER_NAME)
            .map_err(|e| TransportError::Dial(e.to_string()))?;
        let connection = connecting
            .await
            .map_err(|e| TransportError::Dial(e.to_string()))?;

        let (mut send, recv) = connection
            .open_bi()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        // Hello frame: identify ourselves to the acceptor.
        let hello = cbor::to_vec(&self.local)?;
        write_frame(&mut send, &hello).await?;

        tracing::debug!(remote = %peer.id, %addr, "dialed peer");

        Ok(Connection::new(send, recv))
    }

    async fn accept(&self) -> Option<Inbound> {
        self.inbound.lock().await.recv().await
    }
}

/// Accept incoming connections and surface their streams.
async fn accept_loop(endpoint: Endpoint, tx: mpsc::Sender<Inbound>) {
    while let Some(incoming) = endpoint.accept().await {
        let tx = tx.clone();
        tokio::spawn(async move {
            let connection = match incoming.await {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!(error = %e, "inbound connection failed");
                    return;
                }
            };
            loop {
                let (send, mut recv) = match connection.accept_bi().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                // Read the dialer's hello frame before handing the stream on.
                let remote: PeerInfo = match read_frame(&mut recv)
                    .await
                    .and_then(|bytes| cbor::from_slice(&bytes))
                {
                    Ok(info) => info,
                    Err(e) => {
                        tracing::debug!(error = %e, "malformed hello frame, dropping stream");
                        continue;
                    }
                };
                let inbound = Inbound {
                    remote,
                    conn: Connection::new(send, recv),
                };
                if tx.send(inbound).await.is_err() {
                    return;
                }
            }
        });
    }
}

// ---------------------------------------------------------------------------
// TLS / certificate helpers
// ---------------------------------------------------------------------------

/// Generate a self-signed TLS certificate and private key.
fn generate_self_signed_cert(
) -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>), TransportError> {
    let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519)
        .map_err(|e| TransportError::Tls(format!("key generation failed: {e}")))?;

    let params = rcgen::CertificateParams::new(vec![SERVER_NAME.to_string()])
        .map_err(|e| TransportError::Tls(format!("cert params failed: {e}")))?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| TransportError::Tls(format!("self-signed cert generation failed: {e}")))?;

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    Ok((cert_der, key_der))
}

/// Build a quinn [`ServerConfig`] with self-signed TLS and the DHT ALPN.
fn build_server_config(
    idle_timeout_ms: u32,
    max_bi_streams: u32,
) -> Result<ServerConfig, TransportError> {
    let (cert_der, key_der) = generate_self_signed_cert()?;

    let provider = rustls::crypto::ring::default_provider();
    let mut tls_config = rustls::ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Tls(format!("server TLS version config failed: {e}")))?
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .map_err(|e| TransportError::Tls(format!("server TLS config failed: {e}")))?;

    tls_config.alpn_protocols = vec![PROTOCOL_ID.as_bytes().to_vec()];

    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(
        quinn::IdleTimeout::try_from(std::time::Duration::from_millis(u64::from(idle_timeout_ms)))
            .map_err(|e| TransportError::Tls(format!("idle timeout config failed: {e}")))?,
    ));
    transport.max_concurrent_bidi_streams(quinn::VarInt::from_u32(max_bi_streams));

    let mut server_config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
            .map_err(|e| TransportError::Tls(format!("QUIC server crypto config failed: {e}")))?,
    ));
    server_config.transport_config(Arc::new(transport));

    Ok(server_config)
}

/// Build a quinn [`ClientConfig`] that accepts any server certificate.
fn build_client_config() -> Result<ClientConfig, TransportError> {
    let provider = rustls::crypto::ring::default_provider();
    let mut tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Tls(format!("client TLS version config failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();

    tls_config.alpn_protocols = vec![PROTOCOL_ID.as_bytes().to_vec()];

    let client_config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(tls_config)
            .map_err(|e| TransportError::Tls(format!("QUIC client crypto config failed: {e}")))?,
    ));

    Ok(client_config)
}

/// TLS certificate verifier that accepts any server certificate.
///
/// Intentionally insecure at the TLS level: node identity comes from the
/// per-stream hello exchange, TLS is transport encryption only.
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QuicConfig::default();
        assert_eq!(config.idle_timeout_ms, DEFAULT_IDLE_TIMEOUT_MS);
        assert_eq!(config.max_bi_streams, DEFAULT_MAX_BI_STREAMS);
    }

    #[test]
    fn test_generate_self_signed_cert() {
        let (cert, key) = generate_self_signed_cert().expect("cert generation");
        assert!(!cert.is_empty());
        match &key {
            PrivateKeyDer::Pkcs8(k) => assert!(!k.secret_pkcs8_der().is_empty()),
            _ => unreachable!("expected PKCS8 key"),
        }
    }

    #[test]
    fn test_build_server_config_succeeds() {
        assert!(build_server_config(DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_MAX_BI_STREAMS).is_ok());
    }

    #[test]
    fn test_build_client_config_succeeds() {
        assert!(build_client_config().is_ok());
    }
}
