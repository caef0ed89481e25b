//! QUIC transport using quinn with TLS (self-signed certs for development).
//!
//! Each session uses one bidirectional stream carrying length-prefixed
//! frames. A reader task turns frames into packets, a writer task drains the
//! outgoing queue, so the session can poll without awaiting.

use crate::codec::{encode_frame, frame_length, LENGTH_PREFIX};
use crate::protocol::{PacketTag, PROTOCOL_VERSION};
use crate::transport::{Received, Transport};
use anyhow::{anyhow, Context, Result};
use quinn::{ClientConfig, Connection, Endpoint, RecvStream, SendStream, ServerConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// ALPN protocol identifier.
pub fn alpn() -> Vec<u8> {
    format!("colonysync/{}", PROTOCOL_VERSION).into_bytes()
}

fn transport_config() -> Result<quinn::TransportConfig> {
    let mut config = quinn::TransportConfig::default();
    config.keep_alive_interval(Some(Duration::from_secs(5)));
    config.max_idle_timeout(Some(Duration::from_secs(30).try_into()?));
    Ok(config)
}

fn server_config() -> Result<ServerConfig> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let (cert, key) = generate_self_signed_cert()?;
    let mut crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .context("Failed to build rustls ServerConfig")?;
    crypto.alpn_protocols = vec![alpn()];

    let mut config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
            .context("Failed to create QuicServerConfig")?,
    ));
    config.transport_config(Arc::new(transport_config()?));
    Ok(config)
}

fn client_config() -> Result<ClientConfig> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![alpn()];

    let mut config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .context("Failed to create QuicClientConfig")?,
    ));
    config.transport_config(Arc::new(transport_config()?));
    Ok(config)
}

/// Authority-side endpoint accepting sessions.
pub struct ServerEndpoint {
    endpoint: Endpoint,
    addr: SocketAddr,
}

impl ServerEndpoint {
    /// Bind to `addr`.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        info!("Creating server endpoint on {}", addr);
        let endpoint =
            Endpoint::server(server_config()?, addr).context("Failed to bind server endpoint")?;
        let addr = endpoint.local_addr()?;
        info!("Server endpoint bound to {}", addr);
        Ok(Self { endpoint, addr })
    }

    /// Local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the next session.
    ///
    /// Returns `Ok(None)` once the endpoint is closed.
    pub async fn accept(&self) -> Result<Option<QuicTransport>> {
        let Some(incoming) = self.endpoint.accept().await else {
            return Ok(None);
        };
        let connection = incoming.await.context("Failed to accept connection")?;
        debug!(peer = %connection.remote_address(), "Connection accepted");
        let (send, recv) = connection
            .accept_bi()
            .await
            .context("Failed to accept session stream")?;
        Ok(Some(QuicTransport::spawn(connection, send, recv)))
    }

    /// Stop accepting sessions.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"Server shutting down");
    }
}

/// Participant-side endpoint.
pub struct ClientEndpoint {
    endpoint: Endpoint,
}

impl ClientEndpoint {
    /// Bind an ephemeral local port.
    pub fn new() -> Result<Self> {
        let mut endpoint = Endpoint::client("0.0.0.0:0".parse()?)?;
        endpoint.set_default_client_config(client_config()?);
        debug!("Client endpoint created on {}", endpoint.local_addr()?);
        Ok(Self { endpoint })
    }

    /// Connect and open the session stream.
    pub async fn connect(&self, server_addr: SocketAddr) -> Result<QuicTransport> {
        info!("Connecting to server at {}", server_addr);
        let connection = self
            .endpoint
            .connect(server_addr, "localhost")
            .context("Failed to initiate connection")?
            .await
            .context("Failed to establish connection")?;
        let (send, recv) = connection
            .open_bi()
            .await
            .context("Failed to open session stream")?;
        info!("Connected to server at {}", server_addr);
        Ok(QuicTransport::spawn(connection, send, recv))
    }

    /// Close the endpoint and every connection on it.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"Client shutting down");
    }
}

/// One session over a QUIC connection.
pub struct QuicTransport {
    connection: Connection,
    outgoing: Option<UnboundedSender<Vec<u8>>>,
    incoming: UnboundedReceiver<Received>,
}

impl QuicTransport {
    fn spawn(connection: Connection, send: SendStream, recv: RecvStream) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_frames(send, out_rx));
        tokio::spawn(read_frames(recv, in_tx));
        Self {
            connection,
            outgoing: Some(out_tx),
            incoming: in_rx,
        }
    }

    /// Peer address.
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Wait for the next packet.
    pub async fn recv(&mut self) -> Result<Received> {
        self.incoming
            .recv()
            .await
            .ok_or_else(|| anyhow!("Session stream closed"))
    }
}

impl Transport for QuicTransport {
    fn send(&mut self, tag: PacketTag, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(tag, payload)?;
        self.outgoing
            .as_ref()
            .ok_or_else(|| anyhow!("Session is closed"))?
            .send(frame)
            .map_err(|_| anyhow!("Session writer stopped"))
    }

    fn try_recv(&mut self) -> Result<Option<Received>> {
        match self.incoming.try_recv() {
            Ok(packet) => Ok(Some(packet)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(anyhow!("Session stream closed")),
        }
    }

    fn close(&mut self, reason: &str) {
        if self.outgoing.take().is_some() {
            info!(peer = %self.connection.remote_address(), reason, "Closing session");
            self.connection.close(0u32.into(), reason.as_bytes());
        }
    }

    fn is_open(&self) -> bool {
        self.outgoing.is_some() && self.connection.close_reason().is_none()
    }
}

async fn write_frames(mut send: SendStream, mut frames: UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = frames.recv().await {
        if let Err(err) = send.write_all(&frame).await {
            warn!("Session write failed: {}", err);
            return;
        }
    }
    let _ = send.finish();
}

async fn read_frames(mut recv: RecvStream, packets: UnboundedSender<Received>) {
    loop {
        match read_frame(&mut recv).await {
            Ok(Some(packet)) => {
                if packets.send(packet).is_err() {
                    return;
                }
            }
            Ok(None) => {
                debug!("Session stream finished");
                return;
            }
            Err(err) => {
                warn!("Session read failed: {:#}", err);
                return;
            }
        }
    }
}

async fn read_frame(recv: &mut RecvStream) -> Result<Option<Received>> {
    let mut prefix = [0u8; LENGTH_PREFIX];
    match recv.read_exact(&mut prefix).await {
        Ok(()) => {}
        Err(quinn::ReadExactError::FinishedEarly(0)) => return Ok(None),
        Err(err) => return Err(err).context("Failed to read frame length"),
    }
    let length = frame_length(prefix)?;

    let mut body = vec![0u8; length];
    recv.read_exact(&mut body)
        .await
        .context("Failed to read frame body")?;
    let tag = PacketTag::try_from(body[0])?;
    body.remove(0);
    Ok(Some((tag, body)))
}

/// Generate a self-signed certificate for development use.
fn generate_self_signed_cert() -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
    debug!("Generating self-signed certificate");
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .context("Failed to generate certificate")?;
    let key = PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());
    Ok((CertificateDer::from(cert.cert), key))
}

/// Accepts any server certificate (development only).
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
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_packet;
    use crate::protocol::{TimeControl, Username};
    use crate::transport::send_packet;

    #[tokio::test]
    async fn server_binds_an_ephemeral_port() {
        let server = ServerEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(server.local_addr().port() > 0);
        server.close();
    }

    #[tokio::test]
    async fn session_carries_packets_both_ways() {
        let server = ServerEndpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr();
        let accept = tokio::spawn(async move {
            let session = server.accept().await.unwrap().expect("a session");
            (server, session)
        });

        let client = ClientEndpoint::new().unwrap();
        let mut to_server = client.connect(addr).await.unwrap();
        // The stream becomes visible to the server with its first bytes.
        send_packet(
            &mut to_server,
            &Username {
                name: "Alice".into(),
            },
        )
        .unwrap();

        let (_server, mut to_client) = accept.await.unwrap();
        let (tag, payload) = to_client.recv().await.unwrap();
        assert_eq!(tag, PacketTag::Username);
        assert_eq!(decode_packet::<Username>(&payload).unwrap().name, "Alice");

        send_packet(&mut to_client, &TimeControl { tick_until: 120 }).unwrap();
        let (tag, payload) = to_server.recv().await.unwrap();
        assert_eq!(tag, PacketTag::TimeControl);
        assert_eq!(
            decode_packet::<TimeControl>(&payload).unwrap().tick_until,
            120
        );
        assert_eq!(to_server.remote_address(), addr);

        to_server.close("test complete");
        assert!(!to_server.is_open());
        client.close();
    }
}
