//! Connection management for the POP3 client
//!
//! This module handles TCP connection establishment, socket tuning, and the
//! TLS handshake, both implicit (POP3S) and in-place after STLS.

use crate::config::{Security, ServerConfig};
use crate::error::{Pop3Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme,
    StreamOwned,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use tracing::{debug, warn};

/// Socket receive buffer; message bodies dominate the traffic
const RECV_BUFFER_SIZE: usize = 256 * 1024;

/// Dangerous certificate verifier that accepts all certificates
///
/// **Security Warning:** This verifier disables all certificate validation,
/// making connections vulnerable to man-in-the-middle attacks. Only use this
/// for testing or with servers you trust on a secure network.
#[derive(Debug)]
pub(super) struct DangerousAcceptAnyCertificate;

impl ServerCertVerifier for DangerousAcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

/// Blocking POP3 transport: plain TCP or TLS over TCP
///
/// Starts as [`Connection::Plain`] for `Plain`/`StartTls` configurations and
/// is swapped to [`Connection::Tls`] in place by [`upgrade`](Self::upgrade).
pub enum Connection {
    /// Cleartext TCP
    Plain(TcpStream),
    /// TLS session over TCP
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
    /// Left behind after a failed upgrade
    Closed,
}

impl Connection {
    /// Open a TCP connection, performing the TLS handshake for [`Security::Tls`]
    ///
    /// # Errors
    ///
    /// - [`Pop3Error::Io`] - address resolution or TCP connect fails
    /// - [`Pop3Error::Timeout`] - connect or handshake times out
    /// - [`Pop3Error::Tls`] - TLS handshake fails
    pub fn open(config: &ServerConfig) -> Result<Self> {
        debug!("Connecting to POP3 server {}:{}", config.host, config.port);
        let tcp = connect_tcp(config)?;
        let connection = Connection::Plain(tcp);

        match config.security {
            Security::Tls => connection.into_tls(config),
            Security::Plain | Security::StartTls => Ok(connection),
        }
    }

    /// Upgrade a plain connection to TLS (after a successful `STLS`)
    ///
    /// On failure the connection is left [`Closed`](Connection::Closed).
    pub fn upgrade(&mut self, config: &ServerConfig) -> Result<()> {
        let connection = std::mem::replace(self, Connection::Closed);
        *self = connection.into_tls(config)?;
        Ok(())
    }

    fn into_tls(self, config: &ServerConfig) -> Result<Self> {
        let tcp = match self {
            Connection::Plain(tcp) => tcp,
            Connection::Tls(_) => {
                return Err(Pop3Error::Tls("connection is already encrypted".to_string()));
            }
            Connection::Closed => return Err(Pop3Error::ConnectionClosed),
        };

        let server_name = ServerName::try_from(config.host.as_str())
            .map_err(|e| Pop3Error::Tls(format!("Invalid domain: {}", e)))?
            .to_owned();
        let session = ClientConnection::new(tls_config(config), server_name)
            .map_err(|e| Pop3Error::Tls(format!("TLS setup failed: {}", e)))?;

        let mut stream = StreamOwned::new(session, tcp);
        while stream.conn.is_handshaking() {
            stream
                .conn
                .complete_io(&mut stream.sock)
                .map_err(handshake_error)?;
        }
        debug!(
            "TLS established with {} ({:?})",
            config.host,
            stream.conn.protocol_version()
        );

        Ok(Connection::Tls(Box::new(stream)))
    }

    /// Whether the transport is encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Connection::Tls(_))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connection::Plain(tcp) => f.debug_tuple("Plain").field(&tcp.peer_addr().ok()).finish(),
            Connection::Tls(tls) => f.debug_tuple("Tls").field(&tls.sock.peer_addr().ok()).finish(),
            Connection::Closed => f.write_str("Closed"),
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Plain(tcp) => tcp.read(buf),
            Connection::Tls(tls) => tls.read(buf),
            Connection::Closed => Err(closed()),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Plain(tcp) => tcp.write(buf),
            Connection::Tls(tls) => tls.write(buf),
            Connection::Closed => Err(closed()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Plain(tcp) => tcp.flush(),
            Connection::Tls(tls) => tls.flush(),
            Connection::Closed => Err(closed()),
        }
    }
}

fn resolve(config: &ServerConfig) -> Result<SocketAddr> {
    (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| {
            Pop3Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Failed to resolve address: {}", e),
            ))
        })?
        .next()
        .ok_or_else(|| {
            Pop3Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "No address resolved",
            ))
        })
}

fn connect_tcp(config: &ServerConfig) -> Result<TcpStream> {
    let socket_addr = resolve(config)?;
    let domain = if socket_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // Commands are tiny and latency bound
    socket.set_nodelay(true)?;
    socket.set_keepalive(true)?;

    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
        warn!(
            "Failed to set receive buffer size to {} bytes: {}",
            RECV_BUFFER_SIZE, e
        );
    }

    socket
        .connect_timeout(&socket_addr.into(), config.connect_timeout)
        .map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Pop3Error::Timeout,
            _ => Pop3Error::Io(e),
        })?;

    socket.set_read_timeout(Some(config.io_timeout))?;
    socket.set_write_timeout(Some(config.io_timeout))?;

    Ok(socket.into())
}

fn tls_config(config: &ServerConfig) -> Arc<ClientConfig> {
    use rustls::crypto::{CryptoProvider, ring};
    let _ = CryptoProvider::install_default(ring::default_provider());

    let tls_config = if config.allow_insecure_tls {
        warn!("TLS certificate validation disabled - connection vulnerable to MITM attacks");
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousAcceptAnyCertificate))
            .with_no_client_auth()
    } else {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };

    Arc::new(tls_config)
}

fn handshake_error(e: io::Error) -> Pop3Error {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Pop3Error::Timeout,
        _ => Pop3Error::Tls(format!("TLS handshake failed: {}", e)),
    }
}
