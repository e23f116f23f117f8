//! Protocol probing.
//!
//! Classifies a `(host, port)` as plain HTTP, HTTPS, or neither by speaking
//! to it: first a TLS handshake with a minimal `GET / HTTP/1.0` over the
//! encrypted stream, then the same request in plaintext. A response line
//! starting with `HTTP/` settles the classification.
//!
//! Certificate verification is disabled for the TLS attempt: the targets are
//! local, unconfigured dev servers with self-signed or missing-hostname
//! certificates. This prober must never be pointed at cross-machine traffic.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

/// Deadline for one complete probe attempt (connect, handshake, request,
/// first response line).
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Minimal request; HTTP/1.0 so the server closes after responding.
const PROBE_REQUEST: &[u8] = b"GET / HTTP/1.0\r\nHost: localhost\r\n\r\n";

/// Detected protocol of a local service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Not an HTTP service (closed port, timeout, or non-HTTP response).
    None,
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Protocol {
    /// URL scheme for the protocol; `"none"` when not HTTP.
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::None => "none",
        }
    }
}

/// Probes `host:port`, trying HTTPS first and falling back to plain HTTP.
pub async fn detect_protocol(host: &str, port: u16) -> Protocol {
    if is_https(host, port).await {
        Protocol::Https
    } else if is_http(host, port).await {
        Protocol::Http
    } else {
        Protocol::None
    }
}

/// True when the service answers an HTTP request sent over TLS.
pub async fn is_https(host: &str, port: u16) -> bool {
    let attempt = async {
        let stream = TcpStream::connect((host, port)).await.ok()?;
        let server_name = ServerName::try_from(host.to_string()).ok()?;
        let connector = TlsConnector::from(insecure_client_config());
        let tls = connector.connect(server_name, stream).await.ok()?;
        read_http_status_line(tls).await
    };
    matches!(timeout(PROBE_TIMEOUT, attempt).await, Ok(Some(_)))
}

/// True when the service answers a plaintext HTTP request.
pub async fn is_http(host: &str, port: u16) -> bool {
    let attempt = async {
        let stream = TcpStream::connect((host, port)).await.ok()?;
        read_http_status_line(stream).await
    };
    matches!(timeout(PROBE_TIMEOUT, attempt).await, Ok(Some(_)))
}

/// Sends the probe request and returns the status line if it looks like HTTP.
async fn read_http_status_line<S>(mut stream: S) -> Option<String>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    stream.write_all(PROBE_REQUEST).await.ok()?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.ok()?;

    let line = line.trim();
    if line.to_ascii_uppercase().starts_with("HTTP/") {
        Some(line.to_string())
    } else {
        None
    }
}

/// TLS client config that accepts any server certificate.
fn insecure_client_config() -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    Arc::new(config)
}

/// Verifier that accepts every certificate; local probing only.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
