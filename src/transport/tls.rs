//! TLS tunnel transport
//!
//! Provides the encrypted connection for the framed multiplex variant,
//! using rustls (pure Rust, easy static linking). Certificate validation
//! uses the platform trust store, optionally extended with a custom root,
//! or can be disabled entirely for testing.

use super::SocketOpts;
use crate::config::TlsOptions;
use crate::error::{Error, Result};
use crate::target::resolve;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;

/// TLS stream type alias
pub type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// TLS transport for the framed multiplex tunnel
#[derive(Clone)]
pub struct TlsTransport {
    connector: TlsConnector,
    hostname: Option<String>,
    socket_opts: SocketOpts,
    connect_timeout: Duration,
}

impl std::fmt::Debug for TlsTransport {
    // The rustls connector has no useful Debug output
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("hostname", &self.hostname)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl TlsTransport {
    /// Build a transport from TLS options.
    pub fn with_config(options: &TlsOptions, socket_opts: SocketOpts) -> Result<Self> {
        let mut root_store = RootCertStore::empty();

        // Platform trust store
        let native_certs = rustls_native_certs::load_native_certs();
        for cert in native_certs.certs {
            root_store.add(cert).ok();
        }

        // Extra trusted root, if configured
        if let Some(ref root_path) = options.trusted_root {
            let file = std::fs::File::open(root_path).map_err(|e| {
                Error::InvalidArgument(format!(
                    "cannot open certificate file {}: {}",
                    root_path, e
                ))
            })?;
            let mut reader = BufReader::new(file);
            let certs = rustls_pemfile::certs(&mut reader)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    Error::InvalidArgument(format!(
                        "cannot parse certificates from {}: {}",
                        root_path, e
                    ))
                })?;
            for cert in certs {
                root_store.add(cert).map_err(|e| {
                    Error::InvalidArgument(format!("rejected trusted root: {}", e))
                })?;
            }
        }

        let tls_config = if options.skip_verify {
            // Accepts any certificate; only for testing
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
                .with_no_client_auth()
        } else {
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        };

        Ok(TlsTransport {
            connector: TlsConnector::from(Arc::new(tls_config)),
            hostname: options.hostname.clone(),
            socket_opts,
            connect_timeout: Duration::from_secs(10),
        })
    }

    /// Set the connect + handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connect and complete the TLS handshake.
    pub async fn connect(&self, host: &str, port: u16) -> Result<TlsStream> {
        let addr = resolve(host, port).await?;

        let tcp_stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectionTimeout)?
            .map_err(Error::from_connect_io)?;

        self.socket_opts.apply(&tcp_stream)?;

        let hostname = self.hostname.as_deref().unwrap_or(host);
        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|_| Error::InvalidArgument(format!("invalid hostname: {}", hostname)))?;

        let tls_stream = tokio::time::timeout(
            self.connect_timeout,
            self.connector.connect(server_name, tcp_stream),
        )
        .await
        .map_err(|_| Error::ConnectionTimeout)?
        .map_err(|e| Error::HandshakeFailed(format!("TLS handshake with {}: {}", hostname, e)))?;

        tracing::debug!("TLS connection established to {} ({})", hostname, addr);

        Ok(tls_stream)
    }
}

/// Verifier behind `skip_verify`: claims every certificate and signature is
/// valid. The method set is dictated by rustls's `ServerCertVerifier`
/// trait; there is nothing to decide here beyond the scheme list.
#[derive(Debug)]
struct InsecureVerifier;

impl danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<danger::ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<danger::HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<danger::HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        use SignatureScheme::*;
        vec![
            RSA_PKCS1_SHA256,
            RSA_PKCS1_SHA384,
            RSA_PKCS1_SHA512,
            RSA_PSS_SHA256,
            RSA_PSS_SHA384,
            RSA_PSS_SHA512,
            ECDSA_NISTP256_SHA256,
            ECDSA_NISTP384_SHA384,
            ECDSA_NISTP521_SHA512,
            ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_transport_with_config() {
        let options = TlsOptions {
            hostname: Some("example.com".to_string()),
            trusted_root: None,
            skip_verify: true,
            initial_window: 256 * 1024,
        };

        let transport = TlsTransport::with_config(&options, SocketOpts::default()).unwrap();
        assert_eq!(transport.hostname, Some("example.com".to_string()));
    }

    #[test]
    fn test_tls_transport_with_connect_timeout() {
        let options = TlsOptions {
            hostname: None,
            trusted_root: None,
            skip_verify: true,
            initial_window: 256 * 1024,
        };

        let transport = TlsTransport::with_config(&options, SocketOpts::default())
            .unwrap()
            .with_connect_timeout(Duration::from_secs(30));

        assert_eq!(transport.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_tls_transport_missing_trusted_root() {
        let options = TlsOptions {
            hostname: None,
            trusted_root: Some("/nonexistent/ca.pem".to_string()),
            skip_verify: false,
            initial_window: 256 * 1024,
        };

        let err = TlsTransport::with_config(&options, SocketOpts::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
