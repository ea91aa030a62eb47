//! TLS connector for LDAPS and StartTLS.

use std::net::IpAddr;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;

use crate::config::TlsConfig;
use crate::error::TlsError;

/// Wraps a plain stream in TLS according to a [`TlsConfig`].
///
/// The same connector serves `ldaps://` (TLS from the first byte) and
/// StartTLS (TLS after the extended operation succeeded); only the moment
/// [`connect`](Self::connect) is called differs.
#[derive(Clone)]
pub struct TlsConnector {
    config: TlsConfig,
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Create a connector from a configuration.
    pub fn new(config: TlsConfig) -> Self {
        let inner = tokio_rustls::TlsConnector::from(config.client_config());
        Self { config, inner }
    }

    /// The configuration this connector was built from.
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }

    /// Perform the TLS handshake over `stream`.
    ///
    /// `host` is the host the stream is connected to. The configured
    /// server name, if any, takes precedence for SNI and verification.
    pub async fn connect<S>(&self, host: &str, stream: S) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let name = self.config.server_name().unwrap_or(host);
        let server_name = server_name(name)?;

        tracing::debug!(server_name = %name, "starting TLS handshake");

        let stream = self
            .inner
            .connect(server_name, stream)
            .await
            .map_err(|e| {
                tracing::debug!(server_name = %name, error = %e, "TLS handshake failed");
                TlsError::Handshake(e)
            })?;

        let (_, session) = stream.get_ref();
        tracing::debug!(
            server_name = %name,
            protocol = ?session.protocol_version(),
            cipher_suite = ?session.negotiated_cipher_suite().map(|s| s.suite()),
            "TLS handshake complete"
        );

        Ok(stream)
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Convert a host into a rustls server name.
///
/// Accepts DNS names, IPv4 addresses and IPv6 addresses with or without
/// brackets. A trailing dot on a DNS name is dropped.
pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
    let trimmed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Ok(ServerName::IpAddress(ip.into()));
    }

    let dns = trimmed.strip_suffix('.').unwrap_or(trimmed);
    if dns.is_empty() {
        return Err(TlsError::InvalidServerName(host.to_string()));
    }
    ServerName::try_from(dns.to_string()).map_err(|_| TlsError::InvalidServerName(host.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    struct TestCert {
        cert_der: CertificateDer<'static>,
        cert_pem: String,
        key_der: PrivateKeyDer<'static>,
    }

    fn self_signed(host: &str) -> TestCert {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec![host.to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();
        TestCert {
            cert_der: cert.der().clone(),
            cert_pem: cert.pem(),
            key_der: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
        }
    }

    fn acceptor(cert: &TestCert) -> tokio_rustls::TlsAcceptor {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert.cert_der.clone()], cert.key_der.clone_key())
            .unwrap();
        tokio_rustls::TlsAcceptor::from(Arc::new(config))
    }

    async fn handshake(
        config: TlsConfig,
        cert: &TestCert,
        host: &str,
    ) -> Result<TlsStream<DuplexStream>, TlsError> {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let acceptor = acceptor(cert);
        let server = tokio::spawn(async move {
            if let Ok(mut stream) = acceptor.accept(server).await {
                let mut buf = [0u8; 4];
                if stream.read_exact(&mut buf).await.is_ok() {
                    let _ = stream.write_all(&buf).await;
                    let _ = stream.flush().await;
                }
            }
        });

        let result = TlsConnector::new(config).connect(host, client).await;
        if result.is_err() {
            server.abort();
        }
        result
    }

    #[test]
    fn test_server_name_dns() {
        assert!(matches!(
            server_name("ldap.example.com").unwrap(),
            ServerName::DnsName(_)
        ));
        assert!(matches!(
            server_name("ldap.example.com.").unwrap(),
            ServerName::DnsName(_)
        ));
    }

    #[test]
    fn test_server_name_ip() {
        assert!(matches!(
            server_name("127.0.0.1").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(
            server_name("[::1]").unwrap(),
            ServerName::IpAddress(_)
        ));
    }

    #[test]
    fn test_server_name_invalid() {
        assert!(matches!(
            server_name(""),
            Err(TlsError::InvalidServerName(_))
        ));
        assert!(matches!(
            server_name("bad host"),
            Err(TlsError::InvalidServerName(_))
        ));
    }

    #[tokio::test]
    async fn test_trusted_certificate_matching_host() {
        let cert = self_signed("localhost");
        let config = TlsConfig::builder()
            .ca_cert_pem(cert.cert_pem.clone())
            .build()
            .unwrap();

        let mut stream = handshake(config, &cert, "localhost").await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        stream.flush().await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_host_name_mismatch_is_rejected() {
        let cert = self_signed("localhost");
        let config = TlsConfig::builder()
            .ca_cert_pem(cert.cert_pem.clone())
            .build()
            .unwrap();

        let err = handshake(config, &cert, "ldap.example.com")
            .await
            .unwrap_err();
        assert!(err.is_certificate_rejected(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_host_name_mismatch_accepted_without_verification() {
        let cert = self_signed("localhost");
        let config = TlsConfig::builder()
            .ca_cert_pem(cert.cert_pem.clone())
            .verify_hostname(false)
            .build()
            .unwrap();

        assert!(handshake(config, &cert, "ldap.example.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_untrusted_certificate_is_rejected() {
        let cert = self_signed("localhost");
        let config = TlsConfig::builder().build().unwrap();

        let err = handshake(config, &cert, "localhost").await.unwrap_err();
        assert!(err.is_certificate_rejected(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_untrusted_certificate_is_rejected_without_host_verification() {
        let cert = self_signed("localhost");
        let config = TlsConfig::builder()
            .verify_hostname(false)
            .build()
            .unwrap();

        let err = handshake(config, &cert, "localhost").await.unwrap_err();
        assert!(err.is_certificate_rejected(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_danger_accepts_untrusted_certificate() {
        let cert = self_signed("localhost");
        let config = TlsConfig::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap();

        assert!(handshake(config, &cert, "other.example.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_configured_server_name_overrides_host() {
        let cert = self_signed("ldap.internal");
        let config = TlsConfig::builder()
            .ca_cert_pem(cert.cert_pem.clone())
            .server_name("ldap.internal")
            .build()
            .unwrap();

        assert!(handshake(config, &cert, "10.0.0.1").await.is_ok());
    }
}
