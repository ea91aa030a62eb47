//! TLS configuration.
//!
//! Server certificates are validated against the Mozilla root set (via
//! `webpki-roots`) unless custom CA material is supplied. Host name
//! verification is on by default and must be switched off explicitly.

use std::fmt;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::ServerCertVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::error::TlsError;
use crate::verifier::{NoVerifier, SkipHostnameVerifier};

/// Where trusted CA certificates come from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CaSource {
    WebPkiRoots,
    PemFile(PathBuf),
    PemBytes,
}

/// Immutable TLS configuration with a compiled rustls `ClientConfig`.
///
/// # Example
///
/// ```rust,ignore
/// use ldapkit_tls::TlsConfig;
///
/// let tls = TlsConfig::builder()
///     .ca_cert_path("/etc/ldap/ca.pem")
///     .build()?;
/// ```
#[derive(Clone)]
pub struct TlsConfig {
    ca_source: CaSource,
    verify_hostname: bool,
    danger_accept_invalid_certs: bool,
    server_name: Option<String>,
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Create a new TLS configuration builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Get the rustls `ClientConfig`.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.client_config)
    }

    /// Whether the certificate must match the server host name.
    pub fn verify_hostname(&self) -> bool {
        self.verify_hostname
    }

    /// Whether certificate validation is disabled entirely.
    pub fn danger_accept_invalid_certs(&self) -> bool {
        self.danger_accept_invalid_certs
    }

    /// Name sent for SNI and checked against the certificate instead of the
    /// connection host.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("ca_source", &self.ca_source)
            .field("verify_hostname", &self.verify_hostname)
            .field(
                "danger_accept_invalid_certs",
                &self.danger_accept_invalid_certs,
            )
            .field("server_name", &self.server_name)
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

/// Builder for [`TlsConfig`].
#[derive(Debug, Clone)]
pub struct TlsConfigBuilder {
    ca_cert_path: Option<PathBuf>,
    ca_cert_pem: Option<Vec<u8>>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
    verify_hostname: bool,
    danger_accept_invalid_certs: bool,
    server_name: Option<String>,
}

impl Default for TlsConfigBuilder {
    fn default() -> Self {
        Self {
            ca_cert_path: None,
            ca_cert_pem: None,
            client_cert_path: None,
            client_key_path: None,
            verify_hostname: true,
            danger_accept_invalid_certs: false,
            server_name: None,
        }
    }
}

impl TlsConfigBuilder {
    /// Trust the CA certificates in a PEM file instead of the default roots.
    #[must_use]
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Trust the CA certificates in PEM data instead of the default roots.
    #[must_use]
    pub fn ca_cert_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_cert_pem = Some(pem.into());
        self
    }

    /// Present a client certificate, e.g. for SASL EXTERNAL.
    #[must_use]
    pub fn client_cert(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    /// Enable or disable host name verification (default: enabled).
    ///
    /// With verification disabled the chain is still validated against the
    /// trusted roots.
    #[must_use]
    pub fn verify_hostname(mut self, verify: bool) -> Self {
        self.verify_hostname = verify;
        self
    }

    /// Accept any server certificate. For tests against self-signed servers
    /// only.
    #[must_use]
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.danger_accept_invalid_certs = accept;
        self
    }

    /// Verify the certificate against this name instead of the URL host.
    #[must_use]
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let (roots, ca_source) = match (&self.ca_cert_path, &self.ca_cert_pem) {
            (Some(_), Some(_)) => {
                return Err(TlsError::Configuration(
                    "ca_cert_path and ca_cert_pem are mutually exclusive".into(),
                ));
            }
            (Some(path), None) => {
                let pem = std::fs::read(path).map_err(|e| {
                    TlsError::Certificate(format!(
                        "failed to read CA certificate file '{}': {e}",
                        path.display()
                    ))
                })?;
                (root_store_from_pem(&pem)?, CaSource::PemFile(path.clone()))
            }
            (None, Some(pem)) => (root_store_from_pem(pem)?, CaSource::PemBytes),
            (None, None) => {
                let mut store = RootCertStore::empty();
                store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                (store, CaSource::WebPkiRoots)
            }
        };

        let verifier: Arc<dyn ServerCertVerifier> = if self.danger_accept_invalid_certs {
            tracing::warn!("TLS certificate validation is disabled");
            Arc::new(NoVerifier::new(Arc::clone(&provider)))
        } else {
            let webpki =
                WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
                    .build()
                    .map_err(|e| TlsError::Configuration(e.to_string()))?;
            if self.verify_hostname {
                webpki
            } else {
                tracing::warn!("TLS host name verification is disabled");
                Arc::new(SkipHostnameVerifier::new(webpki))
            }
        };

        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let client_config = match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert), Some(key)) => {
                builder.with_client_auth_cert(load_certs(cert)?, load_private_key(key)?)?
            }
            _ => builder.with_no_client_auth(),
        };

        Ok(TlsConfig {
            ca_source,
            verify_hostname: self.verify_hostname,
            danger_accept_invalid_certs: self.danger_accept_invalid_certs,
            server_name: self.server_name,
            client_config: Arc::new(client_config),
        })
    }
}

fn root_store_from_pem(pem: &[u8]) -> Result<RootCertStore, TlsError> {
    let certs = parse_certs(pem)?;
    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs);
    if ignored > 0 {
        tracing::warn!(ignored, "ignored unparsable CA certificates");
    }
    if added == 0 {
        return Err(TlsError::Certificate(
            "no valid CA certificates found".into(),
        ));
    }
    Ok(store)
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = BufReader::new(pem);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(format!("failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(TlsError::Certificate("no certificates found".into()));
    }
    Ok(certs)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = std::fs::read(path).map_err(|e| {
        TlsError::Certificate(format!(
            "failed to read certificate file '{}': {e}",
            path.display()
        ))
    })?;
    parse_certs(&pem)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let pem = std::fs::read(path).map_err(|e| {
        TlsError::Certificate(format!("failed to read key file '{}': {e}", path.display()))
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(pem.as_slice()))
        .map_err(|e| TlsError::Certificate(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| {
            TlsError::Certificate(format!("no private key found in '{}'", path.display()))
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = TlsConfigBuilder::default();
        assert!(builder.verify_hostname);
        assert!(!builder.danger_accept_invalid_certs);
        assert!(builder.ca_cert_path.is_none());
    }

    #[test]
    fn test_default_build_uses_webpki_roots() {
        let tls = TlsConfig::builder().build().unwrap();
        assert!(tls.verify_hostname());
        assert!(!tls.danger_accept_invalid_certs());
        assert_eq!(tls.ca_source, CaSource::WebPkiRoots);
    }

    #[test]
    fn test_danger_build() {
        let tls = TlsConfig::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap();
        assert!(tls.danger_accept_invalid_certs());
    }

    #[test]
    fn test_invalid_pem_is_rejected() {
        let err = TlsConfig::builder()
            .ca_cert_pem(b"not a certificate".to_vec())
            .build()
            .unwrap_err();
        assert!(matches!(err, TlsError::Certificate(_)));
    }

    #[test]
    fn test_missing_ca_file_is_rejected() {
        let err = TlsConfig::builder()
            .ca_cert_path("/nonexistent/ca.pem")
            .build()
            .unwrap_err();
        assert!(matches!(err, TlsError::Certificate(_)));
    }

    #[test]
    fn test_conflicting_ca_sources() {
        let err = TlsConfig::builder()
            .ca_cert_path("/tmp/ca.pem")
            .ca_cert_pem(Vec::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, TlsError::Configuration(_)));
    }

    #[test]
    fn test_debug_hides_client_config() {
        let tls = TlsConfig::builder().build().unwrap();
        let debug = format!("{tls:?}");
        assert!(debug.contains("verify_hostname: true"));
        assert!(debug.contains("<ClientConfig>"));
    }
}
