//! TLS error types.

use thiserror::Error;

/// Errors that can occur while configuring or negotiating TLS.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TlsError {
    /// Invalid TLS configuration.
    #[error("TLS configuration error: {0}")]
    Configuration(String),

    /// Certificate or key material could not be loaded.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// The host cannot be used as a TLS server name.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// The TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    /// Error reported by rustls while building a configuration.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}

impl TlsError {
    /// Whether the handshake failed because the peer certificate was rejected.
    pub fn is_certificate_rejected(&self) -> bool {
        match self {
            Self::Handshake(io) => io
                .get_ref()
                .and_then(|e| e.downcast_ref::<rustls::Error>())
                .is_some_and(|e| matches!(e, rustls::Error::InvalidCertificate(_))),
            Self::Rustls(rustls::Error::InvalidCertificate(_)) => true,
            _ => false,
        }
    }
}
