//! Client error types.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ldap_protocol::{Control, LdapResult, ProtocolError, ResultCode};
use ldapkit_auth::AuthError;
use ldapkit_codec::CodecError;
use ldapkit_tls::TlsError;
use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of a [`ConnectionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionErrorKind {
    /// Socket level failure.
    Network,
    /// A connect, handshake or response deadline passed.
    Timeout,
    /// TLS configuration, negotiation or StartTLS failure.
    Tls,
    /// The bind was rejected or the SASL exchange failed.
    Authentication,
    /// The peer sent something that is not valid LDAP.
    Protocol,
    /// The connection is closed.
    Closed,
    /// No usable endpoint was configured.
    Configuration,
}

/// Errors establishing or using a connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// Socket level failure.
    #[error("network error on {url}: {source}")]
    Network {
        /// Endpoint that failed.
        url: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A deadline passed.
    #[error("{during} timed out after {elapsed:?}")]
    Timeout {
        /// What was being waited for.
        during: &'static str,
        /// The configured deadline.
        elapsed: Duration,
    },

    /// TLS failure.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// The server refused the StartTLS extended operation.
    #[error("StartTLS rejected: {code}: {message}")]
    StartTlsRejected {
        /// Result code.
        code: ResultCode,
        /// Diagnostic message.
        message: String,
    },

    /// The server rejected the bind.
    #[error("bind failed: {code}: {message}")]
    BindFailed {
        /// Result code.
        code: ResultCode,
        /// Diagnostic message.
        message: String,
    },

    /// The SASL exchange failed on the client side.
    #[error(transparent)]
    Sasl(#[from] AuthError),

    /// Framing or decoding failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The server answered with an unexpected operation.
    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// Expected operation.
        expected: &'static str,
        /// Received operation.
        actual: &'static str,
    },

    /// The connection is closed.
    #[error("connection closed{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed {
        /// Why, when the server said so.
        reason: Option<String>,
    },

    /// No endpoint is configured, or every endpoint failed.
    #[error("no LDAP endpoint available")]
    NoEndpoints,
}

impl ConnectionError {
    /// Broad category of this error.
    pub fn kind(&self) -> ConnectionErrorKind {
        match self {
            Self::Network { .. } => ConnectionErrorKind::Network,
            Self::Timeout { .. } => ConnectionErrorKind::Timeout,
            Self::Tls(_) | Self::StartTlsRejected { .. } => ConnectionErrorKind::Tls,
            Self::BindFailed { .. } | Self::Sasl(_) => ConnectionErrorKind::Authentication,
            Self::Codec(CodecError::Io(_)) => ConnectionErrorKind::Network,
            Self::Codec(CodecError::ConnectionClosed) => ConnectionErrorKind::Closed,
            Self::Codec(_) | Self::UnexpectedResponse { .. } => ConnectionErrorKind::Protocol,
            Self::Closed { .. } => ConnectionErrorKind::Closed,
            Self::NoEndpoints => ConnectionErrorKind::Configuration,
        }
    }

    /// Whether trying the next endpoint (or again later) could succeed.
    ///
    /// TLS and authentication failures are not retryable: every endpoint
    /// would reject the same material.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ConnectionErrorKind::Network | ConnectionErrorKind::Timeout | ConnectionErrorKind::Closed
        )
    }

    pub(crate) fn closed() -> Self {
        Self::Closed { reason: None }
    }
}

/// A non-success LDAP result.
#[derive(Clone, Error)]
#[error("{code}: {message}")]
pub struct OperationError {
    /// Result code.
    pub code: ResultCode,
    /// Matched DN.
    pub matched_dn: String,
    /// Diagnostic message.
    pub message: String,
    /// Referral URIs.
    pub referrals: Vec<String>,
    /// Decoded response controls.
    pub controls: Vec<Arc<dyn Control>>,
}

impl OperationError {
    /// Build from a result and its response controls.
    pub fn new(result: LdapResult, controls: Vec<Arc<dyn Control>>) -> Self {
        Self {
            code: result.code,
            matched_dn: result.matched_dn,
            message: result.diagnostic_message,
            referrals: result.referrals,
            controls,
        }
    }
}

impl fmt::Debug for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationError")
            .field("code", &self.code)
            .field("matched_dn", &self.matched_dn)
            .field("message", &self.message)
            .field("referrals", &self.referrals)
            .field("controls", &self.controls.len())
            .finish()
    }
}

/// Errors returned by client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Connection establishment or transport failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The server returned a non-success result.
    #[error("operation failed: {0}")]
    Operation(OperationError),

    /// No codec is registered for a control.
    #[error("unsupported control: {oid}")]
    UnsupportedControl {
        /// OID of the control.
        oid: String,
    },

    /// Encoding or decoding failure.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The request is invalid and was not sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A connection pool could not supply a connection.
    #[error("pool error: {0}")]
    Pool(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Whether this is a transient failure worth retrying on a new
    /// connection.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_retryable(),
            Self::Operation(e) => matches!(e.code, ResultCode::Busy | ResultCode::Unavailable),
            _ => false,
        }
    }

    /// Whether the connection that produced this error is no longer usable.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Self::Connection(ConnectionError::Codec(e)) => e.is_fatal(),
            Self::Connection(_) => true,
            _ => false,
        }
    }

    /// Result code, if the server returned one.
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            Self::Operation(e) => Some(e.code),
            Self::Connection(ConnectionError::BindFailed { code, .. }) => Some(*code),
            _ => None,
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::UnsupportedControl { oid } => Self::UnsupportedControl { oid },
            other => Self::Protocol(other),
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Connection(ConnectionError::Codec(e))
    }
}

impl From<OperationError> for Error {
    fn from(e: OperationError) -> Self {
        Self::Operation(e)
    }
}
