//! Authentication error types.

use thiserror::Error;

/// Errors that can occur while preparing or running an authentication
/// exchange.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// A value the mechanism needs was not configured.
    #[error("missing {0} for SASL authentication")]
    MissingCredential(&'static str),

    /// A configuration value could not be parsed.
    #[error("invalid SASL configuration: {0}")]
    Configuration(String),

    /// The mechanism name is not known.
    #[error("unsupported SASL mechanism: {0}")]
    UnsupportedMechanism(String),

    /// The mechanism is known but not available in this build or on this
    /// host.
    #[error("SASL mechanism {mechanism} is unavailable: {reason}")]
    MechanismUnavailable {
        /// Mechanism name.
        mechanism: &'static str,
        /// Why it is unavailable.
        reason: String,
    },

    /// None of the requested qualities of protection can be negotiated.
    #[error("unsupported quality of protection: {0}")]
    UnsupportedQop(String),

    /// The server sent a challenge the mechanism cannot parse.
    #[error("invalid server challenge: {0}")]
    InvalidChallenge(String),

    /// The server sent a challenge after the exchange completed.
    #[error("unexpected challenge for completed {mechanism} exchange")]
    UnexpectedChallenge {
        /// Mechanism name.
        mechanism: &'static str,
    },

    /// The server failed to prove knowledge of the shared secret.
    #[error("server authentication failed: {0}")]
    ServerVerification(String),

    /// Error reported by the GSSAPI library.
    #[error("GSSAPI error: {0}")]
    Gssapi(String),
}
