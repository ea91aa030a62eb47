//! SASL mechanisms (RFC 4422).
//!
//! A mechanism is a small state machine driven by the client's bind loop:
//!
//! 1. [`initial_response`](SaslMechanism::initial_response) produces the
//!    credentials for the first bind request, if the mechanism is
//!    client-first.
//! 2. Each `saslBindInProgress` response carries a server challenge that is
//!    fed to [`evaluate_challenge`](SaslMechanism::evaluate_challenge).
//! 3. On success, [`verify_final`](SaslMechanism::verify_final) checks any
//!    server credentials returned with the final response.
//!
//! Mechanisms are synchronous; none of them do I/O of their own.

mod cram_md5;
mod digest_md5;
mod external;
mod gssapi;

use std::fmt;

pub use cram_md5::CramMd5;
pub use digest_md5::DigestMd5;
pub use external::External;
pub use gssapi::Gssapi;

use crate::credentials::{Mechanism, SaslConfig};
use crate::error::AuthError;

/// Client side of a SASL mechanism.
pub trait SaslMechanism: Send + fmt::Debug {
    /// Registered mechanism name sent in the bind request.
    fn name(&self) -> &'static str;

    /// Credentials for the first bind request.
    fn initial_response(&mut self) -> Result<Option<Vec<u8>>, AuthError>;

    /// Compute the response to a server challenge.
    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>, AuthError>;

    /// Whether the client side of the exchange is finished.
    fn is_complete(&self) -> bool;

    /// Check the server credentials sent with a successful bind response.
    fn verify_final(&mut self, server_credentials: Option<&[u8]>) -> Result<(), AuthError> {
        let _ = server_credentials;
        Ok(())
    }
}

/// Create the mechanism described by `config` for a connection to `host`.
///
/// `host` is used to build the service principal for DIGEST-MD5 and
/// GSSAPI (`ldap/host`, `ldap@host`).
pub fn create_mechanism(
    config: &SaslConfig,
    host: &str,
) -> Result<Box<dyn SaslMechanism>, AuthError> {
    tracing::debug!(mechanism = %config.mechanism, host = host, "creating SASL mechanism");
    Ok(match config.mechanism {
        Mechanism::External => Box::new(External::new(config.authorization_id.clone())),
        Mechanism::CramMd5 => Box::new(CramMd5::new(
            required(&config.authentication_id, "authentication id")?,
            required(&config.credential, "credential")?,
        )),
        Mechanism::DigestMd5 => Box::new(DigestMd5::new(config, host)?),
        Mechanism::Gssapi => Box::new(Gssapi::new(config, host)?),
    })
}

fn required(value: &Option<String>, what: &'static str) -> Result<String, AuthError> {
    value
        .as_ref()
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or(AuthError::MissingCredential(what))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_by_mechanism() {
        let external = create_mechanism(&SaslConfig::external(), "ldap.example.com").unwrap();
        assert_eq!(external.name(), "EXTERNAL");

        let cram = create_mechanism(&SaslConfig::cram_md5("u", "p"), "ldap.example.com").unwrap();
        assert_eq!(cram.name(), "CRAM-MD5");

        let digest =
            create_mechanism(&SaslConfig::digest_md5("u", "p"), "ldap.example.com").unwrap();
        assert_eq!(digest.name(), "DIGEST-MD5");
    }

    #[test]
    fn test_missing_password() {
        let mut config = SaslConfig::cram_md5("user", "");
        config.credential = None;
        let err = create_mechanism(&config, "ldap.example.com").unwrap_err();
        assert!(matches!(err, AuthError::MissingCredential("credential")));

        let err = create_mechanism(&SaslConfig::cram_md5("user", ""), "h").unwrap_err();
        assert!(matches!(err, AuthError::MissingCredential("credential")));
    }

    #[cfg(not(feature = "gssapi"))]
    #[test]
    fn test_gssapi_unavailable_without_feature() {
        let err = create_mechanism(&SaslConfig::gssapi(), "ldap.example.com").unwrap_err();
        assert!(matches!(
            err,
            AuthError::MechanismUnavailable {
                mechanism: "GSSAPI",
                ..
            }
        ));
    }
}
