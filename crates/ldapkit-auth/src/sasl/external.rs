//! SASL EXTERNAL (RFC 4422 appendix A).

use super::SaslMechanism;
use crate::error::AuthError;

/// Authentication by an identity the transport already established,
/// typically a TLS client certificate.
#[derive(Debug, Clone)]
pub struct External {
    authorization_id: Option<String>,
    sent: bool,
}

impl External {
    /// Create the mechanism, optionally requesting an authorization id.
    pub fn new(authorization_id: Option<String>) -> Self {
        Self {
            authorization_id,
            sent: false,
        }
    }
}

impl SaslMechanism for External {
    fn name(&self) -> &'static str {
        "EXTERNAL"
    }

    fn initial_response(&mut self) -> Result<Option<Vec<u8>>, AuthError> {
        self.sent = true;
        Ok(self
            .authorization_id
            .as_ref()
            .map(|id| id.as_bytes().to_vec()))
    }

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>, AuthError> {
        // Some servers send an empty challenge before accepting.
        if challenge.is_empty() && self.sent {
            return Ok(Vec::new());
        }
        Err(AuthError::UnexpectedChallenge {
            mechanism: "EXTERNAL",
        })
    }

    fn is_complete(&self) -> bool {
        self.sent
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_without_authorization_id() {
        let mut mech = External::new(None);
        assert!(!mech.is_complete());
        assert_eq!(mech.initial_response().unwrap(), None);
        assert!(mech.is_complete());
    }

    #[test]
    fn test_with_authorization_id() {
        let mut mech = External::new(Some("dn:cn=proxy,dc=example,dc=com".into()));
        assert_eq!(
            mech.initial_response().unwrap().unwrap(),
            b"dn:cn=proxy,dc=example,dc=com"
        );
    }

    #[test]
    fn test_rejects_non_empty_challenge() {
        let mut mech = External::new(None);
        mech.initial_response().unwrap();
        assert!(mech.evaluate_challenge(b"").unwrap().is_empty());
        assert!(mech.evaluate_challenge(b"x").is_err());
    }
}
