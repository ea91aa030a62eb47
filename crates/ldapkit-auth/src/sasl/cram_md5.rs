//! SASL CRAM-MD5 (RFC 2195).

use hmac::{Hmac, Mac};
use md5::Md5;

use super::SaslMechanism;
use crate::error::AuthError;

type HmacMd5 = Hmac<Md5>;

/// Keyed-MD5 challenge-response.
///
/// The server sends a challenge; the client answers with its user name and
/// the hex HMAC-MD5 of the challenge keyed with the password.
pub struct CramMd5 {
    user: String,
    password: String,
    complete: bool,
}

impl CramMd5 {
    /// Create the mechanism for `user` with `password`.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            complete: false,
        }
    }
}

impl std::fmt::Debug for CramMd5 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CramMd5")
            .field("user", &self.user)
            .field("complete", &self.complete)
            .finish_non_exhaustive()
    }
}

impl SaslMechanism for CramMd5 {
    fn name(&self) -> &'static str {
        "CRAM-MD5"
    }

    fn initial_response(&mut self) -> Result<Option<Vec<u8>>, AuthError> {
        Ok(None)
    }

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>, AuthError> {
        if self.complete {
            return Err(AuthError::UnexpectedChallenge {
                mechanism: "CRAM-MD5",
            });
        }
        if challenge.is_empty() {
            return Err(AuthError::InvalidChallenge("empty CRAM-MD5 challenge".into()));
        }

        let mut mac = HmacMd5::new_from_slice(self.password.as_bytes())
            .map_err(|e| AuthError::InvalidChallenge(e.to_string()))?;
        mac.update(challenge);
        let digest = hex::encode(mac.finalize().into_bytes());

        self.complete = true;
        Ok(format!("{} {digest}", self.user).into_bytes())
    }

    fn is_complete(&self) -> bool {
        self.complete
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc2195_example() {
        let mut mech = CramMd5::new("tim", "tanstaaftanstaaf");
        assert_eq!(mech.initial_response().unwrap(), None);
        let response = mech
            .evaluate_challenge(b"<1896.697170952@postoffice.reston.mci.net>")
            .unwrap();
        assert_eq!(
            String::from_utf8(response).unwrap(),
            "tim b913a602c7eda7a495b4e6e7334d3890"
        );
        assert!(mech.is_complete());
    }

    #[test]
    fn test_second_challenge_is_rejected() {
        let mut mech = CramMd5::new("tim", "tanstaaftanstaaf");
        mech.evaluate_challenge(b"<1@host>").unwrap();
        assert!(matches!(
            mech.evaluate_challenge(b"<2@host>"),
            Err(AuthError::UnexpectedChallenge { .. })
        ));
    }

    #[test]
    fn test_debug_hides_password() {
        let mech = CramMd5::new("tim", "tanstaaftanstaaf");
        assert!(!format!("{mech:?}").contains("tanstaaf"));
    }
}
