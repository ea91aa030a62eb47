//! SASL GSSAPI (RFC 4752) over Kerberos V5.
//!
//! Available with the `gssapi` feature. Credentials come from the default
//! Kerberos credential cache; the configured password is not used.

use super::SaslMechanism;
use crate::credentials::SaslConfig;
use crate::error::AuthError;

#[cfg(feature = "gssapi")]
pub use imp::Gssapi;

#[cfg(not(feature = "gssapi"))]
pub use unavailable::Gssapi;

#[cfg(feature = "gssapi")]
mod imp {
    use libgssapi::context::{ClientCtx, CtxFlags, SecurityContext};
    use libgssapi::credential::{Cred, CredUsage};
    use libgssapi::name::Name;
    use libgssapi::oid::{GSS_MECH_KRB5, GSS_NT_HOSTBASED_SERVICE, OidSet};

    use super::*;

    /// No security layer, as the only bit in the client's layer mask.
    const LAYER_NONE: u8 = 0x01;

    enum Stage {
        Context,
        SecurityLayer,
        Complete,
    }

    /// Kerberos V5 client.
    pub struct Gssapi {
        ctx: ClientCtx,
        authorization_id: Option<String>,
        stage: Stage,
    }

    impl Gssapi {
        /// Acquire default credentials and prepare a context for
        /// `ldap@host`.
        pub fn new(config: &SaslConfig, host: &str) -> Result<Self, AuthError> {
            let service = format!("ldap@{host}");
            let gss = |e: libgssapi::error::Error| AuthError::Gssapi(e.to_string());

            let name = Name::new(service.as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE))
                .and_then(|n| n.canonicalize(Some(&GSS_MECH_KRB5)))
                .map_err(gss)?;

            let mut mechs = OidSet::new().map_err(gss)?;
            mechs.add(&GSS_MECH_KRB5).map_err(gss)?;
            let cred =
                Cred::acquire(None, None, CredUsage::Initiate, Some(&mechs)).map_err(|e| {
                    AuthError::MechanismUnavailable {
                        mechanism: "GSSAPI",
                        reason: e.to_string(),
                    }
                })?;

            let mut flags = CtxFlags::GSS_C_INTEG_FLAG | CtxFlags::GSS_C_SEQUENCE_FLAG;
            if config.mutual_authentication {
                flags |= CtxFlags::GSS_C_MUTUAL_FLAG;
            }

            tracing::debug!(service = %service, "initialized GSSAPI context");

            Ok(Self {
                ctx: ClientCtx::new(Some(cred), name, flags, Some(&GSS_MECH_KRB5)),
                authorization_id: config.authorization_id.clone(),
                stage: Stage::Context,
            })
        }

        fn step(&mut self, token: Option<&[u8]>) -> Result<Vec<u8>, AuthError> {
            let out = self
                .ctx
                .step(token, None)
                .map_err(|e| AuthError::Gssapi(e.to_string()))?;
            if self.ctx.is_complete() {
                self.stage = Stage::SecurityLayer;
            }
            Ok(out.map(|b| b.to_vec()).unwrap_or_default())
        }

        // The server offers its layers and max buffer size; reply that no
        // security layer is used, followed by the authorization identity.
        fn negotiate_layer(&mut self, challenge: &[u8]) -> Result<Vec<u8>, AuthError> {
            let offer = self
                .ctx
                .unwrap(challenge)
                .map_err(|e| AuthError::Gssapi(e.to_string()))?;
            if offer.len() != 4 {
                return Err(AuthError::InvalidChallenge(format!(
                    "security layer offer has {} bytes",
                    offer.len()
                )));
            }
            if offer[0] & LAYER_NONE == 0 {
                return Err(AuthError::UnsupportedQop(
                    "server requires a GSSAPI security layer".into(),
                ));
            }

            let mut reply = vec![LAYER_NONE, 0, 0, 0];
            if let Some(authzid) = &self.authorization_id {
                reply.extend_from_slice(authzid.as_bytes());
            }
            let wrapped = self
                .ctx
                .wrap(false, &reply)
                .map_err(|e| AuthError::Gssapi(e.to_string()))?;
            self.stage = Stage::Complete;
            Ok(wrapped.to_vec())
        }
    }

    impl std::fmt::Debug for Gssapi {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Gssapi")
                .field("authorization_id", &self.authorization_id)
                .finish_non_exhaustive()
        }
    }

    impl SaslMechanism for Gssapi {
        fn name(&self) -> &'static str {
            "GSSAPI"
        }

        fn initial_response(&mut self) -> Result<Option<Vec<u8>>, AuthError> {
            self.step(None).map(Some)
        }

        fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>, AuthError> {
            match self.stage {
                Stage::Context => self.step(Some(challenge)),
                Stage::SecurityLayer => self.negotiate_layer(challenge),
                Stage::Complete => Err(AuthError::UnexpectedChallenge {
                    mechanism: "GSSAPI",
                }),
            }
        }

        fn is_complete(&self) -> bool {
            matches!(self.stage, Stage::Complete)
        }
    }
}

#[cfg(not(feature = "gssapi"))]
mod unavailable {
    use super::*;

    /// Placeholder used when the `gssapi` feature is disabled.
    #[derive(Debug)]
    pub struct Gssapi {
        _private: (),
    }

    impl Gssapi {
        /// Always fails: GSSAPI support was not compiled in.
        pub fn new(_config: &SaslConfig, _host: &str) -> Result<Self, AuthError> {
            Err(AuthError::MechanismUnavailable {
                mechanism: "GSSAPI",
                reason: "built without the `gssapi` feature".into(),
            })
        }
    }

    impl SaslMechanism for Gssapi {
        fn name(&self) -> &'static str {
            "GSSAPI"
        }

        fn initial_response(&mut self) -> Result<Option<Vec<u8>>, AuthError> {
            Ok(None)
        }

        fn evaluate_challenge(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, AuthError> {
            Err(AuthError::UnexpectedChallenge {
                mechanism: "GSSAPI",
            })
        }

        fn is_complete(&self) -> bool {
            false
        }
    }
}
