//! Bind credentials.

use std::fmt;
use std::str::FromStr;

use crate::error::AuthError;

/// SASL mechanisms supported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// Identity established by the transport, e.g. a TLS client certificate.
    External,
    /// Challenge-response with HMAC-MD5 (RFC 2195).
    CramMd5,
    /// HTTP digest style challenge-response (RFC 2831).
    DigestMd5,
    /// Kerberos V5 via GSSAPI (RFC 4752).
    Gssapi,
}

impl Mechanism {
    /// Registered SASL mechanism name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::External => "EXTERNAL",
            Self::CramMd5 => "CRAM-MD5",
            Self::DigestMd5 => "DIGEST-MD5",
            Self::Gssapi => "GSSAPI",
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mechanism {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "EXTERNAL" => Ok(Self::External),
            "CRAM-MD5" => Ok(Self::CramMd5),
            "DIGEST-MD5" => Ok(Self::DigestMd5),
            "GSSAPI" => Ok(Self::Gssapi),
            _ => Err(AuthError::UnsupportedMechanism(s.to_string())),
        }
    }
}

/// SASL quality of protection.
///
/// Only `Auth` (authentication without a security layer) is negotiated by
/// the mechanisms in this crate; integrity and confidentiality layers are
/// expected to come from TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityOfProtection {
    /// Authentication only.
    Auth,
    /// Authentication with integrity protection.
    AuthInt,
    /// Authentication with integrity and confidentiality protection.
    AuthConf,
}

impl QualityOfProtection {
    /// Token used in SASL negotiation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::AuthInt => "auth-int",
            Self::AuthConf => "auth-conf",
        }
    }
}

impl FromStr for QualityOfProtection {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "auth" => Ok(Self::Auth),
            "auth-int" => Ok(Self::AuthInt),
            "auth-conf" => Ok(Self::AuthConf),
            _ => Err(AuthError::UnsupportedQop(s.to_string())),
        }
    }
}

/// Requested cipher strength for mechanisms with a security layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityStrength {
    /// Strong ciphers only.
    High,
    /// Medium strength ciphers.
    Medium,
    /// Any cipher.
    Low,
}

impl FromStr for SecurityStrength {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(AuthError::Configuration(format!(
                "unknown security strength: {s}"
            ))),
        }
    }
}

/// SASL bind configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct SaslConfig {
    /// Mechanism to use.
    pub mechanism: Mechanism,
    /// Authentication identity (user name).
    pub authentication_id: Option<String>,
    /// Shared secret for password based mechanisms.
    pub credential: Option<String>,
    /// Identity to act as once authenticated.
    pub authorization_id: Option<String>,
    /// Realm for DIGEST-MD5.
    pub realm: Option<String>,
    /// Acceptable qualities of protection, in order of preference.
    pub qop: Vec<QualityOfProtection>,
    /// Requested security strength.
    pub security_strength: Option<SecurityStrength>,
    /// Require the server to authenticate itself.
    pub mutual_authentication: bool,
}

impl SaslConfig {
    /// Create a configuration for `mechanism` with nothing else set.
    pub fn new(mechanism: Mechanism) -> Self {
        Self {
            mechanism,
            authentication_id: None,
            credential: None,
            authorization_id: None,
            realm: None,
            qop: Vec::new(),
            security_strength: None,
            mutual_authentication: false,
        }
    }

    /// SASL EXTERNAL, optionally asserting an authorization identity.
    pub fn external() -> Self {
        Self::new(Mechanism::External)
    }

    /// CRAM-MD5 with a user name and password.
    pub fn cram_md5(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(Mechanism::CramMd5).with_credentials(user, password)
    }

    /// DIGEST-MD5 with a user name and password.
    pub fn digest_md5(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(Mechanism::DigestMd5).with_credentials(user, password)
    }

    /// GSSAPI using the default Kerberos credential cache.
    pub fn gssapi() -> Self {
        Self::new(Mechanism::Gssapi)
    }

    /// Set the authentication identity and secret.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.authentication_id = Some(user.into());
        self.credential = Some(password.into());
        self
    }

    /// Set the authorization identity.
    #[must_use]
    pub fn with_authorization_id(mut self, id: impl Into<String>) -> Self {
        self.authorization_id = Some(id.into());
        self
    }

    /// Set the realm.
    #[must_use]
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Set the acceptable qualities of protection.
    #[must_use]
    pub fn with_qop(mut self, qop: impl IntoIterator<Item = QualityOfProtection>) -> Self {
        self.qop = qop.into_iter().collect();
        self
    }

    /// Set the requested security strength.
    #[must_use]
    pub fn with_security_strength(mut self, strength: SecurityStrength) -> Self {
        self.security_strength = Some(strength);
        self
    }

    /// Require mutual authentication.
    #[must_use]
    pub fn with_mutual_authentication(mut self, enabled: bool) -> Self {
        self.mutual_authentication = enabled;
        self
    }
}

impl fmt::Debug for SaslConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslConfig")
            .field("mechanism", &self.mechanism)
            .field("authentication_id", &self.authentication_id)
            .field("credential", &self.credential.as_ref().map(|_| "[REDACTED]"))
            .field("authorization_id", &self.authorization_id)
            .field("realm", &self.realm)
            .field("qop", &self.qop)
            .field("security_strength", &self.security_strength)
            .field("mutual_authentication", &self.mutual_authentication)
            .finish()
    }
}

/// Credentials used to bind a connection.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    /// Anonymous bind (no bind request is sent).
    #[default]
    Anonymous,
    /// Simple bind with a DN and password.
    Simple {
        /// Bind DN.
        dn: String,
        /// Password.
        password: String,
    },
    /// SASL bind.
    Sasl(SaslConfig),
}

impl Credentials {
    /// Anonymous credentials.
    pub fn anonymous() -> Self {
        Self::Anonymous
    }

    /// Simple bind credentials.
    pub fn simple(dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Simple {
            dn: dn.into(),
            password: password.into(),
        }
    }

    /// SASL bind credentials.
    pub fn sasl(config: SaslConfig) -> Self {
        Self::Sasl(config)
    }

    /// Whether these are anonymous credentials.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// Authentication method name, for logging.
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Simple { .. } => "simple",
            Self::Sasl(config) => config.mechanism.as_str(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Simple { dn, .. } => f
                .debug_struct("Simple")
                .field("dn", dn)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::Sasl(config) => f.debug_tuple("Sasl").field(config).finish(),
        }
    }
}

#[cfg(feature = "zeroize")]
impl Drop for SaslConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        if let Some(credential) = self.credential.as_mut() {
            credential.zeroize();
        }
    }
}

#[cfg(feature = "zeroize")]
impl Drop for Credentials {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        if let Self::Simple { password, .. } = self {
            password.zeroize();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mechanism_names() {
        assert_eq!("cram-md5".parse::<Mechanism>().unwrap(), Mechanism::CramMd5);
        assert_eq!("DIGEST_MD5".parse::<Mechanism>().unwrap(), Mechanism::DigestMd5);
        assert_eq!("EXTERNAL".parse::<Mechanism>().unwrap(), Mechanism::External);
        assert_eq!("gssapi".parse::<Mechanism>().unwrap(), Mechanism::Gssapi);
        assert!(matches!(
            "PLAIN".parse::<Mechanism>(),
            Err(AuthError::UnsupportedMechanism(_))
        ));
        assert_eq!(Mechanism::DigestMd5.to_string(), "DIGEST-MD5");
    }

    #[test]
    fn test_qop_parse() {
        assert_eq!(
            "auth-int".parse::<QualityOfProtection>().unwrap(),
            QualityOfProtection::AuthInt
        );
        assert_eq!(
            "AUTH_CONF".parse::<QualityOfProtection>().unwrap(),
            QualityOfProtection::AuthConf
        );
        assert!("privacy".parse::<QualityOfProtection>().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let simple = Credentials::simple("cn=admin,dc=example,dc=com", "hunter2");
        let debug = format!("{simple:?}");
        assert!(debug.contains("cn=admin"));
        assert!(!debug.contains("hunter2"));

        let sasl = Credentials::sasl(SaslConfig::digest_md5("user", "hunter2"));
        assert!(!format!("{sasl:?}").contains("hunter2"));
    }

    #[test]
    fn test_method_name() {
        assert_eq!(Credentials::anonymous().method_name(), "anonymous");
        assert_eq!(Credentials::simple("cn=a", "b").method_name(), "simple");
        assert_eq!(
            Credentials::sasl(SaslConfig::external()).method_name(),
            "EXTERNAL"
        );
        assert!(Credentials::default().is_anonymous());
    }
}
