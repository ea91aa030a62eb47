//! Connection configuration.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ldap_protocol::Control;
use ldapkit_auth::{Credentials, Mechanism, QualityOfProtection, SaslConfig, SecurityStrength};
use ldapkit_codec::DEFAULT_MAX_MESSAGE_SIZE;
use ldapkit_tls::TlsConfig;
use percent_encoding::percent_decode_str;

use crate::error::Error;

/// Default port for `ldap://`.
pub const DEFAULT_LDAP_PORT: u16 = 389;
/// Default port for `ldaps://`.
pub const DEFAULT_LDAPS_PORT: u16 = 636;
/// Socket used for `ldapi:///` without a path.
pub const DEFAULT_LDAPI_PATH: &str = "/var/run/ldapi";

/// URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain TCP, optionally upgraded with StartTLS.
    Ldap,
    /// TLS from the first byte.
    Ldaps,
    /// Unix domain socket.
    Ldapi,
}

impl Scheme {
    /// Scheme name as used in URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ldap => "ldap",
            Self::Ldaps => "ldaps",
            Self::Ldapi => "ldapi",
        }
    }
}

/// Where an endpoint lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Host and port.
    Tcp {
        /// Host name or IP address, without brackets.
        host: String,
        /// Port.
        port: u16,
    },
    /// Unix socket path.
    Unix(String),
}

/// A parsed LDAP URL. Only scheme and host part are used; any DN, attribute
/// or filter parts are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LdapUrl {
    /// Scheme.
    pub scheme: Scheme,
    /// Endpoint.
    pub endpoint: Endpoint,
}

impl LdapUrl {
    /// Parse an `ldap://`, `ldaps://` or `ldapi://` URL.
    pub fn parse(url: &str) -> Result<Self, Error> {
        let url = url.trim();
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::Config(format!("invalid LDAP URL: {url}")))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "ldap" => Scheme::Ldap,
            "ldaps" => Scheme::Ldaps,
            "ldapi" => Scheme::Ldapi,
            other => return Err(Error::Config(format!("unsupported URL scheme: {other}"))),
        };

        let authority = rest.split(['/', '?']).next().unwrap_or_default();

        if scheme == Scheme::Ldapi {
            let path = if authority.is_empty() {
                DEFAULT_LDAPI_PATH.to_string()
            } else {
                percent_decode_str(authority)
                    .decode_utf8()
                    .map_err(|_| Error::Config(format!("invalid socket path in {url}")))?
                    .into_owned()
            };
            return Ok(Self {
                scheme,
                endpoint: Endpoint::Unix(path),
            });
        }

        let default_port = if scheme == Scheme::Ldaps {
            DEFAULT_LDAPS_PORT
        } else {
            DEFAULT_LDAP_PORT
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| Error::Config(format!("unterminated IPv6 address in {url}")))?;
            let port = match after.strip_prefix(':') {
                Some(p) => parse_port(p, url)?,
                None if after.is_empty() => default_port,
                None => return Err(Error::Config(format!("invalid host in {url}"))),
            };
            (host.to_string(), port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host.to_string(), parse_port(port, url)?),
                None => (authority.to_string(), default_port),
            }
        };

        let host = if host.is_empty() {
            "localhost".to_string()
        } else {
            host
        };

        Ok(Self {
            scheme,
            endpoint: Endpoint::Tcp { host, port },
        })
    }

    /// Host name, for TCP endpoints.
    pub fn host(&self) -> Option<&str> {
        match &self.endpoint {
            Endpoint::Tcp { host, .. } => Some(host),
            Endpoint::Unix(_) => None,
        }
    }

    /// Whether TLS starts immediately after connecting.
    pub fn is_ldaps(&self) -> bool {
        self.scheme == Scheme::Ldaps
    }
}

fn parse_port(port: &str, url: &str) -> Result<u16, Error> {
    port.parse()
        .map_err(|_| Error::Config(format!("invalid port in {url}")))
}

impl FromStr for LdapUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LdapUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            Endpoint::Tcp { host, port } if host.contains(':') => {
                write!(f, "{}://[{host}]:{port}", self.scheme.as_str())
            }
            Endpoint::Tcp { host, port } => write!(f, "{}://{host}:{port}", self.scheme.as_str()),
            Endpoint::Unix(path) => write!(
                f,
                "ldapi://{}",
                percent_encoding::utf8_percent_encode(path, percent_encoding::NON_ALPHANUMERIC)
            ),
        }
    }
}

/// Order in which endpoints are tried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FailoverStrategy {
    /// Always start with the first URL.
    #[default]
    Ordered,
    /// Start one URL further along on each connect.
    RoundRobin,
    /// Random order on each connect.
    Random,
}

impl FromStr for FailoverStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "ordered" | "default" | "active" => Ok(Self::Ordered),
            "roundrobin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            other => Err(Error::Config(format!("unknown failover strategy: {other}"))),
        }
    }
}

/// Configuration for connecting to an LDAP server.
///
/// Once handed to a [`TransportFactory`](crate::TransportFactory) the
/// configuration is shared behind an `Arc` and cannot change.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Endpoints, tried according to `failover`.
    pub urls: Vec<LdapUrl>,

    /// Timeout for establishing a connection, including TLS.
    pub connect_timeout: Duration,

    /// Timeout waiting for each response. `None` waits forever.
    pub response_timeout: Option<Duration>,

    /// Bind credentials.
    pub credentials: Credentials,

    /// Controls sent with every bind request.
    pub bind_controls: Vec<Arc<dyn Control>>,

    /// TLS configuration for `ldaps://` and StartTLS.
    pub tls: Option<TlsConfig>,

    /// Issue StartTLS on plain `ldap://` connections.
    pub use_start_tls: bool,

    /// Endpoint ordering.
    pub failover: FailoverStrategy,

    /// Largest accepted response message.
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            connect_timeout: Duration::from_secs(30),
            response_timeout: None,
            credentials: Credentials::Anonymous,
            bind_controls: Vec::new(),
            tls: None,
            use_start_tls: false,
            failover: FailoverStrategy::Ordered,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ConnectionConfig {
    /// Create a configuration for a single URL.
    pub fn new(url: &str) -> Result<Self, Error> {
        Ok(Self {
            urls: vec![LdapUrl::parse(url)?],
            ..Self::default()
        })
    }

    /// Parse a `key=value;key=value` property string.
    ///
    /// ```text
    /// ldap_url=ldap://a.example.com ldap://b.example.com;bind_dn=cn=admin,dc=example,dc=com;
    /// bind_credential=secret;use_start_tls=true;connect_timeout=5s
    /// ```
    ///
    /// Keys are case-insensitive and `_`, `-` and `.` are ignored, so
    /// `ldapUrl` and `ldap_url` are the same key. Durations without a unit
    /// are milliseconds.
    pub fn from_properties(props: &str) -> Result<Self, Error> {
        let mut config = Self::default();

        let mut bind_dn = None;
        let mut bind_credential = None;
        let mut sasl: Option<SaslConfig> = None;
        let mut use_ssl = false;
        let mut tls = TlsConfig::builder();
        let mut tls_configured = false;
        let mut client_cert = None;
        let mut client_key = None;

        for part in props.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;
            let key = normalize_key(key);
            let value = value.trim();

            match key.as_str() {
                "ldapurl" | "url" => {
                    config.urls = value
                        .split_whitespace()
                        .map(LdapUrl::parse)
                        .collect::<Result<_, _>>()?;
                }
                "connecttimeout" => config.connect_timeout = parse_duration(value)?,
                "responsetimeout" => {
                    let timeout = parse_duration(value)?;
                    config.response_timeout = (!timeout.is_zero()).then_some(timeout);
                }
                "binddn" => bind_dn = Some(value.to_string()),
                "bindcredential" | "password" => bind_credential = Some(value.to_string()),
                "saslmechanism" => {
                    let mechanism: Mechanism = value.parse().map_err(config_error)?;
                    sasl.get_or_insert_with(|| SaslConfig::new(mechanism))
                        .mechanism = mechanism;
                }
                "saslauthorizationid" => {
                    sasl_entry(&mut sasl, &key)?.authorization_id = Some(value.to_string());
                }
                "saslrealm" => sasl_entry(&mut sasl, &key)?.realm = Some(value.to_string()),
                "saslqop" | "saslqualityofprotection" => {
                    sasl_entry(&mut sasl, &key)?.qop = value
                        .split(',')
                        .map(QualityOfProtection::from_str)
                        .collect::<Result<_, _>>()
                        .map_err(config_error)?;
                }
                "saslsecuritystrength" => {
                    let strength: SecurityStrength = value.parse().map_err(config_error)?;
                    sasl_entry(&mut sasl, &key)?.security_strength = Some(strength);
                }
                "saslmutualauthentication" => {
                    sasl_entry(&mut sasl, &key)?.mutual_authentication = parse_bool(value)?;
                }
                "usessl" | "ldaps" => use_ssl = parse_bool(value)?,
                "usestarttls" | "starttls" => config.use_start_tls = parse_bool(value)?,
                "failover" => config.failover = value.parse()?,
                "maxmessagesize" => {
                    config.max_message_size = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid message size: {value}")))?;
                }
                "trustcertificates" | "cacertificate" | "cacert" => {
                    tls = tls.ca_cert_path(value);
                    tls_configured = true;
                }
                "clientcertificate" => client_cert = Some(value.to_string()),
                "clientkey" => client_key = Some(value.to_string()),
                "verifyhostname" | "hostnameverification" => {
                    tls = tls.verify_hostname(parse_bool(value)?);
                    tls_configured = true;
                }
                "dangeracceptinvalidcerts" => {
                    tls = tls.danger_accept_invalid_certs(parse_bool(value)?);
                    tls_configured = true;
                }
                "tlsservername" => {
                    tls = tls.server_name(value);
                    tls_configured = true;
                }
                _ => {
                    // Ignore unknown options for forward compatibility
                    tracing::debug!(key = key, "ignoring unknown connection property");
                }
            }
        }

        match (client_cert, client_key) {
            (Some(cert), Some(key)) => {
                tls = tls.client_cert(cert, key);
                tls_configured = true;
            }
            (None, None) => {}
            _ => {
                return Err(Error::Config(
                    "client_certificate and client_key must be set together".into(),
                ));
            }
        }

        if use_ssl {
            for url in &mut config.urls {
                if url.scheme == Scheme::Ldap {
                    url.scheme = Scheme::Ldaps;
                }
            }
        }

        config.credentials = match sasl {
            Some(mut sasl) => {
                if sasl.mechanism != Mechanism::External && sasl.mechanism != Mechanism::Gssapi {
                    sasl.authentication_id = bind_dn;
                    sasl.credential = bind_credential;
                }
                Credentials::Sasl(sasl)
            }
            None => match bind_dn {
                Some(dn) => Credentials::simple(dn, bind_credential.unwrap_or_default()),
                None => Credentials::Anonymous,
            },
        };

        let needs_tls = config.use_start_tls || config.urls.iter().any(LdapUrl::is_ldaps);
        if tls_configured || needs_tls {
            config.tls = Some(tls.build().map_err(|e| Error::Config(e.to_string()))?);
        }

        Ok(config)
    }

    /// Set the endpoint URLs.
    pub fn urls<I, S>(mut self, urls: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.urls = urls
            .into_iter()
            .map(|u| LdapUrl::parse(u.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    /// Set the credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the controls sent with each bind.
    #[must_use]
    pub fn bind_controls(mut self, controls: Vec<Arc<dyn Control>>) -> Self {
        self.bind_controls = controls;
        self
    }

    /// Set the TLS configuration.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Enable StartTLS.
    #[must_use]
    pub fn use_start_tls(mut self, enabled: bool) -> Self {
        self.use_start_tls = enabled;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the response timeout.
    #[must_use]
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// Set the failover strategy.
    #[must_use]
    pub fn failover(mut self, strategy: FailoverStrategy) -> Self {
        self.failover = strategy;
        self
    }

    /// Check the configuration for inconsistencies.
    pub fn validate(&self) -> Result<(), Error> {
        if self.urls.is_empty() {
            return Err(Error::Config("at least one LDAP URL is required".into()));
        }
        if self.use_start_tls && self.urls.iter().any(LdapUrl::is_ldaps) {
            return Err(Error::Config(
                "StartTLS cannot be used with ldaps:// URLs".into(),
            ));
        }
        if (self.use_start_tls || self.urls.iter().any(LdapUrl::is_ldaps)) && self.tls.is_none() {
            return Err(Error::Config(
                "TLS is required but no TLS configuration is set".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::Config("connect_timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Normalize a property key: lowercase, with `_`, `-` and `.` removed.
pub fn normalize_key(key: &str) -> String {
    key.trim()
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | '.' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

fn sasl_entry<'a>(
    sasl: &'a mut Option<SaslConfig>,
    key: &str,
) -> Result<&'a mut SaslConfig, Error> {
    sasl.as_mut()
        .ok_or_else(|| Error::Config(format!("{key} requires sasl_mechanism to be set first")))
}

fn config_error(e: ldapkit_auth::AuthError) -> Error {
    Error::Config(e.to_string())
}

/// Parse a property boolean: `true`/`false`, `yes`/`no`, `1`/`0` or `on`/`off`.
pub fn parse_bool(value: &str) -> Result<bool, Error> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(Error::Config(format!("invalid boolean: {value}"))),
    }
}

/// Parse a property duration: `500`, `500ms`, `5s` or `2m`.
pub fn parse_duration(value: &str) -> Result<Duration, Error> {
    let invalid = || Error::Config(format!("invalid duration: {value}"));
    let value = value.trim();
    let (digits, unit) = value
        .find(|c: char| !c.is_ascii_digit())
        .map_or((value, ""), |i| value.split_at(i));
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    match unit.trim() {
        "" | "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        "m" | "min" => Ok(Duration::from_secs(n * 60)),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_urls() {
        let url = LdapUrl::parse("ldap://ldap.example.com").unwrap();
        assert_eq!(url.scheme, Scheme::Ldap);
        assert_eq!(
            url.endpoint,
            Endpoint::Tcp {
                host: "ldap.example.com".into(),
                port: 389
            }
        );

        let url = LdapUrl::parse("LDAPS://ldap.example.com:1636/dc=example,dc=com").unwrap();
        assert!(url.is_ldaps());
        assert_eq!(url.host(), Some("ldap.example.com"));
        assert_eq!(url.to_string(), "ldaps://ldap.example.com:1636");

        let url = LdapUrl::parse("ldaps://[::1]").unwrap();
        assert_eq!(
            url.endpoint,
            Endpoint::Tcp {
                host: "::1".into(),
                port: 636
            }
        );
        assert_eq!(url.to_string(), "ldaps://[::1]:636");
    }

    #[test]
    fn test_parse_ldapi() {
        let url = LdapUrl::parse("ldapi://%2Fvar%2Frun%2Fslapd%2Fldapi").unwrap();
        assert_eq!(url.endpoint, Endpoint::Unix("/var/run/slapd/ldapi".into()));
        assert_eq!(url.to_string(), "ldapi://%2Fvar%2Frun%2Fslapd%2Fldapi");

        let url = LdapUrl::parse("ldapi:///").unwrap();
        assert_eq!(url.endpoint, Endpoint::Unix(DEFAULT_LDAPI_PATH.into()));
        assert_eq!(url.host(), None);
    }

    #[test]
    fn test_parse_url_errors() {
        assert!(LdapUrl::parse("http://example.com").is_err());
        assert!(LdapUrl::parse("example.com").is_err());
        assert!(LdapUrl::parse("ldap://example.com:notaport").is_err());
        assert!(LdapUrl::parse("ldap://[::1").is_err());
    }

    #[test]
    fn test_from_properties_simple_bind() {
        let config = ConnectionConfig::from_properties(
            "ldapUrl=ldap://a.example.com ldap://b.example.com:10389;\
             bind_dn=cn=admin,dc=example,dc=com;bind_credential=secret;\
             connect_timeout=5s;response_timeout=1500;failover=round-robin",
        )
        .unwrap();

        assert_eq!(config.urls.len(), 2);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.response_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.failover, FailoverStrategy::RoundRobin);
        assert_eq!(
            config.credentials,
            Credentials::simple("cn=admin,dc=example,dc=com", "secret")
        );
        assert!(config.tls.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_from_properties_sasl() {
        let config = ConnectionConfig::from_properties(
            "ldap_url=ldap://ldap.example.com;sasl_mechanism=DIGEST-MD5;bind_dn=user;\
             bind_credential=pw;sasl_realm=example.com;sasl_qop=auth;use_start_tls=true",
        )
        .unwrap();

        let Credentials::Sasl(sasl) = &config.credentials else {
            panic!("expected SASL credentials");
        };
        assert_eq!(sasl.mechanism, Mechanism::DigestMd5);
        assert_eq!(sasl.authentication_id.as_deref(), Some("user"));
        assert_eq!(sasl.realm.as_deref(), Some("example.com"));
        assert_eq!(sasl.qop, vec![QualityOfProtection::Auth]);
        assert!(config.use_start_tls);
        assert!(config.tls.as_ref().unwrap().verify_hostname());
    }

    #[test]
    fn test_from_properties_use_ssl() {
        let config =
            ConnectionConfig::from_properties("ldap_url=ldap://ldap.example.com;use_ssl=true")
                .unwrap();
        assert!(config.urls[0].is_ldaps());
        assert!(config.tls.is_some());
    }

    #[test]
    fn test_from_properties_errors() {
        assert!(ConnectionConfig::from_properties("ldap_url").is_err());
        assert!(ConnectionConfig::from_properties("connect_timeout=soon").is_err());
        assert!(ConnectionConfig::from_properties("sasl_realm=x").is_err());
        assert!(ConnectionConfig::from_properties("use_start_tls=maybe").is_err());
        assert!(ConnectionConfig::from_properties("client_certificate=/tmp/c.pem").is_err());
    }

    #[test]
    fn test_unknown_property_ignored() {
        let config =
            ConnectionConfig::from_properties("ldap_url=ldap://h;frobnicate=yes").unwrap();
        assert_eq!(config.urls.len(), 1);
    }

    #[test]
    fn test_validate() {
        assert!(ConnectionConfig::default().validate().is_err());

        let config = ConnectionConfig::new("ldap://h").unwrap().use_start_tls(true);
        assert!(config.validate().is_err());

        let config = ConnectionConfig::new("ldaps://h")
            .unwrap()
            .tls(TlsConfig::builder().build().unwrap())
            .use_start_tls(true);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("2h").is_err());
    }
}
