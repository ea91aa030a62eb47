//! User authentication: resolve a user name to a DN, then bind as it.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use ldap_protocol::message::{SearchResultEntry, SearchScope};
use ldap_protocol::{Control, Filter, LdapResult, PasswordPolicyControl, ResultCode, control, filter};
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::factory::ConnectionFactory;
use crate::instrumentation::span_names;
use crate::request::{BindRequest, SearchRequest};

/// Placeholder replaced by the user name in filters and DN templates.
pub const USER_PLACEHOLDER: &str = "{user}";

/// Maps a user name to an entry DN.
#[async_trait]
pub trait DnResolver: Send + Sync {
    /// Resolve `user`. `Ok(None)` means no matching entry.
    async fn resolve(&self, user: &str) -> Result<Option<String>>;
}

/// Builds the DN from a template such as `uid={user},ou=people,dc=example,dc=com`.
#[derive(Debug, Clone)]
pub struct FormatDnResolver {
    template: String,
}

impl FormatDnResolver {
    /// Create a resolver. The template must contain `{user}`.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(USER_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "DN template must contain {USER_PLACEHOLDER}: {template}"
            )));
        }
        Ok(Self { template })
    }
}

#[async_trait]
impl DnResolver for FormatDnResolver {
    async fn resolve(&self, user: &str) -> Result<Option<String>> {
        Ok(Some(self.template.replace(USER_PLACEHOLDER, &escape_dn_value(user))))
    }
}

/// Finds the DN with a search. Exactly one entry must match.
#[derive(Debug)]
pub struct SearchDnResolver<F> {
    factory: Arc<F>,
    base_dn: String,
    filter: String,
    subtree: bool,
}

impl<F: ConnectionFactory> SearchDnResolver<F> {
    /// Create a resolver searching below `base_dn` with `filter`, for
    /// example `(uid={user})`. The user name is escaped before substitution.
    pub fn new(factory: Arc<F>, base_dn: impl Into<String>, filter: impl Into<String>) -> Result<Self> {
        let filter = filter.into();
        if !filter.contains(USER_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "user filter must contain {USER_PLACEHOLDER}: {filter}"
            )));
        }
        Filter::parse(&filter.replace(USER_PLACEHOLDER, "x"))?;
        Ok(Self {
            factory,
            base_dn: base_dn.into(),
            filter,
            subtree: true,
        })
    }

    /// Search the whole subtree (default) or only direct children.
    #[must_use]
    pub fn subtree(mut self, subtree: bool) -> Self {
        self.subtree = subtree;
        self
    }

    fn request(&self, user: &str) -> Result<SearchRequest> {
        let filter = self
            .filter
            .replace(USER_PLACEHOLDER, &filter::escape_value(user));
        let scope = if self.subtree {
            SearchScope::WholeSubtree
        } else {
            SearchScope::SingleLevel
        };
        Ok(SearchRequest::new(self.base_dn.clone(), &filter)?
            .scope(scope)
            .attributes(["1.1"]))
    }
}

#[async_trait]
impl<F: ConnectionFactory> DnResolver for SearchDnResolver<F> {
    async fn resolve(&self, user: &str) -> Result<Option<String>> {
        let request = self.request(user)?;
        let mut conn = self.factory.get_connection().await?;
        let result = conn.search(&request).await?;
        match result.entries.as_slice() {
            [] => {
                tracing::debug!(user = user, "no entry matches user");
                Ok(None)
            }
            [entry] => Ok(Some(entry.dn.clone())),
            entries => {
                tracing::warn!(user = user, matches = entries.len(), "user matches several entries");
                Ok(None)
            }
        }
    }
}

/// A user to authenticate.
#[derive(Clone)]
pub struct AuthenticationRequest {
    /// User name handed to the DN resolver.
    pub user: String,
    /// Password.
    pub credential: Bytes,
    /// Controls sent with the bind, such as a password policy request.
    pub controls: Vec<Arc<dyn Control>>,
    /// Attributes of the user entry to read after a successful bind.
    pub return_attributes: Vec<String>,
}

impl AuthenticationRequest {
    /// Create a request.
    pub fn new(user: impl Into<String>, credential: impl Into<Bytes>) -> Self {
        Self {
            user: user.into(),
            credential: credential.into(),
            controls: Vec::new(),
            return_attributes: Vec::new(),
        }
    }

    /// Add a bind control.
    #[must_use]
    pub fn control(mut self, control: impl Control) -> Self {
        self.controls.push(Arc::new(control));
        self
    }

    /// Read these attributes of the user entry after binding.
    #[must_use]
    pub fn return_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.return_attributes = attributes.into_iter().map(Into::into).collect();
        self
    }
}

impl std::fmt::Debug for AuthenticationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationRequest")
            .field("user", &self.user)
            .field("credential", &"[REDACTED]")
            .field("controls", &self.controls)
            .field("return_attributes", &self.return_attributes)
            .finish()
    }
}

/// Outcome category of an authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticationResultCode {
    /// The bind succeeded.
    Success,
    /// The server rejected the credential.
    InvalidCredential,
    /// No single entry matched the user.
    DnResolutionFailure,
    /// The bind failed for another reason; see the result code.
    BindFailure,
}

/// Outcome of an authentication.
#[derive(Debug, Clone)]
pub struct AuthenticationResponse {
    /// Outcome category.
    pub code: AuthenticationResultCode,
    /// Resolved DN, if resolution succeeded.
    pub dn: Option<String>,
    /// Bind result, if a bind was attempted.
    pub result: Option<LdapResult>,
    /// Decoded bind response controls.
    pub controls: Vec<Arc<dyn Control>>,
    /// The user entry, when attributes were requested.
    pub entry: Option<SearchResultEntry>,
}

impl AuthenticationResponse {
    fn failed(code: AuthenticationResultCode, dn: Option<String>) -> Self {
        Self {
            code,
            dn,
            result: None,
            controls: Vec::new(),
            entry: None,
        }
    }

    /// Whether the user was authenticated.
    pub fn is_success(&self) -> bool {
        self.code == AuthenticationResultCode::Success
    }

    /// Password policy response control, if the server sent one.
    pub fn password_policy(&self) -> Option<&PasswordPolicyControl> {
        control::find(&self.controls)
    }
}

/// Authenticates users: DN resolution followed by a bind.
#[derive(Debug)]
pub struct Authenticator<R, F> {
    resolver: R,
    factory: Arc<F>,
}

impl<R: DnResolver, F: ConnectionFactory> Authenticator<R, F> {
    /// Create an authenticator binding on connections from `factory`.
    pub fn new(resolver: R, factory: Arc<F>) -> Self {
        Self { resolver, factory }
    }

    /// Authenticate `request`.
    ///
    /// Authentication outcomes are reported in the response. `Err` is
    /// returned only for empty input and for connection or protocol
    /// failures.
    pub async fn authenticate(&self, request: &AuthenticationRequest) -> Result<AuthenticationResponse> {
        if request.user.is_empty() {
            return Err(Error::InvalidRequest("user name is empty".into()));
        }
        if request.credential.is_empty() {
            return Err(Error::InvalidRequest("credential is empty".into()));
        }

        let span = tracing::debug_span!(span_names::AUTHENTICATE, user = %request.user);
        async {
            let Some(dn) = self.resolver.resolve(&request.user).await? else {
                return Ok(AuthenticationResponse::failed(
                    AuthenticationResultCode::DnResolutionFailure,
                    None,
                ));
            };

            let mut conn = self.factory.get_connection().await?;
            let bind = BindRequest::new(dn.clone(), request.credential.clone())
                .controls(request.controls.clone());
            let outcome = conn.bind(&bind).await;

            let (code, result, controls) = match outcome {
                Ok(ok) => (AuthenticationResultCode::Success, ok.result, ok.controls),
                Err(Error::Operation(e)) => {
                    let code = if e.code == ResultCode::InvalidCredentials {
                        AuthenticationResultCode::InvalidCredential
                    } else {
                        AuthenticationResultCode::BindFailure
                    };
                    let result = LdapResult {
                        code: e.code,
                        matched_dn: e.matched_dn,
                        diagnostic_message: e.message,
                        referrals: e.referrals,
                    };
                    (code, result, e.controls)
                }
                Err(e) => return Err(e),
            };

            let entry = if code == AuthenticationResultCode::Success
                && !request.return_attributes.is_empty()
            {
                let read = SearchRequest::with_filter(dn.clone(), Filter::present("objectClass"))
                    .scope(SearchScope::BaseObject)
                    .attributes(request.return_attributes.iter().cloned());
                conn.search(&read).await?.entries.into_iter().next()
            } else {
                None
            };

            tracing::info!(dn = %dn, outcome = ?code, "authentication finished");
            Ok::<_, Error>(AuthenticationResponse {
                code,
                dn: Some(dn),
                result: Some(result),
                controls,
                entry,
            })
        }
        .instrument(span)
        .await
    }
}

/// Escape a value for use inside an RDN (RFC 4514 section 2.4).
pub fn escape_dn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 => out.push_str("\\#"),
            ' ' if i == 0 || i == last => out.push_str("\\ "),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::LdapUrl;
    use crate::connection::Connection;
    use crate::factory::OwnedConnection;
    use futures_util::{SinkExt, StreamExt};
    use ldap_protocol::message::{BindAuthentication, BindResponse};
    use ldap_protocol::{ControlRegistry, LdapMessage, PasswordPolicyError, ProtocolOp};
    use ldapkit_codec::MessageStream;
    use parking_lot::Mutex;
    use tokio::io::DuplexStream;

    /// Serves connections from a queue of in-memory streams.
    struct QueueFactory {
        streams: Mutex<Vec<DuplexStream>>,
    }

    #[async_trait]
    impl ConnectionFactory for QueueFactory {
        type Handle = OwnedConnection;

        async fn get_connection(&self) -> Result<OwnedConnection> {
            let stream = self.streams.lock().remove(0);
            Ok(OwnedConnection::new(Connection::new(
                LdapUrl::parse("ldap://localhost").unwrap(),
                Box::new(stream),
                Arc::new(ControlRegistry::with_defaults()),
            )))
        }
    }

    fn factory(n: usize) -> (Arc<QueueFactory>, Vec<MessageStream<DuplexStream>>) {
        let mut clients = Vec::new();
        let mut servers = Vec::new();
        for _ in 0..n {
            let (c, s) = tokio::io::duplex(64 * 1024);
            clients.push(c);
            servers.push(MessageStream::new(s));
        }
        (
            Arc::new(QueueFactory {
                streams: Mutex::new(clients),
            }),
            servers,
        )
    }

    async fn answer_search(server: &mut MessageStream<DuplexStream>, dns: &[&str]) -> String {
        let req = server.next().await.unwrap().unwrap();
        let ProtocolOp::SearchRequest(search) = &req.op else {
            panic!("expected search");
        };
        let filter = search.filter.to_string();
        for dn in dns {
            server
                .send(LdapMessage::new(
                    req.message_id,
                    ProtocolOp::SearchResultEntry(SearchResultEntry {
                        dn: (*dn).into(),
                        attributes: Vec::new(),
                    }),
                ))
                .await
                .unwrap();
        }
        server
            .send(LdapMessage::new(
                req.message_id,
                ProtocolOp::SearchResultDone(LdapResult::success()),
            ))
            .await
            .unwrap();
        filter
    }

    #[test]
    fn test_escape_dn_value() {
        assert_eq!(escape_dn_value("jdoe"), "jdoe");
        assert_eq!(escape_dn_value("Doe, John"), "Doe\\, John");
        assert_eq!(escape_dn_value("#admin "), "\\#admin\\ ");
        assert_eq!(escape_dn_value("a=b+c"), "a\\=b\\+c");
    }

    #[tokio::test]
    async fn test_format_resolver() {
        let resolver = FormatDnResolver::new("uid={user},ou=people,dc=example,dc=com").unwrap();
        assert_eq!(
            resolver.resolve("j,doe").await.unwrap().unwrap(),
            "uid=j\\,doe,ou=people,dc=example,dc=com"
        );
        assert!(FormatDnResolver::new("ou=people").is_err());
    }

    #[tokio::test]
    async fn test_search_resolver_escapes_user() {
        let (factory, mut servers) = factory(1);
        let mut server = servers.remove(0);
        let handle = tokio::spawn(async move {
            answer_search(&mut server, &["uid=x,ou=people,dc=example,dc=com"]).await
        });

        let resolver = SearchDnResolver::new(factory, "ou=people,dc=example,dc=com", "(uid={user})").unwrap();
        let dn = resolver.resolve("x*)(uid=*").await.unwrap();
        assert_eq!(dn.as_deref(), Some("uid=x,ou=people,dc=example,dc=com"));
        assert_eq!(handle.await.unwrap(), "(uid=x\\2a\\29\\28uid=\\2a)");
    }

    #[tokio::test]
    async fn test_search_resolver_requires_single_match() {
        let (factory, mut servers) = factory(2);
        let mut none = servers.remove(0);
        let mut many = servers.remove(0);
        tokio::spawn(async move {
            answer_search(&mut none, &[]).await;
            answer_search(&mut many, &["uid=a,dc=example,dc=com", "uid=a,ou=x,dc=example,dc=com"]).await;
        });

        let resolver = SearchDnResolver::new(factory, "dc=example,dc=com", "(uid={user})").unwrap();
        assert_eq!(resolver.resolve("nobody").await.unwrap(), None);
        assert_eq!(resolver.resolve("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_credential_rejected_before_bind() {
        let (factory, _servers) = factory(0);
        let auth = Authenticator::new(
            FormatDnResolver::new("uid={user},dc=example,dc=com").unwrap(),
            factory,
        );
        let err = auth
            .authenticate(&AuthenticationRequest::new("jdoe", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_failed_bind_returns_password_policy() {
        let (factory, mut servers) = factory(1);
        let mut server = servers.remove(0);
        tokio::spawn(async move {
            let req = server.next().await.unwrap().unwrap();
            let ProtocolOp::BindRequest(bind) = &req.op else {
                panic!("expected bind");
            };
            assert_eq!(bind.name, "uid=jdoe,dc=example,dc=com");
            assert!(matches!(bind.authentication, BindAuthentication::Simple(ref p) if p.as_ref() == b"wrong"));
            assert_eq!(req.controls.len(), 1);

            let registry = ControlRegistry::with_defaults();
            let policy: Arc<dyn Control> = Arc::new(
                PasswordPolicyControl::new(false).with_error(PasswordPolicyError::PasswordExpired),
            );
            server
                .send(
                    LdapMessage::new(
                        req.message_id,
                        ProtocolOp::BindResponse(BindResponse {
                            result: LdapResult::new(ResultCode::InvalidCredentials, ""),
                            server_sasl_credentials: None,
                        }),
                    )
                    .with_controls(vec![registry.encode(policy.as_ref()).unwrap()]),
                )
                .await
                .unwrap();
            let _ = server.next().await;
        });

        let auth = Authenticator::new(
            FormatDnResolver::new("uid={user},dc=example,dc=com").unwrap(),
            factory,
        );
        let response = auth
            .authenticate(
                &AuthenticationRequest::new("jdoe", "wrong").control(PasswordPolicyControl::new(false)),
            )
            .await
            .unwrap();
        assert_eq!(response.code, AuthenticationResultCode::InvalidCredential);
        assert_eq!(
            response.password_policy().unwrap().error,
            Some(PasswordPolicyError::PasswordExpired)
        );
    }
}
