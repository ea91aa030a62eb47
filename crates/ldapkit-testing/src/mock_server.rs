//! In-process mock LDAP server.
//!
//! Serves a small in-memory directory over plain TCP. It understands
//! simple binds, searches (scopes, filters, size limits, paged results),
//! compare, add, modify, delete, abandon and the "Who am I?" extended
//! operation. Everything it sees is recorded so tests can assert on it.
//!
//! This is test tooling, not a directory server: schema, ACLs and
//! referrals are not modeled.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use ldap_protocol::control::oid;
use ldap_protocol::message::{
    BindAuthentication, BindRequest, BindResponse, ExtendedResponse, ModifyOperation,
    PartialAttribute, SearchRequest, SearchResultEntry, SearchScope, NOTICE_OF_DISCONNECTION_OID,
    START_TLS_OID, WHO_AM_I_OID,
};
use ldap_protocol::{
    ControlRegistry, Filter, LdapMessage, LdapResult, MessageId, PagedResultsControl,
    PasswordPolicyControl, PasswordPolicyError, ProtocolOp, RawControl, ResultCode,
};
use ldapkit_codec::MessageStream;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Naming context served by default.
pub const DEFAULT_BASE_DN: &str = "dc=example,dc=com";

/// Builder for [`MockLdapServer`].
#[derive(Debug, Default)]
pub struct MockLdapServerBuilder {
    entries: Vec<SearchResultEntry>,
    passwords: HashMap<String, String>,
    locked: HashSet<String>,
    search_delay: Option<Duration>,
}

impl MockLdapServerBuilder {
    /// Add an entry.
    #[must_use]
    pub fn entry<I, V>(mut self, dn: &str, attributes: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, V)>,
        V: IntoIterator<Item = &'static str>,
    {
        self.entries.push(SearchResultEntry {
            dn: dn.to_string(),
            attributes: attributes
                .into_iter()
                .map(|(name, values)| PartialAttribute::new(name, values))
                .collect(),
        });
        self
    }

    /// Add a person entry `uid=<uid>,ou=people,dc=example,dc=com` that can
    /// bind with `password`.
    #[must_use]
    pub fn user(mut self, uid: &str, password: &str) -> Self {
        let dn = format!("uid={uid},ou=people,{DEFAULT_BASE_DN}");
        self.entries.push(SearchResultEntry {
            dn: dn.clone(),
            attributes: vec![
                PartialAttribute::new("objectClass", ["top", "person", "inetOrgPerson"]),
                PartialAttribute::new("uid", [uid.to_string()]),
                PartialAttribute::new("cn", [format!("User {uid}")]),
                PartialAttribute::new("mail", [format!("{uid}@example.com")]),
            ],
        });
        self.passwords.insert(normalize_dn(&dn), password.to_string());
        self
    }

    /// Allow binds as `dn` with `password` without adding an entry.
    #[must_use]
    pub fn credentials(mut self, dn: &str, password: &str) -> Self {
        self.passwords.insert(normalize_dn(dn), password.to_string());
        self
    }

    /// Reject every bind as `dn` with a password policy "account locked"
    /// response control.
    #[must_use]
    pub fn locked(mut self, dn: &str) -> Self {
        self.locked.insert(normalize_dn(dn));
        self
    }

    /// Pause before each search result entry.
    #[must_use]
    pub fn search_delay(mut self, delay: Duration) -> Self {
        self.search_delay = Some(delay);
        self
    }

    /// Bind to an ephemeral localhost port and start serving.
    pub async fn start(self) -> std::io::Result<MockLdapServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let mut directory = BTreeMap::new();
        for entry in base_entries().into_iter().chain(self.entries) {
            directory.insert(normalize_dn(&entry.dn), entry);
        }

        let state = Arc::new(ServerState {
            directory: Mutex::new(directory),
            passwords: self.passwords,
            locked: self.locked,
            search_delay: Mutex::new(self.search_delay),
            registry: ControlRegistry::with_defaults(),
            opened: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            binds: Mutex::new(Vec::new()),
            searches: Mutex::new(Vec::new()),
            abandoned: Mutex::new(Vec::new()),
            unbinds: AtomicUsize::new(0),
            connections: Mutex::new(Vec::new()),
        });

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&state), shutdown.clone()));
        tracing::debug!(addr = %addr, "mock LDAP server listening");

        Ok(MockLdapServer {
            addr,
            state,
            shutdown,
            task,
        })
    }
}

/// A running mock server. Stops when dropped.
#[derive(Debug)]
pub struct MockLdapServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Debug)]
struct ServerState {
    directory: Mutex<BTreeMap<String, SearchResultEntry>>,
    passwords: HashMap<String, String>,
    locked: HashSet<String>,
    search_delay: Mutex<Option<Duration>>,
    registry: ControlRegistry,
    opened: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    binds: Mutex<Vec<String>>,
    searches: Mutex<Vec<SearchRequest>>,
    abandoned: Mutex<Vec<MessageId>>,
    unbinds: AtomicUsize,
    connections: Mutex<Vec<CancellationToken>>,
}

impl MockLdapServer {
    /// Create a builder.
    pub fn builder() -> MockLdapServerBuilder {
        MockLdapServerBuilder::default()
    }

    /// Start a server with only the base entries.
    pub async fn start() -> std::io::Result<Self> {
        Self::builder().start().await
    }

    /// Listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ldap://` URL of the server.
    pub fn url(&self) -> String {
        format!("ldap://{}", self.addr)
    }

    /// Connections accepted so far.
    pub fn connections_opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn active_connections(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Most connections open at the same time.
    pub fn peak_connections(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// DNs of every bind attempt, in order.
    pub fn binds(&self) -> Vec<String> {
        self.state.binds.lock().clone()
    }

    /// Every search request received, in order.
    pub fn searches(&self) -> Vec<SearchRequest> {
        self.state.searches.lock().clone()
    }

    /// Message IDs named by abandon requests, in order.
    pub fn abandoned(&self) -> Vec<MessageId> {
        self.state.abandoned.lock().clone()
    }

    /// Unbind requests received.
    pub fn unbinds(&self) -> usize {
        self.state.unbinds.load(Ordering::SeqCst)
    }

    /// Change the pause before each search result entry.
    pub fn set_search_delay(&self, delay: Option<Duration>) {
        *self.state.search_delay.lock() = delay;
    }

    /// Look up an entry by DN.
    pub fn entry(&self, dn: &str) -> Option<SearchResultEntry> {
        self.state.directory.lock().get(&normalize_dn(dn)).cloned()
    }

    /// Send a Notice of Disconnection on every open connection and close
    /// them.
    pub fn disconnect_all(&self) {
        for token in self.state.connections.lock().drain(..) {
            token.cancel();
        }
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.disconnect_all();
    }
}

impl Drop for MockLdapServer {
    fn drop(&mut self) {
        self.shutdown();
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = shutdown.cancelled() => break,
        };
        match accepted {
            Ok((stream, peer)) => {
                let token = shutdown.child_token();
                state.connections.lock().push(token.clone());
                let opened = state.opened.fetch_add(1, Ordering::SeqCst) + 1;
                let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
                state.peak.fetch_max(active, Ordering::SeqCst);
                tracing::trace!(peer = %peer, opened = opened, "mock server accepted connection");

                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    serve_connection(stream, Arc::clone(&state), token).await;
                    state.active.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "mock server accept failed");
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, state: Arc<ServerState>, token: CancellationToken) {
    let (mut sink, mut stream) = MessageStream::new(stream).split();
    let (tx, mut rx) = mpsc::unbounded_channel::<LdapMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut bound = String::new();
    let operations: Arc<Mutex<HashMap<MessageId, CancellationToken>>> =
        Arc::new(Mutex::new(HashMap::new()));

    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            () = token.cancelled() => {
                let notice = ExtendedResponse {
                    result: LdapResult::new(ResultCode::Unavailable, "server shutting down"),
                    name: Some(NOTICE_OF_DISCONNECTION_OID.to_string()),
                    value: None,
                };
                let _ = tx.send(LdapMessage::new(0, ProtocolOp::ExtendedResponse(notice)));
                break;
            }
        };
        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "mock server read error");
                break;
            }
            None => break,
        };

        let id = message.message_id;
        match message.op {
            ProtocolOp::BindRequest(bind) => {
                let reply = handle_bind(&state, &bind, &mut bound);
                let _ = tx.send(reply.with_id(id));
            }
            ProtocolOp::UnbindRequest => {
                state.unbinds.fetch_add(1, Ordering::SeqCst);
                break;
            }
            ProtocolOp::SearchRequest(search) => {
                state.searches.lock().push(search.clone());
                let cancel = token.child_token();
                operations.lock().insert(id, cancel.clone());
                let state = Arc::clone(&state);
                let tx = tx.clone();
                let operations = Arc::clone(&operations);
                let controls = message.controls;
                tokio::spawn(async move {
                    run_search(&state, id, &search, &controls, &tx, &cancel).await;
                    operations.lock().remove(&id);
                });
            }
            ProtocolOp::AbandonRequest(target) => {
                state.abandoned.lock().push(target);
                if let Some(cancel) = operations.lock().remove(&target) {
                    cancel.cancel();
                }
            }
            ProtocolOp::CompareRequest(compare) => {
                let code = match state.directory.lock().get(&normalize_dn(&compare.dn)) {
                    None => ResultCode::NoSuchObject,
                    Some(entry) => match entry.attribute(&compare.attribute) {
                        None => ResultCode::NoSuchAttribute,
                        Some(attr) if has_value(attr, &compare.value) => ResultCode::CompareTrue,
                        Some(_) => ResultCode::CompareFalse,
                    },
                };
                let _ = tx.send(LdapMessage::new(
                    id,
                    ProtocolOp::CompareResponse(LdapResult::new(code, "")),
                ));
            }
            ProtocolOp::AddRequest(add) => {
                let mut directory = state.directory.lock();
                let key = normalize_dn(&add.dn);
                let code = if directory.contains_key(&key) {
                    ResultCode::EntryAlreadyExists
                } else {
                    directory.insert(
                        key,
                        SearchResultEntry {
                            dn: add.dn,
                            attributes: add.attributes,
                        },
                    );
                    ResultCode::Success
                };
                let _ = tx.send(LdapMessage::new(id, ProtocolOp::AddResponse(LdapResult::new(code, ""))));
            }
            ProtocolOp::ModifyRequest(modify) => {
                let mut directory = state.directory.lock();
                let code = match directory.get_mut(&normalize_dn(&modify.dn)) {
                    None => ResultCode::NoSuchObject,
                    Some(entry) => {
                        for change in modify.changes {
                            apply_change(entry, change.operation, change.attribute);
                        }
                        ResultCode::Success
                    }
                };
                let _ = tx.send(LdapMessage::new(id, ProtocolOp::ModifyResponse(LdapResult::new(code, ""))));
            }
            ProtocolOp::DeleteRequest(dn) => {
                let code = match state.directory.lock().remove(&normalize_dn(&dn)) {
                    Some(_) => ResultCode::Success,
                    None => ResultCode::NoSuchObject,
                };
                let _ = tx.send(LdapMessage::new(id, ProtocolOp::DeleteResponse(LdapResult::new(code, ""))));
            }
            ProtocolOp::ExtendedRequest(extended) => {
                let response = match extended.name.as_str() {
                    WHO_AM_I_OID => ExtendedResponse {
                        result: LdapResult::success(),
                        name: None,
                        value: Some(Bytes::from(if bound.is_empty() {
                            String::new()
                        } else {
                            format!("dn:{bound}")
                        })),
                    },
                    START_TLS_OID => ExtendedResponse {
                        result: LdapResult::new(ResultCode::Unavailable, "TLS is not configured"),
                        name: Some(START_TLS_OID.to_string()),
                        value: None,
                    },
                    other => ExtendedResponse {
                        result: LdapResult::new(
                            ResultCode::ProtocolError,
                            format!("unsupported extended operation {other}"),
                        ),
                        name: None,
                        value: None,
                    },
                };
                let _ = tx.send(LdapMessage::new(id, ProtocolOp::ExtendedResponse(response)));
            }
            other => {
                tracing::debug!(op = other.name(), "mock server ignoring operation");
            }
        }
    }

    for (_, cancel) in operations.lock().drain() {
        cancel.cancel();
    }
    drop(tx);
    let _ = writer.await;
}

/// A response without its message ID yet.
struct Reply {
    op: ProtocolOp,
    controls: Vec<RawControl>,
}

impl Reply {
    fn with_id(self, id: MessageId) -> LdapMessage {
        LdapMessage::new(id, self.op).with_controls(self.controls)
    }
}

fn handle_bind(state: &ServerState, bind: &BindRequest, bound: &mut String) -> Reply {
    state.binds.lock().push(bind.name.clone());
    let key = normalize_dn(&bind.name);

    let (result, controls) = match &bind.authentication {
        BindAuthentication::Simple(password) if bind.name.is_empty() && password.is_empty() => {
            bound.clear();
            (LdapResult::success(), Vec::new())
        }
        BindAuthentication::Simple(_) if state.locked.contains(&key) => {
            bound.clear();
            let policy = PasswordPolicyControl::new(false).with_error(PasswordPolicyError::AccountLocked);
            let controls = state.registry.encode(&policy).map(|c| vec![c]).unwrap_or_default();
            (LdapResult::new(ResultCode::InvalidCredentials, "account locked"), controls)
        }
        BindAuthentication::Simple(password) => match state.passwords.get(&key) {
            Some(expected) if expected.as_bytes() == password.as_ref() => {
                bound.clone_from(&bind.name);
                (LdapResult::success(), Vec::new())
            }
            _ => {
                bound.clear();
                (LdapResult::new(ResultCode::InvalidCredentials, ""), Vec::new())
            }
        },
        BindAuthentication::Sasl { mechanism, .. } => (
            LdapResult::new(
                ResultCode::AuthMethodNotSupported,
                format!("SASL {mechanism} is not supported"),
            ),
            Vec::new(),
        ),
    };

    Reply {
        op: ProtocolOp::BindResponse(BindResponse {
            result,
            server_sasl_credentials: None,
        }),
        controls,
    }
}

async fn run_search(
    state: &ServerState,
    id: MessageId,
    search: &SearchRequest,
    controls: &[RawControl],
    tx: &mpsc::UnboundedSender<LdapMessage>,
    cancel: &CancellationToken,
) {
    let paged = controls
        .iter()
        .find(|c| c.oid == oid::PAGED_RESULTS)
        .and_then(|raw| state.registry.decode(raw, None).ok())
        .and_then(|control| control.downcast_ref::<PagedResultsControl>().cloned());

    let mut matched: Vec<SearchResultEntry> = if search.base_dn.is_empty()
        && search.scope == SearchScope::BaseObject
    {
        vec![root_dse()]
    } else {
        let directory = state.directory.lock();
        if !directory.contains_key(&normalize_dn(&search.base_dn)) {
            let _ = tx.send(LdapMessage::new(
                id,
                ProtocolOp::SearchResultDone(LdapResult::new(ResultCode::NoSuchObject, "")),
            ));
            return;
        }
        directory
            .values()
            .filter(|entry| in_scope(&entry.dn, &search.base_dn, search.scope))
            .filter(|entry| matches(&search.filter, entry))
            .cloned()
            .collect()
    };

    let mut response_controls = Vec::new();
    if let Some(paged) = &paged {
        let total = matched.len();
        let offset: usize = paged
            .cookie
            .as_ref()
            .and_then(|c| std::str::from_utf8(c).ok())
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let size = usize::try_from(paged.size).unwrap_or(0).max(1);
        let end = (offset + size).min(total);
        matched = matched.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let cookie = if end < total {
            Bytes::from(end.to_string())
        } else {
            Bytes::new()
        };
        let response = PagedResultsControl::new(i32::try_from(total).unwrap_or(i32::MAX)).with_cookie(cookie);
        if let Ok(raw) = state.registry.encode(&response) {
            response_controls.push(raw);
        }
    }

    let limit = usize::try_from(search.size_limit).unwrap_or(0);
    let mut code = ResultCode::Success;
    let delay = *state.search_delay.lock();

    for (sent, entry) in matched.iter().enumerate() {
        if limit > 0 && sent >= limit {
            code = ResultCode::SizeLimitExceeded;
            break;
        }
        if let Some(delay) = delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return,
            }
        }
        if cancel.is_cancelled() {
            return;
        }
        let entry = project(entry, &search.attributes, search.types_only);
        if tx
            .send(LdapMessage::new(id, ProtocolOp::SearchResultEntry(entry)))
            .is_err()
        {
            return;
        }
    }

    let _ = tx.send(
        LdapMessage::new(id, ProtocolOp::SearchResultDone(LdapResult::new(code, "")))
            .with_controls(response_controls),
    );
}

fn base_entries() -> Vec<SearchResultEntry> {
    vec![
        SearchResultEntry {
            dn: DEFAULT_BASE_DN.to_string(),
            attributes: vec![
                PartialAttribute::new("objectClass", ["top", "domain"]),
                PartialAttribute::new("dc", ["example"]),
            ],
        },
        SearchResultEntry {
            dn: format!("ou=people,{DEFAULT_BASE_DN}"),
            attributes: vec![
                PartialAttribute::new("objectClass", ["top", "organizationalUnit"]),
                PartialAttribute::new("ou", ["people"]),
            ],
        },
    ]
}

fn root_dse() -> SearchResultEntry {
    SearchResultEntry {
        dn: String::new(),
        attributes: vec![
            PartialAttribute::new("objectClass", ["top"]),
            PartialAttribute::new("namingContexts", [DEFAULT_BASE_DN]),
            PartialAttribute::new("supportedLDAPVersion", ["3"]),
            PartialAttribute::new("supportedControl", [oid::PAGED_RESULTS, oid::PASSWORD_POLICY]),
            PartialAttribute::new("supportedExtension", [WHO_AM_I_OID]),
        ],
    }
}

/// Lowercase a DN and drop spaces around separators.
pub fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .map(|rdn| {
            rdn.split('=')
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("=")
        })
        .collect::<Vec<_>>()
        .join(",")
        .to_lowercase()
}

fn parent_dn(dn: &str) -> &str {
    dn.split_once(',').map_or("", |(_, parent)| parent)
}

fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
    let dn = normalize_dn(dn);
    let base = normalize_dn(base);
    match scope {
        SearchScope::BaseObject => dn == base,
        SearchScope::SingleLevel => parent_dn(&dn) == base,
        SearchScope::WholeSubtree => {
            base.is_empty() || dn == base || dn.ends_with(&format!(",{base}"))
        }
    }
}

fn has_value(attr: &PartialAttribute, value: &[u8]) -> bool {
    attr.values.iter().any(|v| v.eq_ignore_ascii_case(value))
}

fn lowered(attr: &PartialAttribute) -> impl Iterator<Item = String> + '_ {
    attr.string_values().map(str::to_lowercase)
}

fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value).to_lowercase()
}

/// Evaluate `filter` against `entry`, comparing values case-insensitively.
fn matches(filter: &Filter, entry: &SearchResultEntry) -> bool {
    match filter {
        Filter::And(filters) => filters.iter().all(|f| matches(f, entry)),
        Filter::Or(filters) => filters.iter().any(|f| matches(f, entry)),
        Filter::Not(inner) => !matches(inner, entry),
        Filter::Equality { attribute, value } | Filter::Approx { attribute, value } => entry
            .attribute(attribute)
            .is_some_and(|attr| has_value(attr, value)),
        Filter::Present(attribute) => {
            attribute.eq_ignore_ascii_case("objectClass") || entry.attribute(attribute).is_some()
        }
        Filter::Substrings {
            attribute,
            initial,
            any,
            final_,
        } => entry.attribute(attribute).is_some_and(|attr| {
            lowered(attr).any(|value| substring_match(&value, initial.as_deref(), any, final_.as_deref()))
        }),
        Filter::GreaterOrEqual { attribute, value } => entry
            .attribute(attribute)
            .is_some_and(|attr| lowered(attr).any(|v| v >= text(value))),
        Filter::LessOrEqual { attribute, value } => entry
            .attribute(attribute)
            .is_some_and(|attr| lowered(attr).any(|v| v <= text(value))),
        Filter::Extensible { .. } => false,
    }
}

fn substring_match(value: &str, initial: Option<&[u8]>, any: &[Bytes], final_: Option<&[u8]>) -> bool {
    let mut rest = value;
    if let Some(initial) = initial {
        let initial = text(initial);
        match rest.strip_prefix(initial.as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for part in any {
        let part = text(part);
        match rest.find(part.as_str()) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    match final_ {
        Some(final_) => rest.ends_with(text(final_).as_str()),
        None => true,
    }
}

fn project(entry: &SearchResultEntry, requested: &[String], types_only: bool) -> SearchResultEntry {
    let all = requested.is_empty() || requested.iter().any(|a| a == "*");
    let none = requested.len() == 1 && requested[0] == "1.1";
    let attributes = entry
        .attributes
        .iter()
        .filter(|attr| !none && (all || requested.iter().any(|r| r.eq_ignore_ascii_case(&attr.name))))
        .map(|attr| PartialAttribute {
            name: attr.name.clone(),
            values: if types_only { Vec::new() } else { attr.values.clone() },
        })
        .collect();
    SearchResultEntry {
        dn: entry.dn.clone(),
        attributes,
    }
}

fn apply_change(entry: &mut SearchResultEntry, operation: ModifyOperation, change: PartialAttribute) {
    let existing = entry
        .attributes
        .iter()
        .position(|a| a.name.eq_ignore_ascii_case(&change.name));
    match (operation, existing) {
        (ModifyOperation::Add, Some(i)) => entry.attributes[i].values.extend(change.values),
        (ModifyOperation::Add | ModifyOperation::Replace, None) => {
            if !change.values.is_empty() {
                entry.attributes.push(change);
            }
        }
        (ModifyOperation::Replace, Some(i)) => {
            if change.values.is_empty() {
                entry.attributes.remove(i);
            } else {
                entry.attributes[i].values = change.values;
            }
        }
        (ModifyOperation::Delete, Some(i)) => {
            if change.values.is_empty() {
                entry.attributes.remove(i);
            } else {
                entry.attributes[i]
                    .values
                    .retain(|v| !change.values.iter().any(|d| d.eq_ignore_ascii_case(v)));
                if entry.attributes[i].values.is_empty() {
                    entry.attributes.remove(i);
                }
            }
        }
        (ModifyOperation::Delete, None) => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn person() -> SearchResultEntry {
        SearchResultEntry {
            dn: "uid=jdoe,ou=people,dc=example,dc=com".into(),
            attributes: vec![
                PartialAttribute::new("objectClass", ["person"]),
                PartialAttribute::new("uid", ["jdoe"]),
                PartialAttribute::new("cn", ["John Doe"]),
            ],
        }
    }

    #[test]
    fn test_filter_matching() {
        let entry = person();
        for (filter, expected) in [
            ("(uid=JDOE)", true),
            ("(cn=John*)", true),
            ("(cn=*oh*Do*)", true),
            ("(cn=*smith)", false),
            ("(&(objectClass=person)(!(uid=other)))", true),
            ("(|(uid=a)(uid=b))", false),
            ("(mail=*)", false),
        ] {
            assert_eq!(matches(&Filter::parse(filter).unwrap(), &entry), expected, "{filter}");
        }
    }

    #[test]
    fn test_scopes() {
        let dn = "uid=jdoe,ou=people,dc=example,dc=com";
        assert!(in_scope(dn, "dc=example,dc=com", SearchScope::WholeSubtree));
        assert!(!in_scope(dn, "dc=example,dc=com", SearchScope::SingleLevel));
        assert!(in_scope(dn, "ou=People, dc=Example, dc=com", SearchScope::SingleLevel));
        assert!(in_scope(dn, dn, SearchScope::BaseObject));
    }

    #[test]
    fn test_projection() {
        let entry = person();
        assert_eq!(project(&entry, &[], false).attributes.len(), 3);
        assert!(project(&entry, &["1.1".into()], false).attributes.is_empty());
        let typed = project(&entry, &["CN".into()], true);
        assert_eq!(typed.attributes.len(), 1);
        assert!(typed.attributes[0].values.is_empty());
    }

    #[test]
    fn test_modify() {
        let mut entry = person();
        apply_change(&mut entry, ModifyOperation::Add, PartialAttribute::new("mail", ["j@example.com"]));
        apply_change(&mut entry, ModifyOperation::Replace, PartialAttribute::new("cn", ["Johnny"]));
        apply_change(&mut entry, ModifyOperation::Delete, PartialAttribute::new("uid", Vec::<&str>::new()));
        assert_eq!(entry.first_value("mail"), Some("j@example.com"));
        assert_eq!(entry.first_value("cn"), Some("Johnny"));
        assert!(entry.attribute("uid").is_none());
    }
}
