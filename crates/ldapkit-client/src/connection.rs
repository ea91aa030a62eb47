//! A single LDAP connection.
//!
//! [`Connection`] owns one framed byte stream and runs one operation at a
//! time: it sends a request, then reads messages until the response with the
//! same message ID arrives. Responses to earlier requests that were given
//! up on (dropped futures, abandoned searches, response timeouts) are
//! discarded as they are met.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use ldap_protocol::message::{
    self, BindResponse, NOTICE_OF_DISCONNECTION_OID, START_TLS_OID, WHO_AM_I_OID,
};
use ldap_protocol::{Control, ControlRegistry, LdapMessage, LdapResult, MessageId, ProtocolOp, ResultCode};
use ldapkit_auth::SaslMechanism;
use ldapkit_codec::{CodecError, LdapCodec, MessageStream};
use ldapkit_tls::{TlsConnector, TlsError};
use tracing::Instrument;

use crate::config::LdapUrl;
use crate::error::{ConnectionError, Error, OperationError, Result};
use crate::instrumentation::span_names;
use crate::request::{
    AddRequest, BindRequest, CompareRequest, DeleteRequest, ExtendedRequest, ModifyRequest,
    Request, SearchRequest,
};
use crate::response::{
    CompareResult, ExtendedResult, OperationResult, Response, SearchItem, SearchResult,
};
use crate::state::ConnectionState;
use crate::transport::BoxedStream;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// An open LDAP session over one transport.
pub struct Connection {
    id: u64,
    url: LdapUrl,
    stream: Option<MessageStream<BoxedStream>>,
    registry: Arc<ControlRegistry>,
    next_message_id: MessageId,
    response_timeout: Option<Duration>,
    tls: bool,
    identity: String,
    default_identity: String,
    close_reason: Option<String>,
    opened_at: Instant,
}

impl Connection {
    /// Wrap a connected stream.
    pub fn new(url: LdapUrl, stream: BoxedStream, registry: Arc<ControlRegistry>) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection_id = id, url = %url, "connection opened");
        Self {
            id,
            url,
            stream: Some(MessageStream::new(stream)),
            registry,
            next_message_id: 1,
            response_timeout: None,
            tls: false,
            identity: String::new(),
            default_identity: String::new(),
            close_reason: None,
            opened_at: Instant::now(),
        }
    }

    /// Fail operations whose response takes longer than `timeout`.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Limit the size of a single incoming message.
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        if let Some(stream) = self.stream.take() {
            let codec = LdapCodec::new().with_max_message_size(max);
            self.stream = Some(MessageStream::with_codec(stream.into_inner(), codec));
        }
        self
    }

    /// Record that the stream is already encrypted (`ldaps://`).
    #[must_use]
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Process-unique connection identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Endpoint this connection was opened to.
    pub fn url(&self) -> &LdapUrl {
        &self.url
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        if self.stream.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    /// Whether requests can be sent.
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Why the connection closed, when known.
    pub fn close_reason(&self) -> Option<&str> {
        self.close_reason.as_deref()
    }

    /// Whether the stream is encrypted.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Time since the connection was opened.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Identity of the last successful bind: the DN for simple binds, the
    /// mechanism for SASL binds, empty when anonymous.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Whether a bind since the connection was set up changed its identity.
    pub fn identity_changed(&self) -> bool {
        self.identity != self.default_identity
    }

    /// Make the current identity the one this connection should carry.
    pub(crate) fn mark_default_identity(&mut self) {
        self.default_identity = self.identity.clone();
    }

    /// Control registry used to encode and decode controls.
    pub fn registry(&self) -> &Arc<ControlRegistry> {
        &self.registry
    }

    /// Run any request.
    pub async fn execute(&mut self, request: &Request) -> Result<Response> {
        let span = tracing::debug_span!(
            span_names::EXECUTE,
            connection_id = self.id,
            operation = request.name()
        );
        async {
            Ok(match request {
                Request::Search(r) => Response::Search(self.search(r).await?),
                Request::Compare(r) => Response::Compare(self.compare(r).await?),
                Request::Add(r) => Response::Operation(self.add(r).await?),
                Request::Modify(r) => Response::Operation(self.modify(r).await?),
                Request::Delete(r) => Response::Operation(self.delete(r).await?),
                Request::Extended(r) => Response::Extended(self.extended(r).await?),
                Request::Bind(r) => Response::Operation(self.bind(r).await?),
            })
        }
        .instrument(span)
        .await
    }

    /// Search and collect every entry and reference.
    pub async fn search(&mut self, request: &SearchRequest) -> Result<SearchResult> {
        let span = tracing::debug_span!(
            span_names::SEARCH,
            connection_id = self.id,
            base_dn = %request.base_dn
        );
        async {
            let id = self.start_search(request).await?;
            let mut result = SearchResult::empty();
            loop {
                match self.next_search_item(id, &request.controls).await? {
                    SearchItem::Entry(entry) => result.entries.push(entry),
                    SearchItem::Reference(urls) => result.references.extend(urls),
                    SearchItem::Done(done, controls) => {
                        tracing::debug!(
                            entries = result.entries.len(),
                            code = %done.code,
                            "search complete"
                        );
                        if !done.is_success() {
                            return Err(Error::from(OperationError::new(done, controls)));
                        }
                        result.result = done;
                        result.controls = controls;
                        return Ok(result);
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Send a search request and return its message ID.
    ///
    /// Read the results with [`next_search_item`](Self::next_search_item).
    pub async fn start_search(&mut self, request: &SearchRequest) -> Result<MessageId> {
        request.validate()?;
        self.send(
            ProtocolOp::SearchRequest(request.to_protocol()),
            &request.controls,
        )
        .await
    }

    /// Read the next result of the search started as `id`.
    ///
    /// `request_controls` are the controls the search was sent with; they
    /// are needed to decode some response controls.
    pub async fn next_search_item(
        &mut self,
        id: MessageId,
        request_controls: &[Arc<dyn Control>],
    ) -> Result<SearchItem> {
        let message = self.receive(id).await?;
        match message.op {
            ProtocolOp::SearchResultEntry(entry) => Ok(SearchItem::Entry(entry)),
            ProtocolOp::SearchResultReference(urls) => Ok(SearchItem::Reference(urls)),
            ProtocolOp::SearchResultDone(result) => {
                let controls = self.registry.decode_all(request_controls, &message.controls)?;
                Ok(SearchItem::Done(result, controls))
            }
            other => Err(ConnectionError::UnexpectedResponse {
                expected: "searchResDone",
                actual: other.name(),
            }
            .into()),
        }
    }

    /// Compare an attribute value.
    pub async fn compare(&mut self, request: &CompareRequest) -> Result<CompareResult> {
        let op = ProtocolOp::CompareRequest(message::CompareRequest {
            dn: request.dn.clone(),
            attribute: request.attribute.clone(),
            value: request.value.clone(),
        });
        let (op, controls) = self.round_trip(op, &request.controls).await?;
        let result = take_result(op, "compareResponse")?;
        match result.code {
            ResultCode::CompareTrue => Ok(CompareResult {
                matched: true,
                controls,
            }),
            ResultCode::CompareFalse => Ok(CompareResult {
                matched: false,
                controls,
            }),
            _ => Err(Error::from(OperationError::new(result, controls))),
        }
    }

    /// Add an entry.
    pub async fn add(&mut self, request: &AddRequest) -> Result<OperationResult> {
        let op = ProtocolOp::AddRequest(message::AddRequest {
            dn: request.dn.clone(),
            attributes: request.attributes.clone(),
        });
        self.simple_operation(op, "addResponse", &request.controls)
            .await
    }

    /// Modify an entry.
    pub async fn modify(&mut self, request: &ModifyRequest) -> Result<OperationResult> {
        let op = ProtocolOp::ModifyRequest(message::ModifyRequest {
            dn: request.dn.clone(),
            changes: request.changes.clone(),
        });
        self.simple_operation(op, "modifyResponse", &request.controls)
            .await
    }

    /// Delete an entry.
    pub async fn delete(&mut self, request: &DeleteRequest) -> Result<OperationResult> {
        let op = ProtocolOp::DeleteRequest(request.dn.clone());
        self.simple_operation(op, "delResponse", &request.controls)
            .await
    }

    /// Run an extended operation.
    pub async fn extended(&mut self, request: &ExtendedRequest) -> Result<ExtendedResult> {
        let op = ProtocolOp::ExtendedRequest(message::ExtendedRequest::new(
            request.name.clone(),
            request.value.clone(),
        ));
        let (op, controls) = self.round_trip(op, &request.controls).await?;
        let ProtocolOp::ExtendedResponse(response) = op else {
            return Err(ConnectionError::UnexpectedResponse {
                expected: "extendedResp",
                actual: op.name(),
            }
            .into());
        };
        if !response.result.is_success() {
            return Err(Error::from(OperationError::new(response.result, controls)));
        }
        Ok(ExtendedResult {
            result: response.result,
            name: response.name,
            value: response.value,
            controls,
        })
    }

    /// Ask the server who this connection is bound as (RFC 4532).
    pub async fn who_am_i(&mut self) -> Result<String> {
        let response = self
            .extended(&ExtendedRequest::new(WHO_AM_I_OID, None))
            .await?;
        Ok(response
            .value
            .map(|v| String::from_utf8_lossy(&v).into_owned())
            .unwrap_or_default())
    }

    /// Simple bind.
    ///
    /// A rejected bind is returned as [`Error::Operation`] with any response
    /// controls, such as a password policy response, attached.
    pub async fn bind(&mut self, request: &BindRequest) -> Result<OperationResult> {
        let span = tracing::debug_span!(span_names::BIND, connection_id = self.id);
        async {
            tracing::debug!(dn = %request.dn, "simple bind");
            let op = ProtocolOp::BindRequest(message::BindRequest::simple(
                request.dn.clone(),
                request.password.clone(),
            ));
            let (op, controls) = self.round_trip(op, &request.controls).await?;
            let response = take_bind_response(op)?;
            if !response.result.is_success() {
                self.identity.clear();
                return Err(Error::from(OperationError::new(response.result, controls)));
            }
            self.identity = request.dn.clone();
            Ok(OperationResult {
                result: response.result,
                controls,
            })
        }
        .instrument(span)
        .await
    }

    /// Run a SASL bind exchange to completion.
    pub async fn bind_sasl(
        &mut self,
        mechanism: &mut dyn SaslMechanism,
        controls: &[Arc<dyn Control>],
    ) -> Result<OperationResult> {
        let span = tracing::debug_span!(
            span_names::BIND,
            connection_id = self.id,
            mechanism = mechanism.name()
        );
        async {
            let mut credentials = mechanism
                .initial_response()
                .map_err(ConnectionError::from)?;
            loop {
                let op = ProtocolOp::BindRequest(message::BindRequest::sasl(
                    mechanism.name(),
                    credentials.take().map(Bytes::from),
                ));
                let (op, response_controls) = self.round_trip(op, controls).await?;
                let response = take_bind_response(op)?;
                match response.result.code {
                    ResultCode::SaslBindInProgress => {
                        let challenge = response.server_sasl_credentials.unwrap_or_default();
                        tracing::trace!(len = challenge.len(), "SASL challenge");
                        credentials = Some(
                            mechanism
                                .evaluate_challenge(&challenge)
                                .map_err(ConnectionError::from)?,
                        );
                    }
                    ResultCode::Success => {
                        mechanism
                            .verify_final(response.server_sasl_credentials.as_deref())
                            .map_err(ConnectionError::from)?;
                        self.identity = format!("SASL {}", mechanism.name());
                        return Ok(OperationResult {
                            result: response.result,
                            controls: response_controls,
                        });
                    }
                    _ => {
                        self.identity.clear();
                        return Err(Error::from(OperationError::new(response.result, response_controls)));
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Abandon an outstanding operation. No response is expected.
    pub async fn abandon(&mut self, id: MessageId) -> Result<()> {
        tracing::debug!(connection_id = self.id, message_id = id, "abandoning operation");
        self.send(ProtocolOp::AbandonRequest(id), &[]).await?;
        Ok(())
    }

    /// Upgrade the stream with StartTLS (RFC 4511 section 4.14).
    ///
    /// A refusal by the server leaves the connection open and unencrypted.
    /// A failed handshake closes it.
    pub async fn start_tls(&mut self, connector: &TlsConnector, host: &str) -> Result<()> {
        let span = tracing::debug_span!(span_names::START_TLS, connection_id = self.id);
        async {
            match self
                .extended(&ExtendedRequest::new(START_TLS_OID, None))
                .await
            {
                Ok(_) => {}
                Err(Error::Operation(e)) => {
                    return Err(Error::from(ConnectionError::StartTlsRejected {
                        code: e.code,
                        message: e.message,
                    }));
                }
                Err(e) => return Err(e),
            }

            let stream = self
                .stream
                .take()
                .ok_or_else(|| Error::from(ConnectionError::closed()))?;
            if !stream.read_buffer().is_empty() {
                self.close_reason = Some("data received before TLS handshake".into());
                return Err(Error::from(ConnectionError::Tls(TlsError::Handshake(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "unexpected data before TLS handshake",
                    ),
                ))));
            }

            let max = stream.codec().max_message_size();
            let tls = match connector.connect(host, stream.into_inner()).await {
                Ok(tls) => tls,
                Err(e) => {
                    self.close_reason = Some(e.to_string());
                    return Err(Error::from(ConnectionError::Tls(e)));
                }
            };
            let codec = LdapCodec::new().with_max_message_size(max);
            self.stream = Some(MessageStream::with_codec(Box::new(tls), codec));
            self.tls = true;
            tracing::debug!("StartTLS complete");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Send an unbind request and close the transport.
    ///
    /// Closing an already closed connection does nothing.
    pub async fn close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        let id = self.next_id();
        if let Err(e) = stream
            .send(LdapMessage::new(id, ProtocolOp::UnbindRequest))
            .await
        {
            tracing::debug!(connection_id = self.id, error = %e, "unbind failed");
        }
        if let Err(e) = stream.close().await {
            tracing::debug!(connection_id = self.id, error = %e, "shutdown failed");
        }
        self.close_reason.get_or_insert_with(|| "closed by client".into());
        tracing::debug!(connection_id = self.id, "connection closed");
    }

    async fn simple_operation(
        &mut self,
        op: ProtocolOp,
        expected: &'static str,
        controls: &[Arc<dyn Control>],
    ) -> Result<OperationResult> {
        let (op, controls) = self.round_trip(op, controls).await?;
        let result = take_result(op, expected)?;
        if !result.is_success() {
            return Err(Error::from(OperationError::new(result, controls)));
        }
        Ok(OperationResult { result, controls })
    }

    async fn round_trip(
        &mut self,
        op: ProtocolOp,
        controls: &[Arc<dyn Control>],
    ) -> Result<(ProtocolOp, Vec<Arc<dyn Control>>)> {
        let id = self.send(op, controls).await?;
        let message = self.receive(id).await?;
        let response_controls = self.registry.decode_all(controls, &message.controls)?;
        Ok((message.op, response_controls))
    }

    fn next_id(&mut self) -> MessageId {
        let id = self.next_message_id;
        self.next_message_id = if id == MessageId::MAX { 1 } else { id + 1 };
        id
    }

    async fn send(&mut self, op: ProtocolOp, controls: &[Arc<dyn Control>]) -> Result<MessageId> {
        let raw = self.registry.encode_all(controls)?;
        if self.stream.is_none() {
            return Err(self.closed_error());
        }
        let id = self.next_id();
        let message = LdapMessage::new(id, op).with_controls(raw);
        tracing::trace!(message_id = id, op = message.op.name(), "sending request");

        let result = match self.stream.as_mut() {
            Some(stream) => stream.send(message).await,
            None => return Err(self.closed_error()),
        };
        match result {
            Ok(()) => Ok(id),
            Err(e) => Err(self.transport_failed(e)),
        }
    }

    async fn receive(&mut self, id: MessageId) -> Result<LdapMessage> {
        loop {
            let timeout = self.response_timeout;
            let Some(stream) = self.stream.as_mut() else {
                return Err(self.closed_error());
            };
            let next = match timeout {
                Some(limit) => tokio::time::timeout(limit, stream.next())
                    .await
                    .map_err(|_| ConnectionError::Timeout {
                        during: "response",
                        elapsed: limit,
                    })?,
                None => stream.next().await,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(self.transport_failed(e)),
                None => {
                    self.mark_closed("connection closed by server".into());
                    return Err(self.closed_error());
                }
            };

            if message.is_unsolicited() {
                self.handle_unsolicited(message)?;
                continue;
            }
            if message.message_id != id {
                tracing::debug!(
                    expected = id,
                    received = message.message_id,
                    op = message.op.name(),
                    "discarding response to an earlier request"
                );
                continue;
            }
            return Ok(message);
        }
    }

    fn handle_unsolicited(&mut self, message: LdapMessage) -> Result<()> {
        if let ProtocolOp::ExtendedResponse(response) = &message.op {
            if response.name.as_deref() == Some(NOTICE_OF_DISCONNECTION_OID) {
                let reason = notice_reason(&response.result);
                tracing::warn!(connection_id = self.id, reason = %reason, "notice of disconnection");
                self.stream = None;
                self.mark_closed(reason);
                return Err(self.closed_error());
            }
        }
        tracing::warn!(
            connection_id = self.id,
            op = message.op.name(),
            "ignoring unsolicited notification"
        );
        Ok(())
    }

    fn transport_failed(&mut self, e: CodecError) -> Error {
        if e.is_fatal() {
            tracing::debug!(connection_id = self.id, error = %e, "transport failed");
            self.stream = None;
            self.mark_closed(e.to_string());
        }
        e.into()
    }

    fn mark_closed(&mut self, reason: String) {
        self.stream = None;
        self.close_reason.get_or_insert(reason);
    }

    fn closed_error(&self) -> Error {
        ConnectionError::Closed {
            reason: self.close_reason.clone(),
        }
        .into()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("url", &self.url.to_string())
            .field("state", &self.state())
            .field("tls", &self.tls)
            .field("identity", &self.identity)
            .finish()
    }
}

fn notice_reason(result: &LdapResult) -> String {
    if result.diagnostic_message.is_empty() {
        result.code.to_string()
    } else {
        format!("{}: {}", result.code, result.diagnostic_message)
    }
}

fn take_result(op: ProtocolOp, expected: &'static str) -> Result<LdapResult> {
    let actual = op.name();
    match op {
        ProtocolOp::AddResponse(r)
        | ProtocolOp::ModifyResponse(r)
        | ProtocolOp::DeleteResponse(r)
        | ProtocolOp::CompareResponse(r)
            if actual == expected =>
        {
            Ok(r)
        }
        _ => Err(ConnectionError::UnexpectedResponse { expected, actual }.into()),
    }
}

fn take_bind_response(op: ProtocolOp) -> Result<BindResponse> {
    match op {
        ProtocolOp::BindResponse(r) => Ok(r),
        other => Err(ConnectionError::UnexpectedResponse {
            expected: "bindResponse",
            actual: other.name(),
        }
        .into()),
    }
}
