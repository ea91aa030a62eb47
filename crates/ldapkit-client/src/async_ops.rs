//! Background operations.
//!
//! [`AsyncRequestRunner`] runs searches on spawned tokio tasks and streams
//! results back over an unbounded channel. A running search can be
//! abandoned: the worker sends an LDAP Abandon request for the in-flight
//! message and stops reading. Results already queued stay available to the
//! consumer.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures_core::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{Error, OperationError, Result};
use crate::factory::ConnectionFactory;
use crate::instrumentation::span_names;
use crate::request::{Request, SearchRequest};
use crate::response::{Response, SearchItem, SearchResult};

type ActiveMap = Arc<Mutex<HashMap<u64, CancellationToken>>>;

/// Runs operations on background tasks.
pub struct AsyncRequestRunner<F> {
    factory: Arc<F>,
    next_id: AtomicU64,
    active: ActiveMap,
}

impl<F> AsyncRequestRunner<F>
where
    F: ConnectionFactory + 'static,
    F::Handle: 'static,
{
    /// Create a runner drawing connections from `factory`.
    pub fn new(factory: Arc<F>) -> Self {
        Self {
            factory,
            next_id: AtomicU64::new(1),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a search in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn execute(&self, request: SearchRequest) -> AsyncSearch {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.active.lock().insert(id, token.clone());

        let (sender, receiver) = mpsc::unbounded_channel();
        let factory = Arc::clone(&self.factory);
        let active = Arc::clone(&self.active);
        let worker_token = token.clone();
        let span = tracing::debug_span!(span_names::ASYNC_OPERATION, request_id = id);

        let task = tokio::spawn(
            async move {
                run_search(factory.as_ref(), &request, &sender, &worker_token, id).await;
                active.lock().remove(&id);
            }
            .instrument(span),
        );

        AsyncSearch {
            id,
            receiver,
            token,
            task,
        }
    }

    /// Run any request in the background and return its outcome through the
    /// join handle.
    pub fn spawn(&self, request: Request) -> JoinHandle<Result<Response>> {
        let factory = Arc::clone(&self.factory);
        let span = tracing::debug_span!(span_names::ASYNC_OPERATION, operation = request.name());
        tokio::spawn(
            async move {
                let mut conn = factory.get_connection().await?;
                conn.execute(&request).await
            }
            .instrument(span),
        )
    }

    /// Abandon the running search `request_id`.
    ///
    /// Returns `false` if no such search is running.
    pub fn abandon(&self, request_id: u64) -> bool {
        match self.active.lock().get(&request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of searches still running.
    pub fn active(&self) -> usize {
        self.active.lock().len()
    }
}

impl<F> std::fmt::Debug for AsyncRequestRunner<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRequestRunner")
            .field("active", &self.active.lock().len())
            .finish()
    }
}

async fn run_search<F: ConnectionFactory>(
    factory: &F,
    request: &SearchRequest,
    sender: &mpsc::UnboundedSender<Result<SearchItem>>,
    token: &CancellationToken,
    request_id: u64,
) {
    let mut conn = match factory.get_connection().await {
        Ok(conn) => conn,
        Err(e) => {
            deliver(sender, Err(e), request_id);
            return;
        }
    };
    let message_id = match conn.start_search(request).await {
        Ok(id) => id,
        Err(e) => {
            deliver(sender, Err(e), request_id);
            return;
        }
    };

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::debug!(request_id = request_id, message_id = message_id, "search abandoned");
                if let Err(e) = conn.abandon(message_id).await {
                    tracing::warn!(request_id = request_id, error = %e, "abandon request failed");
                }
                return;
            }
            item = conn.next_search_item(message_id, &request.controls) => {
                match item {
                    Ok(SearchItem::Done(result, controls)) => {
                        let item = if result.is_success() {
                            Ok(SearchItem::Done(result, controls))
                        } else {
                            Err(Error::from(OperationError::new(result, controls)))
                        };
                        deliver(sender, item, request_id);
                        return;
                    }
                    Ok(item) => deliver(sender, Ok(item), request_id),
                    Err(e) => {
                        deliver(sender, Err(e), request_id);
                        return;
                    }
                }
            }
        }
    }
}

fn deliver(
    sender: &mpsc::UnboundedSender<Result<SearchItem>>,
    item: Result<SearchItem>,
    request_id: u64,
) {
    if sender.send(item).is_err() {
        tracing::warn!(request_id = request_id, "result receiver gone, dropping item");
    }
}

/// Handle to a background search.
///
/// Yields each entry and reference as it arrives, then the final
/// [`SearchItem::Done`], or an error. The stream ends after the final item,
/// or without one if the search was abandoned.
#[derive(Debug)]
pub struct AsyncSearch {
    id: u64,
    receiver: mpsc::UnboundedReceiver<Result<SearchItem>>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl AsyncSearch {
    /// Runner-assigned request ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Abandon the search. Results already received remain readable.
    pub fn abandon(&self) {
        self.token.cancel();
    }

    /// Whether the worker task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Next result, or `None` once the stream is over.
    pub async fn next_item(&mut self) -> Option<Result<SearchItem>> {
        self.receiver.recv().await
    }

    /// Wait for the whole search and collect it.
    pub async fn collect(mut self) -> Result<SearchResult> {
        let mut result = SearchResult::empty();
        while let Some(item) = self.receiver.recv().await {
            match item? {
                SearchItem::Entry(entry) => result.entries.push(entry),
                SearchItem::Reference(urls) => result.references.extend(urls),
                SearchItem::Done(done, controls) => {
                    result.result = done;
                    result.controls = controls;
                    return Ok(result);
                }
            }
        }
        Err(Error::Connection(crate::error::ConnectionError::Closed {
            reason: Some("search ended without a result".into()),
        }))
    }
}

impl Stream for AsyncSearch {
    type Item = Result<SearchItem>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::LdapUrl;
    use crate::connection::Connection;
    use crate::factory::OwnedConnection;
    use async_trait::async_trait;
    use futures_util::{SinkExt, StreamExt};
    use ldap_protocol::message::{PartialAttribute, SearchResultEntry};
    use ldap_protocol::{ControlRegistry, LdapMessage, LdapResult, ProtocolOp, ResultCode};
    use ldapkit_codec::MessageStream;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    /// Hands out one in-memory connection.
    struct OneShotFactory {
        stream: Mutex<Option<DuplexStream>>,
    }

    #[async_trait]
    impl ConnectionFactory for OneShotFactory {
        type Handle = OwnedConnection;

        async fn get_connection(&self) -> Result<OwnedConnection> {
            let stream = self.stream.lock().take().unwrap();
            Ok(OwnedConnection::new(Connection::new(
                LdapUrl::parse("ldap://localhost").unwrap(),
                Box::new(stream),
                Arc::new(ControlRegistry::with_defaults()),
            )))
        }
    }

    fn runner() -> (AsyncRequestRunner<OneShotFactory>, MessageStream<DuplexStream>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let factory = Arc::new(OneShotFactory {
            stream: Mutex::new(Some(client)),
        });
        (AsyncRequestRunner::new(factory), MessageStream::new(server))
    }

    fn entry(n: usize) -> ProtocolOp {
        ProtocolOp::SearchResultEntry(SearchResultEntry {
            dn: format!("uid=user{n},dc=example,dc=com"),
            attributes: vec![PartialAttribute::new("uid", [format!("user{n}")])],
        })
    }

    #[tokio::test]
    async fn test_streams_results() {
        let (runner, mut server) = runner();
        tokio::spawn(async move {
            let req = server.next().await.unwrap().unwrap();
            for n in 0..3 {
                server.send(LdapMessage::new(req.message_id, entry(n))).await.unwrap();
            }
            server
                .send(LdapMessage::new(
                    req.message_id,
                    ProtocolOp::SearchResultDone(LdapResult::success()),
                ))
                .await
                .unwrap();
            let _ = server.next().await;
        });

        let request = SearchRequest::new("dc=example,dc=com", "(uid=*)").unwrap();
        let search = runner.execute(request);
        let result = search.collect().await.unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result.entries[2].first_value("uid"), Some("user2"));
    }

    #[tokio::test]
    async fn test_abandon_sends_abandon_request() {
        let (runner, mut server) = runner();
        let (abandoned_tx, abandoned_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let req = server.next().await.unwrap().unwrap();
            server.send(LdapMessage::new(req.message_id, entry(0))).await.unwrap();
            let abandon = server.next().await.unwrap().unwrap();
            abandoned_tx.send((req.message_id, abandon.op)).unwrap();
            let _ = server.next().await;
        });

        let request = SearchRequest::new("dc=example,dc=com", "(uid=*)").unwrap();
        let mut search = runner.execute(request);
        let first = search.next().await.unwrap().unwrap();
        assert!(matches!(first, SearchItem::Entry(_)));

        assert!(runner.abandon(search.id()));
        let (search_id, op) = abandoned_rx.await.unwrap();
        assert_eq!(op, ProtocolOp::AbandonRequest(search_id));

        assert!(search.next().await.is_none());
        assert_eq!(runner.active(), 0);
        assert!(!runner.abandon(search.id()));
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_stop_worker() {
        let (runner, mut server) = runner();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let req = server.next().await.unwrap().unwrap();
            for n in 0..5 {
                server.send(LdapMessage::new(req.message_id, entry(n))).await.unwrap();
            }
            server
                .send(LdapMessage::new(
                    req.message_id,
                    ProtocolOp::SearchResultDone(LdapResult::success()),
                ))
                .await
                .unwrap();
            done_tx.send(()).unwrap();
            let _ = server.next().await;
        });

        let search = runner.execute(SearchRequest::new("dc=example,dc=com", "(uid=*)").unwrap());
        drop(search);
        done_rx.await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while runner.active() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_failed_search_is_surfaced() {
        let (runner, mut server) = runner();
        tokio::spawn(async move {
            let req = server.next().await.unwrap().unwrap();
            server
                .send(LdapMessage::new(
                    req.message_id,
                    ProtocolOp::SearchResultDone(LdapResult::new(ResultCode::NoSuchObject, "")),
                ))
                .await
                .unwrap();
            let _ = server.next().await;
        });

        let search = runner.execute(SearchRequest::new("dc=missing", "(uid=*)").unwrap());
        let err = search.collect().await.unwrap_err();
        assert_eq!(err.result_code(), Some(ResultCode::NoSuchObject));
    }
}
