//! Connection establishment.
//!
//! [`TransportFactory`] turns a [`ConnectionConfig`] into ready
//! [`Connection`]s: it picks an endpoint, opens the transport, negotiates
//! TLS (`ldaps://` or StartTLS) and binds with the configured credentials.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use ldap_protocol::ControlRegistry;
use ldapkit_auth::{Credentials, create_mechanism};
use ldapkit_tls::TlsConnector;
use rand::seq::SliceRandom;
use tracing::Instrument;

use crate::config::{ConnectionConfig, FailoverStrategy, LdapUrl, Scheme};
use crate::connection::Connection;
use crate::error::{ConnectionError, Error, Result};
use crate::instrumentation::span_names;
use crate::request::BindRequest;
use crate::transport::{DefaultTransport, Transport};

/// Source of ready-to-use connections.
///
/// Implemented by [`TransportFactory`] (a fresh connection per call) and by
/// the connection pool (a checked-out connection).
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Handle giving access to the connection. Dropping it returns or
    /// closes the connection.
    type Handle: DerefMut<Target = Connection> + Send;

    /// Get a bound connection.
    async fn get_connection(&self) -> Result<Self::Handle>;
}

/// Opens, secures and binds connections.
#[derive(Debug)]
pub struct TransportFactory {
    config: Arc<ConnectionConfig>,
    transport: Arc<dyn Transport>,
    registry: Arc<ControlRegistry>,
    tls: Option<TlsConnector>,
    next_url: AtomicUsize,
}

impl TransportFactory {
    /// Create a factory. The configuration is validated and frozen.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let tls = config.tls.clone().map(TlsConnector::new);
        Ok(Self {
            config: Arc::new(config),
            transport: Arc::new(DefaultTransport::new()),
            registry: Arc::new(ControlRegistry::with_defaults()),
            tls,
            next_url: AtomicUsize::new(0),
        })
    }

    /// Use a custom transport instead of TCP / Unix sockets.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Use a custom control registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ControlRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// The frozen configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The control registry handed to every connection.
    pub fn registry(&self) -> &Arc<ControlRegistry> {
        &self.registry
    }

    /// Open a connection and bind with the configured credentials.
    pub async fn connect(&self) -> Result<Connection> {
        let span = tracing::debug_span!(span_names::CONNECT);
        async {
            let mut conn = self.open().await?;
            if let Err(e) = self.bind(&mut conn).await {
                conn.close().await;
                return Err(e);
            }
            tracing::info!(
                connection_id = conn.id(),
                url = %conn.url(),
                tls = conn.is_tls(),
                "connected"
            );
            Ok::<_, Error>(conn)
        }
        .instrument(span)
        .await
    }

    /// Open a secured but unbound connection.
    ///
    /// Endpoints are tried in failover order. Network and timeout failures
    /// move on to the next endpoint; TLS and configuration failures stop.
    pub async fn open(&self) -> Result<Connection> {
        let mut last_error = None;
        for url in self.candidates() {
            match self.open_url(url).await {
                Ok(conn) => return Ok(conn),
                Err(e) if e.is_transient() => {
                    tracing::warn!(url = %url, error = %e, "endpoint unavailable, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or(Error::Connection(ConnectionError::NoEndpoints)))
    }

    /// Bind `conn` with the configured credentials and make that its
    /// default identity.
    ///
    /// Also used to restore a pooled connection after a user bind.
    pub async fn bind(&self, conn: &mut Connection) -> Result<()> {
        let controls = self.config.bind_controls.clone();
        let outcome = match &self.config.credentials {
            Credentials::Anonymous => {
                if conn.identity().is_empty() {
                    Ok(())
                } else {
                    conn.bind(&BindRequest::new("", Bytes::new()).controls(controls))
                        .await
                        .map(drop)
                }
            }
            Credentials::Simple { dn, password } => conn
                .bind(&BindRequest::new(dn.clone(), Bytes::from(password.clone())).controls(controls))
                .await
                .map(drop),
            Credentials::Sasl(sasl) => {
                let host = conn.url().host().unwrap_or("localhost").to_string();
                let mut mechanism = create_mechanism(sasl, &host).map_err(ConnectionError::from)?;
                conn.bind_sasl(mechanism.as_mut(), &controls).await.map(drop)
            }
        };

        match outcome {
            Ok(()) => {
                conn.mark_default_identity();
                Ok(())
            }
            Err(Error::Operation(e)) => {
                tracing::warn!(code = %e.code, message = %e.message, "bind rejected");
                Err(ConnectionError::BindFailed {
                    code: e.code,
                    message: e.message,
                }
                .into())
            }
            Err(e) => Err(e),
        }
    }

    fn candidates(&self) -> Vec<&LdapUrl> {
        let mut urls: Vec<&LdapUrl> = self.config.urls.iter().collect();
        match self.config.failover {
            FailoverStrategy::Ordered => {}
            FailoverStrategy::RoundRobin => {
                if !urls.is_empty() {
                    let start = self.next_url.fetch_add(1, Ordering::Relaxed) % urls.len();
                    urls.rotate_left(start);
                }
            }
            FailoverStrategy::Random => urls.shuffle(&mut rand::thread_rng()),
        }
        urls
    }

    async fn open_url(&self, url: &LdapUrl) -> Result<Connection> {
        let timeout = self.config.connect_timeout;
        let stream = self.transport.connect(url, timeout).await?;
        let host = url.host().unwrap_or("localhost").to_string();

        let (stream, tls) = if url.scheme == Scheme::Ldaps {
            let connector = self.tls_connector()?;
            let tls_stream = tokio::time::timeout(timeout, connector.connect(&host, stream))
                .await
                .map_err(|_| ConnectionError::Timeout {
                    during: "TLS handshake",
                    elapsed: timeout,
                })?
                .map_err(ConnectionError::from)?;
            let boxed: crate::transport::BoxedStream = Box::new(tls_stream);
            (boxed, true)
        } else {
            (stream, false)
        };

        let mut conn = Connection::new(url.clone(), stream, Arc::clone(&self.registry))
            .with_max_message_size(self.config.max_message_size)
            .with_response_timeout(self.config.response_timeout)
            .with_tls(tls);

        if self.config.use_start_tls && url.scheme == Scheme::Ldap {
            let connector = self.tls_connector()?;
            if let Err(e) = conn.start_tls(connector, &host).await {
                conn.close().await;
                return Err(e);
            }
        }
        Ok(conn)
    }

    fn tls_connector(&self) -> Result<&TlsConnector> {
        self.tls
            .as_ref()
            .ok_or_else(|| Error::Config("TLS is required but no TLS configuration is set".into()))
    }
}

#[async_trait]
impl ConnectionFactory for TransportFactory {
    type Handle = OwnedConnection;

    async fn get_connection(&self) -> Result<OwnedConnection> {
        Ok(OwnedConnection::new(self.connect().await?))
    }
}

/// A connection that is closed (with an unbind) when dropped.
#[derive(Debug)]
pub struct OwnedConnection {
    conn: Option<Connection>,
}

impl OwnedConnection {
    /// Take ownership of `conn`.
    pub fn new(conn: Connection) -> Self {
        Self { conn: Some(conn) }
    }

    /// Take the connection out; it is no longer closed on drop.
    pub fn into_inner(mut self) -> Option<Connection> {
        self.conn.take()
    }
}

impl Deref for OwnedConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection taken"),
        }
    }
}

impl DerefMut for OwnedConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("connection taken"),
        }
    }
}

impl Drop for OwnedConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if !conn.is_open() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { conn.close().await });
            }
            Err(_) => {
                tracing::debug!(connection_id = conn.id(), "no runtime, dropping without unbind");
            }
        }
    }
}
