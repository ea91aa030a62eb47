//! Pooling LDAP connections.

use std::sync::Arc;

use async_trait::async_trait;
use ldapkit_client::{Connection, ConnectionConfig, ConnectionFactory, SearchRequest, TransportFactory};

use crate::error::PoolError;
use crate::lifecycle::{ConnectionLifecycle, ConnectionManager, HealthCheckResult};
use crate::pool::{Pool, PooledConnection};

/// Opens bound LDAP connections through a [`TransportFactory`].
#[derive(Debug, Clone)]
pub struct LdapConnectionManager {
    factory: Arc<TransportFactory>,
}

impl LdapConnectionManager {
    /// Create a manager using `factory`.
    pub fn new(factory: Arc<TransportFactory>) -> Self {
        Self { factory }
    }

    /// Create a manager from a connection configuration.
    pub fn from_config(config: ConnectionConfig) -> Result<Self, PoolError> {
        Ok(Self::new(Arc::new(TransportFactory::new(config)?)))
    }

    /// The underlying factory.
    pub fn factory(&self) -> &Arc<TransportFactory> {
        &self.factory
    }
}

#[async_trait]
impl ConnectionManager for LdapConnectionManager {
    type Connection = Connection;

    async fn connect(&self) -> Result<Connection, PoolError> {
        Ok(self.factory.connect().await?)
    }

    async fn disconnect(&self, mut conn: Connection) {
        conn.close().await;
    }
}

/// Validates pooled LDAP connections with a search and restores their
/// configured identity.
///
/// The default validation search reads the root DSE and requires at least
/// one entry back. When a borrower bound the connection as someone else,
/// activation binds it again with the configured credentials.
#[derive(Debug, Clone)]
pub struct LdapLifecycle {
    factory: Arc<TransportFactory>,
    validator: SearchRequest,
}

impl LdapLifecycle {
    /// Create a lifecycle re-binding through `factory`.
    pub fn new(factory: Arc<TransportFactory>) -> Self {
        Self {
            factory,
            validator: SearchRequest::root_dse(&["1.1"]),
        }
    }

    /// Use `request` as the validation search.
    #[must_use]
    pub fn with_validator(mut self, request: SearchRequest) -> Self {
        self.validator = request;
        self
    }
}

#[async_trait]
impl ConnectionLifecycle<Connection> for LdapLifecycle {
    async fn validate(&self, conn: &mut Connection) -> HealthCheckResult {
        if !conn.is_open() {
            return HealthCheckResult::Unhealthy("connection closed".into());
        }
        match conn.search(&self.validator).await {
            Ok(result) if !result.is_empty() => HealthCheckResult::Healthy,
            Ok(_) => HealthCheckResult::Unhealthy("validation search returned no entries".into()),
            Err(e) => HealthCheckResult::Unhealthy(e.to_string()),
        }
    }

    async fn activate(&self, conn: &mut Connection) -> Result<(), PoolError> {
        if conn.identity_changed() {
            tracing::debug!(
                connection_id = conn.id(),
                identity = conn.identity(),
                "restoring configured identity"
            );
            self.factory.bind(conn).await?;
        }
        Ok(())
    }

    async fn passivate(&self, conn: &mut Connection) -> Result<(), PoolError> {
        if conn.is_open() {
            Ok(())
        } else {
            Err(PoolError::Lifecycle(format!(
                "connection {} closed while checked out",
                conn.id()
            )))
        }
    }
}

#[async_trait]
impl<M> ConnectionFactory for Pool<M>
where
    M: ConnectionManager<Connection = Connection>,
{
    type Handle = PooledConnection<M>;

    async fn get_connection(&self) -> ldapkit_client::Result<PooledConnection<M>> {
        Ok(self.get().await?)
    }
}
