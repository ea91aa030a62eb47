//! Connection creation and lifecycle hooks.
//!
//! A [`ConnectionManager`] opens and closes connections. A
//! [`ConnectionLifecycle`] decides whether a pooled connection is still
//! usable and prepares it for each borrower.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::PoolError;

/// Opens and closes the connections a pool hands out.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// The pooled connection type.
    type Connection: Send + 'static;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, PoolError>;

    /// Close a connection the pool is discarding.
    async fn disconnect(&self, conn: Self::Connection);
}

/// Result of validating a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckResult {
    /// The connection works.
    Healthy,
    /// The connection must be discarded.
    Unhealthy(String),
}

impl HealthCheckResult {
    /// Whether the connection passed.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Hooks the pool runs around each connection's use.
///
/// All methods have permissive defaults.
#[async_trait]
pub trait ConnectionLifecycle<C: Send>: Send + Sync {
    /// Check that `conn` is still usable.
    async fn validate(&self, conn: &mut C) -> HealthCheckResult {
        let _ = conn;
        HealthCheckResult::Healthy
    }

    /// Prepare `conn` after checkout, before the borrower sees it.
    async fn activate(&self, conn: &mut C) -> Result<(), PoolError> {
        let _ = conn;
        Ok(())
    }

    /// Clean up `conn` at checkin, before it can be reused.
    async fn passivate(&self, conn: &mut C) -> Result<(), PoolError> {
        let _ = conn;
        Ok(())
    }
}

/// Shared, type-erased lifecycle.
pub type DynConnectionLifecycle<C> = Arc<dyn ConnectionLifecycle<C>>;

/// Lifecycle that accepts every connection as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLifecycle;

#[async_trait]
impl<C: Send> ConnectionLifecycle<C> for NoopLifecycle {}

/// Where a pooled connection currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting in the idle queue.
    Idle,
    /// Checked out.
    InUse,
    /// Being validated by the maintenance task.
    Validating,
}

/// Bookkeeping the pool keeps for each connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-unique connection ID.
    pub id: u64,
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection last passed validation.
    pub last_validated: Option<Instant>,
    /// When the connection was last returned to the pool.
    pub last_returned: Instant,
    /// Number of times the connection has been checked out.
    pub checkouts: u64,
    /// Current state.
    pub state: ConnectionState,
}

impl ConnectionMetadata {
    pub(crate) fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_validated: None,
            last_returned: now,
            checkouts: 0,
            state: ConnectionState::Idle,
        }
    }

    /// Age of the connection.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection was last returned.
    pub fn idle_time(&self) -> std::time::Duration {
        self.last_returned.elapsed()
    }
}
