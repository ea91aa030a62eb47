//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by the pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// No connection became available within the checkout timeout.
    #[error("pool exhausted: no connection available within {timeout:?}")]
    Exhausted {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The pool has been closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Every connection tried during checkout failed validation or
    /// activation.
    #[error("no healthy connection after {attempts} attempts")]
    Unhealthy {
        /// Connections tried.
        attempts: u32,
    },

    /// `initialize` could not create any connection.
    #[error("pool initialization failed after {attempts} attempts: {source}")]
    Initialization {
        /// Creation attempts made.
        attempts: u32,
        /// The last creation error.
        #[source]
        source: Box<PoolError>,
    },

    /// Creating a connection failed.
    #[error("connection error: {0}")]
    Connection(#[from] ldapkit_client::Error),

    /// An activation or passivation hook failed.
    #[error("lifecycle hook failed: {0}")]
    Lifecycle(String),

    /// Invalid pool configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Whether waiting and trying again could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Exhausted { .. } | Self::Unhealthy { .. } => true,
            Self::Connection(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<PoolError> for ldapkit_client::Error {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Connection(inner) => inner,
            other => ldapkit_client::Error::Pool(Box::new(other)),
        }
    }
}
