//! # ldapkit-pool
//!
//! Bounded connection pool for LDAP with lifecycle management.
//!
//! The pool is generic over a [`ConnectionManager`]; [`LdapConnectionManager`]
//! and [`LdapLifecycle`] plug in LDAP connections from `ldapkit-client`.
//!
//! ## Features
//!
//! - Strict FIFO checkout with direct hand-off to waiting callers
//! - Most recently returned connection reused first
//! - Validation on checkout, on checkin and periodically while idle
//! - Activation and passivation hooks (re-bind after a user bind)
//! - Pruning of idle connections down to `min_connections`
//! - Background replacement with exponential backoff
//! - Status and metrics for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ldapkit_client::{ConnectionConfig, TransportFactory};
//! use ldapkit_pool::{LdapConnectionManager, LdapLifecycle, Pool, PoolConfig};
//!
//! let factory = Arc::new(TransportFactory::new(ConnectionConfig::from_properties(
//!     "ldap_url=ldap://ldap.example.com;bind_dn=cn=admin,dc=example,dc=com;bind_credential=secret",
//! )?)?);
//!
//! let pool = Pool::builder(LdapConnectionManager::new(Arc::clone(&factory)))
//!     .pool_config(PoolConfig::from_properties("min_connections=2;max_connections=10")?)
//!     .lifecycle(LdapLifecycle::new(factory))
//!     .build()
//!     .await?;
//!
//! let mut conn = pool.get().await?;
//! let entries = conn.search(&request).await?;
//! // Connection returned to the pool on drop
//!
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod ldap;
pub mod lifecycle;
pub mod pool;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::PoolError;

// Pool types
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection};

// Lifecycle management
pub use lifecycle::{
    ConnectionLifecycle, ConnectionManager, ConnectionMetadata, ConnectionState,
    DynConnectionLifecycle, HealthCheckResult, NoopLifecycle,
};

// LDAP integration
pub use ldap::{LdapConnectionManager, LdapLifecycle};
