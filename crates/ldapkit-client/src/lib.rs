//! # ldapkit-client
//!
//! Async LDAP client: connections, transports, result caching and
//! abandonable asynchronous operations.
//!
//! A [`TransportFactory`] opens [`Connection`]s from a [`ConnectionConfig`],
//! negotiating LDAPS or StartTLS and binding with the configured
//! credentials. Connections are pooled by the `ldapkit-pool` crate.
//!
//! ## Features
//!
//! - **Failover**: ordered, round-robin or random endpoint selection
//! - **TLS**: LDAPS and StartTLS with hostname verification
//! - **SASL**: EXTERNAL, CRAM-MD5, DIGEST-MD5 and (feature `gssapi`) GSSAPI
//! - **Controls**: request and response controls through a codec registry
//! - **Caching**: LRU search result cache with time-to-live
//! - **Async operations**: streamed searches that can be abandoned
//! - **Paging**: simple paged results (RFC 2696)
//! - **Authentication**: DN resolution followed by a user bind
//!
//! ## Example
//!
//! ```rust,ignore
//! use ldapkit_client::{ConnectionConfig, SearchRequest, TransportFactory};
//! use ldapkit_auth::Credentials;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("ldap://ldap.example.com")?
//!         .use_start_tls(true)
//!         .credentials(Credentials::simple("cn=admin,dc=example,dc=com", "secret"));
//!
//!     let factory = TransportFactory::new(config)?;
//!     let mut conn = factory.connect().await?;
//!
//!     let request = SearchRequest::new("dc=example,dc=com", "(uid=jdoe)")?
//!         .attributes(["cn", "mail"]);
//!     for entry in conn.search(&request).await?.entries {
//!         println!("{}", entry.dn);
//!     }
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod async_ops;
pub mod authenticator;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod instrumentation;
pub mod paging;
pub mod request;
pub mod response;
pub mod state;
pub mod transport;

// Re-export commonly used types
pub use async_ops::{AsyncRequestRunner, AsyncSearch};
pub use authenticator::{
    AuthenticationRequest, AuthenticationResponse, AuthenticationResultCode, Authenticator,
    DnResolver, FormatDnResolver, SearchDnResolver,
};
pub use cache::{CacheConfig, CachingSearcher, ResultCache};
pub use config::{ConnectionConfig, FailoverStrategy, LdapUrl, Scheme};
pub use connection::Connection;
pub use error::{ConnectionError, ConnectionErrorKind, Error, OperationError, Result};
pub use factory::{ConnectionFactory, OwnedConnection, TransportFactory};
pub use ldapkit_auth::Credentials;
pub use paging::PagedResultsClient;
pub use request::{
    AddRequest, BindRequest, CompareRequest, DeleteRequest, ExtendedRequest, ModifyRequest,
    Request, SearchRequest,
};
pub use response::{
    CompareResult, ExtendedResult, OperationResult, Response, SearchItem, SearchResult,
};
pub use state::ConnectionState;
pub use transport::{DefaultTransport, TcpTransport, Transport};
