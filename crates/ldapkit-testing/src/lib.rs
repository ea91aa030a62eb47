//! # ldapkit-testing
//!
//! Test infrastructure for the ldapkit crates.
//!
//! ## Features
//!
//! - **Mock server**: an in-process LDAP server with an in-memory
//!   directory that records binds, searches and abandons
//! - **Containers**: a real OpenLDAP server through testcontainers
//!
//! ## Example
//!
//! ```rust,ignore
//! use ldapkit_client::{ConnectionConfig, Credentials, SearchRequest, TransportFactory};
//! use ldapkit_testing::MockLdapServer;
//!
//! #[tokio::test]
//! async fn finds_user() {
//!     let server = MockLdapServer::builder()
//!         .user("jdoe", "secret")
//!         .start()
//!         .await
//!         .unwrap();
//!
//!     let config = ConnectionConfig::new(&server.url()).unwrap();
//!     let mut conn = TransportFactory::new(config).unwrap().connect().await.unwrap();
//!     let found = conn
//!         .search(&SearchRequest::new("dc=example,dc=com", "(uid=jdoe)").unwrap())
//!         .await
//!         .unwrap();
//!     assert_eq!(found.len(), 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod container;
pub mod mock_server;

pub use container::{ContainerError, OpenLdapContainer};
pub use mock_server::{DEFAULT_BASE_DN, MockLdapServer, MockLdapServerBuilder};
