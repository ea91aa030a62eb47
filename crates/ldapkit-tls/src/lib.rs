//! # ldapkit-tls
//!
//! TLS support for LDAP connections, built on rustls.
//!
//! LDAP uses TLS in two ways:
//!
//! - **LDAPS**: the handshake starts right after the TCP connection is
//!   established (`ldaps://`, usually port 636).
//! - **StartTLS**: the connection starts in plain text and is upgraded after
//!   a successful StartTLS extended operation (RFC 4513 §3).
//!
//! Both paths use the same [`TlsConnector`]; the client decides when to call
//! it.
//!
//! ## Features
//!
//! - Mozilla root certificates by default, custom CA bundles from file or
//!   memory
//! - Host name verification on by default, with an explicit opt-out that
//!   still validates the chain
//! - Client certificates for SASL EXTERNAL
//! - `danger_accept_invalid_certs` for test servers with self-signed
//!   certificates

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod config;
mod connector;
mod error;
mod verifier;

pub use config::{TlsConfig, TlsConfigBuilder};
pub use connector::{TlsConnector, server_name};
pub use error::TlsError;

pub use tokio_rustls::client::TlsStream;
