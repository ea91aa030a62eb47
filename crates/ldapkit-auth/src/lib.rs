//! # ldapkit-auth
//!
//! Bind credentials and SASL mechanisms for LDAP connections.
//!
//! This crate knows nothing about the network. The client drives a
//! [`SaslMechanism`] with challenges taken from bind responses and sends the
//! responses back in new bind requests.
//!
//! ## Features
//!
//! - Anonymous, simple and SASL [`Credentials`]
//! - SASL EXTERNAL (identity from the TLS client certificate)
//! - SASL CRAM-MD5 (RFC 2195)
//! - SASL DIGEST-MD5 (RFC 2831) with server authentication (`rspauth`)
//! - SASL GSSAPI (RFC 4752) with the `gssapi` feature
//! - Credential zeroization on drop with the `zeroize` feature
//!
//! ## Example
//!
//! ```rust
//! use ldapkit_auth::{Credentials, SaslConfig, create_mechanism};
//!
//! let config = SaslConfig::cram_md5("tim", "tanstaaftanstaaf");
//! let mut mechanism = create_mechanism(&config, "ldap.example.com").unwrap();
//! let response = mechanism
//!     .evaluate_challenge(b"<1896.697170952@postoffice.reston.mci.net>")
//!     .unwrap();
//! assert_eq!(response, b"tim b913a602c7eda7a495b4e6e7334d3890");
//!
//! let credentials = Credentials::sasl(config);
//! assert_eq!(credentials.method_name(), "CRAM-MD5");
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod credentials;
pub mod error;
pub mod sasl;

pub use credentials::{Credentials, Mechanism, QualityOfProtection, SaslConfig, SecurityStrength};
pub use error::AuthError;
pub use sasl::{CramMd5, DigestMd5, External, Gssapi, SaslMechanism, create_mechanism};
