//! # ldap-protocol
//!
//! LDAPv3 wire protocol implementation.
//!
//! This crate provides the building blocks shared by the rest of the
//! workspace. It performs no I/O.
//!
//! ## Features
//!
//! - **BER**: encoder and decoder for the LDAP subset of the Basic Encoding Rules
//! - **Messages**: the LDAPMessage envelope and every operation the client uses
//! - **Filters**: RFC 4515 string filters, parsed to and from their BER form
//! - **Controls**: typed request/response controls and an OID-keyed codec registry
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ldap_protocol::{Control, ControlRegistry, PagedResultsControl};
//!
//! let registry = ControlRegistry::with_defaults();
//! let controls: Vec<Arc<dyn Control>> =
//!     vec![Arc::new(PagedResultsControl::new(0).with_critical(true))];
//! let raw = registry.encode_all(&controls).unwrap();
//! assert_eq!(raw[0].value.as_deref(), Some(&[0x30, 0x05, 0x02, 0x01, 0x00, 0x04, 0x00][..]));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod ber;
pub mod control;
pub mod error;
pub mod filter;
pub mod message;

pub use control::registry::ControlRegistry;
pub use control::{
    Control, ControlCodec, ControlValue, ManageDsaItControl, PagedResultsControl,
    PasswordPolicyControl, PasswordPolicyError, RawControl, SortKey, SortRequestControl,
    SortResponseControl,
};
pub use error::{ProtocolError, RegistryError};
pub use filter::Filter;
pub use message::{LdapMessage, LdapResult, MessageId, ProtocolOp, ResultCode};
