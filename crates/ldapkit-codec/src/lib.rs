//! # ldapkit-codec
//!
//! Async framing layer for LDAP messages.
//!
//! This crate turns a raw byte stream into a stream of decoded
//! [`LdapMessage`](ldap_protocol::LdapMessage)s and a sink accepting them,
//! reassembling messages split across TCP segments.
//!
//! ## Features
//!
//! - Message reassembly across reads using the outer BER length
//! - Inbound size limit against hostile peers
//! - Integration with tokio-util's codec framework

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod framed;
pub mod message_codec;

pub use error::CodecError;
pub use framed::MessageStream;
pub use message_codec::{DEFAULT_MAX_MESSAGE_SIZE, LdapCodec};
