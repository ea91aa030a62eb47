//! Codec error types.

use thiserror::Error;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// IO error during read/write operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol-level error from ldap-protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ldap_protocol::ProtocolError),

    /// Message larger than the configured limit.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Announced message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The stream did not start with an LDAPMessage SEQUENCE.
    #[error("invalid message header: tag {0:#04x}")]
    InvalidHeader(u8),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,
}

impl CodecError {
    /// Whether the underlying transport is unusable after this error.
    ///
    /// Framing errors leave the byte stream out of sync, so every variant
    /// except a per-message protocol error poisons the connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }
}
