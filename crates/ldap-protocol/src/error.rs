//! Protocol-level error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding LDAP protocol data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Input ended before a complete element was read.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// An element carried a different tag than the one required here.
    #[error("unexpected tag: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedTag {
        /// Tag required at this position.
        expected: u8,
        /// Tag actually found.
        actual: u8,
    },

    /// High tag number form, which LDAP never uses.
    #[error("unsupported multi-byte tag: {0:#04x}")]
    UnsupportedTag(u8),

    /// Indefinite length encoding, which LDAP forbids.
    #[error("indefinite length encoding is not permitted")]
    IndefiniteLength,

    /// A length field that cannot be represented.
    #[error("length field of {octets} octets is too large")]
    LengthTooLarge {
        /// Number of length octets announced.
        octets: usize,
    },

    /// An INTEGER or ENUMERATED with an invalid content length.
    #[error("invalid integer encoding of {length} octets")]
    InvalidInteger {
        /// Content length found.
        length: usize,
    },

    /// A BOOLEAN whose content is not exactly one octet.
    #[error("invalid boolean encoding of {length} octets")]
    InvalidBoolean {
        /// Content length found.
        length: usize,
    },

    /// A string field that is not valid UTF-8.
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 {
        /// Field name.
        field: &'static str,
    },

    /// A field value outside the range the protocol allows.
    #[error("invalid {field} value: {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Invalid value.
        value: i64,
    },

    /// Bytes left over after a complete structure was decoded.
    #[error("{remaining} trailing bytes after {context}")]
    TrailingData {
        /// Structure that was being decoded.
        context: &'static str,
        /// Number of unread bytes.
        remaining: usize,
    },

    /// Unknown protocolOp tag in an LDAPMessage.
    #[error("unknown protocol operation tag: {0:#04x}")]
    UnknownOperation(u8),

    /// Unknown filter choice tag.
    #[error("unknown filter tag: {0:#04x}")]
    UnknownFilter(u8),

    /// Malformed search filter string.
    #[error("invalid filter at position {position}: {reason}")]
    InvalidFilter {
        /// Byte offset of the problem in the filter string.
        position: usize,
        /// Description of the problem.
        reason: String,
    },

    /// A control whose OID has no registered codec.
    #[error("unsupported control: {oid}")]
    UnsupportedControl {
        /// OID of the control.
        oid: String,
    },

    /// A control value that does not match its codec's expectations.
    #[error("invalid control value for {oid}: {reason}")]
    InvalidControl {
        /// OID of the control.
        oid: String,
        /// Description of the problem.
        reason: String,
    },
}

impl ProtocolError {
    /// Create an invalid filter error.
    pub fn invalid_filter(position: usize, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            position,
            reason: reason.into(),
        }
    }

    /// Create an invalid control error.
    pub fn invalid_control(oid: &str, reason: impl Into<String>) -> Self {
        Self::InvalidControl {
            oid: oid.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while building a [`ControlRegistry`](crate::ControlRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// A second codec was registered for an OID and direction.
    #[error("duplicate {direction} codec for control {oid}")]
    DuplicateCodec {
        /// OID that was registered twice.
        oid: String,
        /// Either "request" or "response".
        direction: &'static str,
    },
}
