//! Tracing span names and field keys.
//!
//! Every LDAP operation runs inside a `tracing` span named from
//! [`span_names`], carrying the fields listed in [`attributes`]. Subscribers
//! can filter on these names without depending on log message text.

/// Span names for LDAP operations.
pub mod span_names {
    /// Span name for connection establishment, including TLS and bind.
    pub const CONNECT: &str = "ldap.connect";
    /// Span name for a bind.
    pub const BIND: &str = "ldap.bind";
    /// Span name for a StartTLS upgrade.
    pub const START_TLS: &str = "ldap.start_tls";
    /// Span name for a request run through `Connection::execute`.
    pub const EXECUTE: &str = "ldap.execute";
    /// Span name for a search.
    pub const SEARCH: &str = "ldap.search";
    /// Span name for a background operation.
    pub const ASYNC_OPERATION: &str = "ldap.async_operation";
    /// Span name for user authentication.
    pub const AUTHENTICATE: &str = "ldap.authenticate";
}

/// Field keys recorded on spans and events.
pub mod attributes {
    /// Connection identifier.
    pub const CONNECTION_ID: &str = "ldap.connection_id";
    /// Server URL.
    pub const SERVER_URL: &str = "server.url";
    /// Operation name.
    pub const OPERATION: &str = "ldap.operation";
    /// LDAP message ID.
    pub const MESSAGE_ID: &str = "ldap.message_id";
    /// LDAP result code.
    pub const RESULT_CODE: &str = "ldap.result_code";
    /// Search base DN.
    pub const BASE_DN: &str = "ldap.base_dn";
    /// Error type.
    pub const ERROR_TYPE: &str = "error.type";
}

/// Short label for an error, recorded under [`attributes::ERROR_TYPE`].
pub fn error_type(error: &crate::Error) -> &'static str {
    use crate::error::{ConnectionErrorKind, Error};

    match error {
        Error::Connection(e) => match e.kind() {
            ConnectionErrorKind::Network => "network",
            ConnectionErrorKind::Timeout => "timeout",
            ConnectionErrorKind::Tls => "tls",
            ConnectionErrorKind::Authentication => "authentication",
            ConnectionErrorKind::Protocol => "protocol",
            ConnectionErrorKind::Closed => "closed",
            ConnectionErrorKind::Configuration => "configuration",
        },
        Error::Operation(_) => "operation",
        Error::UnsupportedControl { .. } => "unsupported_control",
        Error::Protocol(_) => "protocol",
        Error::Config(_) => "configuration",
        Error::InvalidRequest(_) => "invalid_request",
        Error::Pool(_) => "pool",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectionError, Error};

    #[test]
    fn test_span_names_are_namespaced() {
        for name in [
            span_names::CONNECT,
            span_names::BIND,
            span_names::START_TLS,
            span_names::EXECUTE,
            span_names::SEARCH,
            span_names::ASYNC_OPERATION,
            span_names::AUTHENTICATE,
        ] {
            assert!(name.starts_with("ldap."), "{name}");
        }
    }

    #[test]
    fn test_error_type() {
        assert_eq!(error_type(&Error::Config("x".into())), "configuration");
        assert_eq!(
            error_type(&Error::Connection(ConnectionError::NoEndpoints)),
            "configuration"
        );
        assert_eq!(
            error_type(&Error::UnsupportedControl { oid: "1.2".into() }),
            "unsupported_control"
        );
    }
}
