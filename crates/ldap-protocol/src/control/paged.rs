//! Simple paged results control (RFC 2696).
//!
//! ```text
//! realSearchControlValue ::= SEQUENCE {
//!     size    INTEGER (0..maxInt),
//!     cookie  OCTET STRING }
//! ```

use bytes::Bytes;

use super::{Control, ControlCodec, ControlValue, oid};
use crate::ber::{BerReader, BerWriter};
use crate::error::ProtocolError;

/// Paged results request/response.
///
/// In a request `size` is the page size; in a response it is the server's
/// estimate of the total result count. An empty cookie is normalised to
/// `None`: both mean there are no more pages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PagedResultsControl {
    /// Page size or result count estimate.
    pub size: i32,
    /// Continuation cookie.
    pub cookie: Option<Bytes>,
    /// Criticality flag.
    pub critical: bool,
}

impl PagedResultsControl {
    /// Request the first page of `size` entries.
    pub fn new(size: i32) -> Self {
        Self {
            size,
            cookie: None,
            critical: false,
        }
    }

    /// Set the cookie from a previous response.
    #[must_use]
    pub fn with_cookie(mut self, cookie: impl Into<Bytes>) -> Self {
        let cookie = cookie.into();
        self.cookie = if cookie.is_empty() { None } else { Some(cookie) };
        self
    }

    /// Set the criticality flag.
    #[must_use]
    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Whether the server indicated that more pages follow.
    pub fn has_more(&self) -> bool {
        self.cookie.as_ref().is_some_and(|c| !c.is_empty())
    }
}

impl ControlValue for PagedResultsControl {
    const OID: &'static str = oid::PAGED_RESULTS;

    fn criticality(&self) -> bool {
        self.critical
    }
}

impl ControlCodec for PagedResultsControl {
    fn encode_value(&self) -> Result<Option<Bytes>, ProtocolError> {
        if self.size < 0 {
            return Err(ProtocolError::invalid_control(
                Self::OID,
                format!("negative size {}", self.size),
            ));
        }
        let mut w = BerWriter::with_capacity(16);
        w.write_sequence(|seq| {
            seq.write_integer(i64::from(self.size));
            seq.write_octet_string(self.cookie.as_deref().unwrap_or_default());
        });
        Ok(Some(w.into_bytes()))
    }

    fn decode_value(
        critical: bool,
        value: Option<&[u8]>,
        _request: Option<&dyn Control>,
    ) -> Result<Self, ProtocolError> {
        let value =
            value.ok_or_else(|| ProtocolError::invalid_control(Self::OID, "missing value"))?;
        let mut r = BerReader::new(value);
        let mut seq = r.read_sequence()?;
        let size = seq.read_i32("paged results size")?;
        let cookie = seq.read_octet_string()?;
        seq.finish("paged results control")?;
        r.finish("paged results control")?;

        Ok(Self {
            size,
            cookie: (!cookie.is_empty()).then(|| Bytes::copy_from_slice(cookie)),
            critical,
        })
    }
}
