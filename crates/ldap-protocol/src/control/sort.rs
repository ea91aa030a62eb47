//! Server-side sorting controls (RFC 2891).
//!
//! ```text
//! SortKeyList ::= SEQUENCE OF SEQUENCE {
//!     attributeType   AttributeDescription,
//!     orderingRule    [0] MatchingRuleId OPTIONAL,
//!     reverseOrder    [1] BOOLEAN DEFAULT FALSE }
//!
//! SortResult ::= SEQUENCE {
//!     sortResult  ENUMERATED,
//!     attributeType [0] AttributeDescription OPTIONAL }
//! ```

use bytes::Bytes;

use super::{Control, ControlCodec, ControlValue, oid};
use crate::ber::{BerReader, BerWriter, decode_boolean, tag, utf8};
use crate::error::ProtocolError;
use crate::message::ResultCode;

const ORDERING_RULE: u8 = tag::context(0);
const REVERSE_ORDER: u8 = tag::context(1);
const ATTRIBUTE_TYPE: u8 = tag::context(0);

/// One sort criterion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortKey {
    /// Attribute to sort on.
    pub attribute: String,
    /// Matching rule used for ordering.
    pub ordering_rule: Option<String>,
    /// Sort descending.
    pub reverse: bool,
}

impl SortKey {
    /// Ascending sort on `attribute`.
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ordering_rule: None,
            reverse: false,
        }
    }

    /// Use a specific ordering rule.
    #[must_use]
    pub fn with_ordering_rule(mut self, rule: impl Into<String>) -> Self {
        self.ordering_rule = Some(rule.into());
        self
    }

    /// Sort descending.
    #[must_use]
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }
}

/// Sort request control.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortRequestControl {
    /// Sort keys in priority order.
    pub keys: Vec<SortKey>,
    /// Criticality flag.
    pub critical: bool,
}

impl SortRequestControl {
    /// Create a sort request.
    pub fn new(keys: Vec<SortKey>, critical: bool) -> Self {
        Self { keys, critical }
    }
}

impl ControlValue for SortRequestControl {
    const OID: &'static str = oid::SORT_REQUEST;

    fn criticality(&self) -> bool {
        self.critical
    }
}

impl ControlCodec for SortRequestControl {
    fn encode_value(&self) -> Result<Option<Bytes>, ProtocolError> {
        if self.keys.is_empty() {
            return Err(ProtocolError::invalid_control(
                Self::OID,
                "at least one sort key is required",
            ));
        }
        let mut w = BerWriter::new();
        w.write_sequence(|list| {
            for key in &self.keys {
                list.write_sequence(|seq| {
                    seq.write_octet_string(key.attribute.as_bytes());
                    if let Some(rule) = &key.ordering_rule {
                        seq.write_tlv(ORDERING_RULE, rule.as_bytes());
                    }
                    if key.reverse {
                        seq.write_boolean_tagged(REVERSE_ORDER, true);
                    }
                });
            }
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
        let mut list = r.read_sequence()?;
        let mut keys = Vec::new();
        while !list.is_empty() {
            let mut seq = list.read_sequence()?;
            let attribute = seq.read_string("sort attribute")?;
            let ordering_rule = seq
                .read_optional(ORDERING_RULE)?
                .map(|v| utf8(v, "ordering rule"))
                .transpose()?;
            let reverse = seq
                .read_optional(REVERSE_ORDER)?
                .map(decode_boolean)
                .transpose()?
                .unwrap_or(false);
            seq.finish("sort key")?;
            keys.push(SortKey {
                attribute,
                ordering_rule,
                reverse,
            });
        }
        r.finish("sort request control")?;
        Ok(Self { keys, critical })
    }
}

/// Sort response control.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortResponseControl {
    /// Outcome of the sort.
    pub result: ResultCode,
    /// Attribute that caused a failure.
    pub attribute: Option<String>,
    /// Criticality flag.
    pub critical: bool,
}

impl SortResponseControl {
    /// Create a sort response.
    pub fn new(result: ResultCode, attribute: Option<String>, critical: bool) -> Self {
        Self {
            result,
            attribute,
            critical,
        }
    }
}

impl ControlValue for SortResponseControl {
    const OID: &'static str = oid::SORT_RESPONSE;

    fn criticality(&self) -> bool {
        self.critical
    }
}

impl ControlCodec for SortResponseControl {
    fn encode_value(&self) -> Result<Option<Bytes>, ProtocolError> {
        let mut w = BerWriter::new();
        w.write_sequence(|seq| {
            seq.write_enumerated(i64::from(self.result.code()));
            if let Some(attribute) = &self.attribute {
                seq.write_tlv(ATTRIBUTE_TYPE, attribute.as_bytes());
            }
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
        let code = seq.read_enumerated()?;
        let code = i32::try_from(code).map_err(|_| ProtocolError::InvalidField {
            field: "sort result",
            value: code,
        })?;
        let attribute = seq
            .read_optional(ATTRIBUTE_TYPE)?
            .map(|v| utf8(v, "sort attribute"))
            .transpose()?;
        seq.finish("sort response control")?;
        r.finish("sort response control")?;
        Ok(Self {
            result: ResultCode::from_code(code),
            attribute,
            critical,
        })
    }
}
