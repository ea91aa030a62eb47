//! Search filters: RFC 4515 string form and RFC 4511 BER form.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::ber::{BerReader, BerWriter, decode_boolean, tag, utf8};
use crate::error::ProtocolError;

const AND: u8 = tag::context_constructed(0);
const OR: u8 = tag::context_constructed(1);
const NOT: u8 = tag::context_constructed(2);
const EQUALITY: u8 = tag::context_constructed(3);
const SUBSTRINGS: u8 = tag::context_constructed(4);
const GREATER_OR_EQUAL: u8 = tag::context_constructed(5);
const LESS_OR_EQUAL: u8 = tag::context_constructed(6);
const PRESENT: u8 = tag::context(7);
const APPROX: u8 = tag::context_constructed(8);
const EXTENSIBLE: u8 = tag::context_constructed(9);

/// A search filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Filter {
    /// All sub-filters match.
    And(Vec<Filter>),
    /// Any sub-filter matches.
    Or(Vec<Filter>),
    /// The sub-filter does not match.
    Not(Box<Filter>),
    /// `(attr=value)`
    Equality {
        /// Attribute description.
        attribute: String,
        /// Assertion value.
        value: Bytes,
    },
    /// `(attr=ini*any*fin)`
    Substrings {
        /// Attribute description.
        attribute: String,
        /// Leading component.
        initial: Option<Bytes>,
        /// Middle components, in order.
        any: Vec<Bytes>,
        /// Trailing component.
        final_: Option<Bytes>,
    },
    /// `(attr>=value)`
    GreaterOrEqual {
        /// Attribute description.
        attribute: String,
        /// Assertion value.
        value: Bytes,
    },
    /// `(attr<=value)`
    LessOrEqual {
        /// Attribute description.
        attribute: String,
        /// Assertion value.
        value: Bytes,
    },
    /// `(attr=*)`
    Present(String),
    /// `(attr~=value)`
    Approx {
        /// Attribute description.
        attribute: String,
        /// Assertion value.
        value: Bytes,
    },
    /// `(attr:dn:rule:=value)`
    Extensible {
        /// Matching rule OID or name.
        matching_rule: Option<String>,
        /// Attribute description.
        attribute: Option<String>,
        /// Assertion value.
        value: Bytes,
        /// Whether DN attributes also participate.
        dn_attributes: bool,
    },
}

impl Filter {
    /// Parse a filter in RFC 4515 string form.
    ///
    /// A filter without surrounding parentheses, such as `uid=jdoe`, is
    /// accepted as a single item.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::invalid_filter(0, "empty filter"));
        }
        let wrapped;
        let source = if trimmed.starts_with('(') {
            trimmed
        } else {
            wrapped = format!("({trimmed})");
            wrapped.as_str()
        };

        let mut parser = Parser {
            input: source.as_bytes(),
            pos: 0,
        };
        let filter = parser.parse_filter()?;
        if parser.pos != parser.input.len() {
            return Err(ProtocolError::invalid_filter(
                parser.pos,
                "unexpected characters after filter",
            ));
        }
        Ok(filter)
    }

    /// Shorthand for `(attribute=*)`.
    pub fn present(attribute: impl Into<String>) -> Self {
        Self::Present(attribute.into())
    }

    /// Shorthand for `(attribute=value)`.
    pub fn equality(attribute: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self::Equality {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Encode this filter into `w`.
    pub fn encode(&self, w: &mut BerWriter) {
        match self {
            Self::And(filters) => w.write_constructed(AND, |inner| {
                for f in filters {
                    f.encode(inner);
                }
            }),
            Self::Or(filters) => w.write_constructed(OR, |inner| {
                for f in filters {
                    f.encode(inner);
                }
            }),
            Self::Not(filter) => w.write_constructed(NOT, |inner| filter.encode(inner)),
            Self::Equality { attribute, value } => encode_ava(w, EQUALITY, attribute, value),
            Self::GreaterOrEqual { attribute, value } => {
                encode_ava(w, GREATER_OR_EQUAL, attribute, value);
            }
            Self::LessOrEqual { attribute, value } => {
                encode_ava(w, LESS_OR_EQUAL, attribute, value);
            }
            Self::Approx { attribute, value } => encode_ava(w, APPROX, attribute, value),
            Self::Present(attribute) => w.write_tlv(PRESENT, attribute.as_bytes()),
            Self::Substrings {
                attribute,
                initial,
                any,
                final_,
            } => w.write_constructed(SUBSTRINGS, |inner| {
                inner.write_octet_string(attribute.as_bytes());
                inner.write_sequence(|parts| {
                    if let Some(initial) = initial {
                        parts.write_tlv(tag::context(0), initial);
                    }
                    for a in any {
                        parts.write_tlv(tag::context(1), a);
                    }
                    if let Some(final_) = final_ {
                        parts.write_tlv(tag::context(2), final_);
                    }
                });
            }),
            Self::Extensible {
                matching_rule,
                attribute,
                value,
                dn_attributes,
            } => w.write_constructed(EXTENSIBLE, |inner| {
                if let Some(rule) = matching_rule {
                    inner.write_tlv(tag::context(1), rule.as_bytes());
                }
                if let Some(attribute) = attribute {
                    inner.write_tlv(tag::context(2), attribute.as_bytes());
                }
                inner.write_tlv(tag::context(3), value);
                if *dn_attributes {
                    inner.write_boolean_tagged(tag::context(4), true);
                }
            }),
        }
    }

    /// Decode the next filter from `r`.
    pub fn decode(r: &mut BerReader<'_>) -> Result<Self, ProtocolError> {
        let (tag, content) = r.read_tlv()?;
        let mut inner = BerReader::new(content);
        let filter = match tag {
            AND | OR => {
                let mut filters = Vec::new();
                while !inner.is_empty() {
                    filters.push(Self::decode(&mut inner)?);
                }
                if tag == AND {
                    Self::And(filters)
                } else {
                    Self::Or(filters)
                }
            }
            NOT => Self::Not(Box::new(Self::decode(&mut inner)?)),
            EQUALITY | GREATER_OR_EQUAL | LESS_OR_EQUAL | APPROX => {
                let attribute = inner.read_string("filter attribute")?;
                let value = Bytes::copy_from_slice(inner.read_octet_string()?);
                match tag {
                    EQUALITY => Self::Equality { attribute, value },
                    GREATER_OR_EQUAL => Self::GreaterOrEqual { attribute, value },
                    LESS_OR_EQUAL => Self::LessOrEqual { attribute, value },
                    _ => Self::Approx { attribute, value },
                }
            }
            // primitive: the attribute is the whole content
            PRESENT => return utf8(content, "filter attribute").map(Self::Present),
            SUBSTRINGS => {
                let attribute = inner.read_string("filter attribute")?;
                let mut parts = inner.read_sequence()?;
                let (mut initial, mut any, mut final_) = (None, Vec::new(), None);
                while !parts.is_empty() {
                    let (part_tag, value) = parts.read_tlv()?;
                    let value = Bytes::copy_from_slice(value);
                    match part_tag {
                        0x80 => initial = Some(value),
                        0x81 => any.push(value),
                        0x82 => final_ = Some(value),
                        other => return Err(ProtocolError::UnknownFilter(other)),
                    }
                }
                Self::Substrings {
                    attribute,
                    initial,
                    any,
                    final_,
                }
            }
            EXTENSIBLE => {
                let matching_rule = inner
                    .read_optional(tag::context(1))?
                    .map(|v| utf8(v, "matching rule"))
                    .transpose()?;
                let attribute = inner
                    .read_optional(tag::context(2))?
                    .map(|v| utf8(v, "filter attribute"))
                    .transpose()?;
                let value = Bytes::copy_from_slice(inner.read_expected(tag::context(3))?);
                let dn_attributes = inner
                    .read_optional(tag::context(4))?
                    .map(decode_boolean)
                    .transpose()?
                    .unwrap_or(false);
                Self::Extensible {
                    matching_rule,
                    attribute,
                    value,
                    dn_attributes,
                }
            }
            other => return Err(ProtocolError::UnknownFilter(other)),
        };
        inner.finish("filter")?;
        Ok(filter)
    }
}

fn encode_ava(w: &mut BerWriter, tag: u8, attribute: &str, value: &[u8]) {
    w.write_constructed(tag, |inner| {
        inner.write_octet_string(attribute.as_bytes());
        inner.write_octet_string(value);
    });
}

impl FromStr for Filter {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(filters) => {
                write!(f, "(&")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                write!(f, ")")
            }
            Self::Or(filters) => {
                write!(f, "(|")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                write!(f, ")")
            }
            Self::Not(filter) => write!(f, "(!{filter})"),
            Self::Equality { attribute, value } => {
                write!(f, "({attribute}={})", escape_bytes(value))
            }
            Self::GreaterOrEqual { attribute, value } => {
                write!(f, "({attribute}>={})", escape_bytes(value))
            }
            Self::LessOrEqual { attribute, value } => {
                write!(f, "({attribute}<={})", escape_bytes(value))
            }
            Self::Approx { attribute, value } => {
                write!(f, "({attribute}~={})", escape_bytes(value))
            }
            Self::Present(attribute) => write!(f, "({attribute}=*)"),
            Self::Substrings {
                attribute,
                initial,
                any,
                final_,
            } => {
                write!(f, "({attribute}=")?;
                if let Some(initial) = initial {
                    write!(f, "{}", escape_bytes(initial))?;
                }
                write!(f, "*")?;
                for a in any {
                    write!(f, "{}*", escape_bytes(a))?;
                }
                if let Some(final_) = final_ {
                    write!(f, "{}", escape_bytes(final_))?;
                }
                write!(f, ")")
            }
            Self::Extensible {
                matching_rule,
                attribute,
                value,
                dn_attributes,
            } => {
                write!(f, "(")?;
                if let Some(attribute) = attribute {
                    write!(f, "{attribute}")?;
                }
                if *dn_attributes {
                    write!(f, ":dn")?;
                }
                if let Some(rule) = matching_rule {
                    write!(f, ":{rule}")?;
                }
                write!(f, ":={})", escape_bytes(value))
            }
        }
    }
}

/// Escape a value for inclusion in a string filter (RFC 4515 §3).
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            c => out.push(c),
        }
    }
    out
}

fn escape_bytes(value: &[u8]) -> String {
    match std::str::from_utf8(value) {
        Ok(s) => escape_value(s),
        Err(_) => value.iter().map(|b| format!("\\{b:02x}")).collect(),
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<(), ProtocolError> {
        match self.peek() {
            Some(found) if found == c => {
                self.pos += 1;
                Ok(())
            }
            Some(found) => Err(ProtocolError::invalid_filter(
                self.pos,
                format!("expected '{}', found '{}'", c as char, found as char),
            )),
            None => Err(ProtocolError::invalid_filter(
                self.pos,
                format!("expected '{}', found end of input", c as char),
            )),
        }
    }

    fn parse_filter(&mut self) -> Result<Filter, ProtocolError> {
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.parse_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.parse_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(ProtocolError::invalid_filter(self.pos, "unterminated filter")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn parse_list(&mut self) -> Result<Vec<Filter>, ProtocolError> {
        let mut filters = Vec::new();
        while self.peek() == Some(b'(') {
            filters.push(self.parse_filter()?);
        }
        Ok(filters)
    }

    fn parse_item(&mut self) -> Result<Filter, ProtocolError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            match c {
                b')' => break,
                b'(' => {
                    return Err(ProtocolError::invalid_filter(
                        self.pos,
                        "unescaped '(' in filter value",
                    ));
                }
                _ => self.pos += 1,
            }
        }
        let item = &self.input[start..self.pos];
        let eq = item
            .iter()
            .position(|&c| c == b'=')
            .ok_or_else(|| ProtocolError::invalid_filter(start, "missing '=' in filter item"))?;
        let raw_value = &item[eq + 1..];
        let value_offset = start + eq + 1;

        let (attribute_end, kind) = match eq.checked_sub(1).map(|i| item[i]) {
            Some(b'~') => (eq - 1, Some(b'~')),
            Some(b'>') => (eq - 1, Some(b'>')),
            Some(b'<') => (eq - 1, Some(b'<')),
            Some(b':') => (eq - 1, Some(b':')),
            _ => (eq, None),
        };
        let lhs = &item[..attribute_end];

        if kind == Some(b':') {
            return self.parse_extensible(lhs, start, raw_value, value_offset);
        }

        let attribute = parse_attribute(lhs, start)?;
        match kind {
            Some(b'~') => Ok(Filter::Approx {
                attribute,
                value: unescape(raw_value, value_offset)?,
            }),
            Some(b'>') => Ok(Filter::GreaterOrEqual {
                attribute,
                value: unescape(raw_value, value_offset)?,
            }),
            Some(b'<') => Ok(Filter::LessOrEqual {
                attribute,
                value: unescape(raw_value, value_offset)?,
            }),
            _ if raw_value == b"*" => Ok(Filter::Present(attribute)),
            _ if raw_value.contains(&b'*') => parse_substrings(attribute, raw_value, value_offset),
            _ => Ok(Filter::Equality {
                attribute,
                value: unescape(raw_value, value_offset)?,
            }),
        }
    }

    fn parse_extensible(
        &self,
        lhs: &[u8],
        offset: usize,
        raw_value: &[u8],
        value_offset: usize,
    ) -> Result<Filter, ProtocolError> {
        let text = std::str::from_utf8(lhs)
            .map_err(|_| ProtocolError::invalid_filter(offset, "invalid UTF-8"))?;
        let mut parts = text.split(':');
        let attribute = match parts.next() {
            Some("") | None => None,
            Some(attr) => Some(parse_attribute(attr.as_bytes(), offset)?),
        };

        let mut dn_attributes = false;
        let mut matching_rule = None;
        for part in parts {
            if part.eq_ignore_ascii_case("dn") && !dn_attributes && matching_rule.is_none() {
                dn_attributes = true;
            } else if matching_rule.is_none() && !part.is_empty() {
                matching_rule = Some(part.to_string());
            } else {
                return Err(ProtocolError::invalid_filter(
                    offset,
                    "malformed extensible match",
                ));
            }
        }
        if attribute.is_none() && matching_rule.is_none() {
            return Err(ProtocolError::invalid_filter(
                offset,
                "extensible match needs an attribute or a matching rule",
            ));
        }

        Ok(Filter::Extensible {
            matching_rule,
            attribute,
            value: unescape(raw_value, value_offset)?,
            dn_attributes,
        })
    }
}

fn parse_attribute(raw: &[u8], offset: usize) -> Result<String, ProtocolError> {
    if raw.is_empty() {
        return Err(ProtocolError::invalid_filter(offset, "missing attribute"));
    }
    if let Some(i) = raw
        .iter()
        .position(|&c| !(c.is_ascii_alphanumeric() || matches!(c, b'-' | b'.' | b';' | b'_')))
    {
        return Err(ProtocolError::invalid_filter(
            offset + i,
            "invalid character in attribute description",
        ));
    }
    // Validated as ASCII above.
    Ok(String::from_utf8_lossy(raw).into_owned())
}

fn parse_substrings(
    attribute: String,
    raw_value: &[u8],
    offset: usize,
) -> Result<Filter, ProtocolError> {
    let pieces: Vec<&[u8]> = raw_value.split(|&c| c == b'*').collect();
    let last = pieces.len() - 1;
    let mut initial = None;
    let mut any = Vec::new();
    let mut final_ = None;
    let mut piece_offset = offset;
    for (i, piece) in pieces.iter().enumerate() {
        if !piece.is_empty() {
            let value = unescape(piece, piece_offset)?;
            if i == 0 {
                initial = Some(value);
            } else if i == last {
                final_ = Some(value);
            } else {
                any.push(value);
            }
        }
        piece_offset += piece.len() + 1;
    }
    Ok(Filter::Substrings {
        attribute,
        initial,
        any,
        final_,
    })
}

fn unescape(raw: &[u8], offset: usize) -> Result<Bytes, ProtocolError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' {
            let hex = raw.get(i + 1..i + 3).ok_or_else(|| {
                ProtocolError::invalid_filter(offset + i, "truncated escape sequence")
            })?;
            let byte = std::str::from_utf8(hex)
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| {
                    ProtocolError::invalid_filter(offset + i, "invalid escape sequence")
                })?;
            out.push(byte);
            i += 3;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    Ok(Bytes::from(out))
}
