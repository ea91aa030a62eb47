//! Basic Encoding Rules primitives.
//!
//! LDAP restricts BER to a small profile (RFC 4511 §5.1): single-octet tags,
//! definite lengths only, and minimal two's-complement integers. The writer
//! always emits that profile; the reader accepts long-form lengths of up to
//! four octets and rejects anything outside the profile.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Universal and LDAP-relevant tag values.
pub mod tag {
    /// BOOLEAN.
    pub const BOOLEAN: u8 = 0x01;
    /// INTEGER.
    pub const INTEGER: u8 = 0x02;
    /// OCTET STRING.
    pub const OCTET_STRING: u8 = 0x04;
    /// NULL.
    pub const NULL: u8 = 0x05;
    /// ENUMERATED.
    pub const ENUMERATED: u8 = 0x0A;
    /// SEQUENCE / SEQUENCE OF.
    pub const SEQUENCE: u8 = 0x30;
    /// SET / SET OF.
    pub const SET: u8 = 0x31;

    /// Context-specific primitive tag `[n]`.
    pub const fn context(n: u8) -> u8 {
        0x80 | n
    }

    /// Context-specific constructed tag `[n]`.
    pub const fn context_constructed(n: u8) -> u8 {
        0xA0 | n
    }

    /// Application primitive tag `[APPLICATION n]`.
    pub const fn application(n: u8) -> u8 {
        0x40 | n
    }

    /// Application constructed tag `[APPLICATION n]`.
    pub const fn application_constructed(n: u8) -> u8 {
        0x60 | n
    }
}

/// Longest length field accepted by the reader, in octets.
const MAX_LENGTH_OCTETS: usize = 4;

/// Identifier and length of a single TLV element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Tag octet.
    pub tag: u8,
    /// Number of octets used by tag and length.
    pub header_len: usize,
    /// Number of content octets.
    pub content_len: usize,
}

impl Header {
    /// Total encoded size of the element.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.header_len + self.content_len
    }
}

/// Parse the tag and length at the start of `data`.
///
/// Returns `Ok(None)` when more input is needed to read the header.
pub fn peek_header(data: &[u8]) -> Result<Option<Header>, ProtocolError> {
    let (Some(&tag), Some(&first)) = (data.first(), data.get(1)) else {
        return Ok(None);
    };
    if tag & 0x1F == 0x1F {
        return Err(ProtocolError::UnsupportedTag(tag));
    }
    if first < 0x80 {
        return Ok(Some(Header {
            tag,
            header_len: 2,
            content_len: usize::from(first),
        }));
    }

    let octets = usize::from(first & 0x7F);
    if octets == 0 {
        return Err(ProtocolError::IndefiniteLength);
    }
    if octets > MAX_LENGTH_OCTETS {
        return Err(ProtocolError::LengthTooLarge { octets });
    }
    let Some(length_bytes) = data.get(2..2 + octets) else {
        return Ok(None);
    };
    let content_len = length_bytes
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));

    Ok(Some(Header {
        tag,
        header_len: 2 + octets,
        content_len,
    }))
}

fn put_length(buf: &mut BytesMut, len: usize) {
    if len < 0x80 {
        buf.put_u8(len as u8);
        return;
    }
    let bytes = (len as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    buf.put_u8(0x80 | (bytes.len() - skip) as u8);
    buf.put_slice(&bytes[skip..]);
}

/// Minimal two's-complement encoding of `value`.
fn integer_content(value: i64) -> ([u8; 8], usize) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant_zero = bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0;
        let redundant_ones = bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0;
        if redundant_zero || redundant_ones {
            start += 1;
        } else {
            break;
        }
    }
    (bytes, start)
}

/// Decode a two's-complement INTEGER or ENUMERATED content.
pub fn decode_integer(content: &[u8]) -> Result<i64, ProtocolError> {
    if content.is_empty() || content.len() > 8 {
        return Err(ProtocolError::InvalidInteger {
            length: content.len(),
        });
    }
    let initial: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    Ok(content
        .iter()
        .fold(initial, |acc, &b| (acc << 8) | i64::from(b)))
}

/// Decode a BOOLEAN content. Any non-zero octet is true.
pub fn decode_boolean(content: &[u8]) -> Result<bool, ProtocolError> {
    match content {
        [b] => Ok(*b != 0),
        _ => Err(ProtocolError::InvalidBoolean {
            length: content.len(),
        }),
    }
}

/// Incremental BER encoder.
#[derive(Debug, Default, Clone)]
pub struct BerWriter {
    buf: BytesMut,
}

impl BerWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty writer with reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Write a complete element with the given tag and content.
    pub fn write_tlv(&mut self, tag: u8, content: &[u8]) {
        self.buf.reserve(content.len() + 6);
        self.buf.put_u8(tag);
        put_length(&mut self.buf, content.len());
        self.buf.put_slice(content);
    }

    /// Write an INTEGER.
    pub fn write_integer(&mut self, value: i64) {
        self.write_integer_tagged(tag::INTEGER, value);
    }

    /// Write an integer value under an implicit tag.
    pub fn write_integer_tagged(&mut self, tag: u8, value: i64) {
        let (bytes, start) = integer_content(value);
        self.write_tlv(tag, &bytes[start..]);
    }

    /// Write an ENUMERATED.
    pub fn write_enumerated(&mut self, value: i64) {
        self.write_integer_tagged(tag::ENUMERATED, value);
    }

    /// Write a BOOLEAN using the DER form (`0xFF` for true).
    pub fn write_boolean(&mut self, value: bool) {
        self.write_boolean_tagged(tag::BOOLEAN, value);
    }

    /// Write a boolean value under an implicit tag.
    pub fn write_boolean_tagged(&mut self, tag: u8, value: bool) {
        self.write_tlv(tag, &[if value { 0xFF } else { 0x00 }]);
    }

    /// Write an OCTET STRING.
    pub fn write_octet_string(&mut self, value: &[u8]) {
        self.write_tlv(tag::OCTET_STRING, value);
    }

    /// Write a NULL under the given tag.
    pub fn write_null(&mut self, tag: u8) {
        self.write_tlv(tag, &[]);
    }

    /// Write a constructed element whose content is produced by `f`.
    pub fn write_constructed<F>(&mut self, tag: u8, f: F)
    where
        F: FnOnce(&mut BerWriter),
    {
        let mut inner = BerWriter::new();
        f(&mut inner);
        self.write_tlv(tag, &inner.buf);
    }

    /// Write a SEQUENCE whose content is produced by `f`.
    pub fn write_sequence<F>(&mut self, f: F)
    where
        F: FnOnce(&mut BerWriter),
    {
        self.write_constructed(tag::SEQUENCE, f);
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// View the encoded bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer and return the encoded bytes.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    /// Consume the writer and return the underlying buffer.
    pub fn into_inner(self) -> BytesMut {
        self.buf
    }
}

/// Cursor-based BER decoder over a borrowed buffer.
#[derive(Debug, Clone)]
pub struct BerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    /// Create a reader over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Unread input.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Returns true if all input has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Tag of the next element, if any.
    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Read the next element, returning its tag and content.
    pub fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), ProtocolError> {
        let header = peek_header(self.remaining())?.ok_or(ProtocolError::UnexpectedEof)?;
        let start = self.pos + header.header_len;
        let end = start
            .checked_add(header.content_len)
            .ok_or(ProtocolError::UnexpectedEof)?;
        let content = self
            .data
            .get(start..end)
            .ok_or(ProtocolError::UnexpectedEof)?;
        self.pos = end;
        Ok((header.tag, content))
    }

    /// Read the next element, requiring the given tag.
    pub fn read_expected(&mut self, expected: u8) -> Result<&'a [u8], ProtocolError> {
        let actual = self.peek_tag().ok_or(ProtocolError::UnexpectedEof)?;
        if actual != expected {
            return Err(ProtocolError::UnexpectedTag { expected, actual });
        }
        let (_, content) = self.read_tlv()?;
        Ok(content)
    }

    /// Read the next element only if it carries the given tag.
    pub fn read_optional(&mut self, tag: u8) -> Result<Option<&'a [u8]>, ProtocolError> {
        if self.peek_tag() == Some(tag) {
            self.read_tlv().map(|(_, content)| Some(content))
        } else {
            Ok(None)
        }
    }

    /// Read an INTEGER.
    pub fn read_integer(&mut self) -> Result<i64, ProtocolError> {
        self.read_integer_tagged(tag::INTEGER)
    }

    /// Read an integer value under an implicit tag.
    pub fn read_integer_tagged(&mut self, tag: u8) -> Result<i64, ProtocolError> {
        decode_integer(self.read_expected(tag)?)
    }

    /// Read an INTEGER that must fit in an `i32`.
    pub fn read_i32(&mut self, field: &'static str) -> Result<i32, ProtocolError> {
        let value = self.read_integer()?;
        i32::try_from(value).map_err(|_| ProtocolError::InvalidField { field, value })
    }

    /// Read an ENUMERATED.
    pub fn read_enumerated(&mut self) -> Result<i64, ProtocolError> {
        self.read_integer_tagged(tag::ENUMERATED)
    }

    /// Read a BOOLEAN.
    pub fn read_boolean(&mut self) -> Result<bool, ProtocolError> {
        decode_boolean(self.read_expected(tag::BOOLEAN)?)
    }

    /// Read an OCTET STRING.
    pub fn read_octet_string(&mut self) -> Result<&'a [u8], ProtocolError> {
        self.read_expected(tag::OCTET_STRING)
    }

    /// Read an OCTET STRING holding UTF-8 text.
    pub fn read_string(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        utf8(self.read_octet_string()?, field)
    }

    /// Read a constructed element and return a reader over its content.
    pub fn read_constructed(&mut self, tag: u8) -> Result<BerReader<'a>, ProtocolError> {
        self.read_expected(tag).map(BerReader::new)
    }

    /// Read a SEQUENCE and return a reader over its content.
    pub fn read_sequence(&mut self) -> Result<BerReader<'a>, ProtocolError> {
        self.read_constructed(tag::SEQUENCE)
    }

    /// Fail if any input remains.
    pub fn finish(&self, context: &'static str) -> Result<(), ProtocolError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingData {
                context,
                remaining: self.data.len() - self.pos,
            })
        }
    }
}

/// Convert octets to a `String`, naming the field on failure.
pub fn utf8(bytes: &[u8], field: &'static str) -> Result<String, ProtocolError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| ProtocolError::InvalidUtf8 { field })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encoded_integer(value: i64) -> Vec<u8> {
        let mut w = BerWriter::new();
        w.write_integer(value);
        w.as_slice().to_vec()
    }

    #[test]
    fn test_integer_minimal_encoding() {
        assert_eq!(encoded_integer(0), [0x02, 0x01, 0x00]);
        assert_eq!(encoded_integer(127), [0x02, 0x01, 0x7F]);
        assert_eq!(encoded_integer(128), [0x02, 0x02, 0x00, 0x80]);
        assert_eq!(encoded_integer(256), [0x02, 0x02, 0x01, 0x00]);
        assert_eq!(encoded_integer(-1), [0x02, 0x01, 0xFF]);
        assert_eq!(encoded_integer(-128), [0x02, 0x01, 0x80]);
        assert_eq!(encoded_integer(-129), [0x02, 0x02, 0xFF, 0x7F]);
    }

    #[test]
    fn test_long_form_length() {
        let content = vec![0xAB; 300];
        let mut w = BerWriter::new();
        w.write_octet_string(&content);
        let bytes = w.into_bytes();
        assert_eq!(&bytes[..4], &[0x04, 0x82, 0x01, 0x2C]);

        let mut r = BerReader::new(&bytes);
        assert_eq!(r.read_octet_string().unwrap(), &content[..]);
        r.finish("test").unwrap();
    }

    #[test]
    fn test_peek_header_incomplete() {
        assert_eq!(peek_header(&[]).unwrap(), None);
        assert_eq!(peek_header(&[0x30]).unwrap(), None);
        assert_eq!(peek_header(&[0x30, 0x82, 0x01]).unwrap(), None);
        let header = peek_header(&[0x30, 0x82, 0x01, 0x00]).unwrap().unwrap();
        assert_eq!(header.header_len, 4);
        assert_eq!(header.content_len, 256);
    }

    #[test]
    fn test_rejects_indefinite_length() {
        assert_eq!(
            peek_header(&[0x30, 0x80]),
            Err(ProtocolError::IndefiniteLength)
        );
    }

    #[test]
    fn test_rejects_oversized_length_field() {
        assert_eq!(
            peek_header(&[0x30, 0x85, 1, 2, 3, 4, 5]),
            Err(ProtocolError::LengthTooLarge { octets: 5 })
        );
    }

    #[test]
    fn test_truncated_content() {
        let mut r = BerReader::new(&[0x04, 0x05, b'a', b'b']);
        assert_eq!(r.read_octet_string(), Err(ProtocolError::UnexpectedEof));
    }

    #[test]
    fn test_unexpected_tag() {
        let mut r = BerReader::new(&[0x01, 0x01, 0xFF]);
        assert_eq!(
            r.read_integer(),
            Err(ProtocolError::UnexpectedTag {
                expected: tag::INTEGER,
                actual: tag::BOOLEAN
            })
        );
    }

    #[test]
    fn test_nested_sequence() {
        let mut w = BerWriter::new();
        w.write_sequence(|seq| {
            seq.write_integer(5);
            seq.write_boolean(true);
            seq.write_octet_string(b"cn");
        });
        let bytes = w.into_bytes();
        assert_eq!(
            &bytes[..],
            &[0x30, 0x0A, 0x02, 0x01, 0x05, 0x01, 0x01, 0xFF, 0x04, 0x02, b'c', b'n']
        );

        let mut r = BerReader::new(&bytes);
        let mut seq = r.read_sequence().unwrap();
        assert_eq!(seq.read_integer().unwrap(), 5);
        assert!(seq.read_boolean().unwrap());
        assert_eq!(seq.read_string("attr").unwrap(), "cn");
        seq.finish("sequence").unwrap();
    }

    #[test]
    fn test_optional_element() {
        let mut r = BerReader::new(&[0x80, 0x01, 0x07]);
        assert_eq!(r.read_optional(tag::context(1)).unwrap(), None);
        assert_eq!(r.read_optional(tag::context(0)).unwrap(), Some(&[0x07][..]));
        assert!(r.is_empty());
    }

    proptest! {
        #[test]
        fn prop_integer_decodes_to_itself(value in any::<i64>()) {
            let bytes = encoded_integer(value);
            let mut r = BerReader::new(&bytes);
            prop_assert_eq!(r.read_integer().unwrap(), value);
        }
    }
}
