//! LDAPMessage codec for tokio-util framing.

use bytes::BytesMut;
use ldap_protocol::LdapMessage;
use ldap_protocol::ber::{peek_header, tag};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Default upper bound on a single inbound message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Codec that splits a byte stream into LDAP messages.
///
/// Each frame is one complete BER-encoded `LDAPMessage`. The length is taken
/// from the outer SEQUENCE header, so partial reads simply wait for more
/// input.
#[derive(Debug, Clone)]
pub struct LdapCodec {
    max_message_size: usize,
}

impl LdapCodec {
    /// Create a codec with the default size limit.
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set the maximum inbound message size.
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Maximum inbound message size.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl Default for LdapCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LdapCodec {
    type Item = LdapMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(header) = peek_header(src)? else {
            return Ok(None);
        };
        if header.tag != tag::SEQUENCE {
            return Err(CodecError::InvalidHeader(header.tag));
        }

        let total = header.total_len();
        if total > self.max_message_size {
            return Err(CodecError::MessageTooLarge {
                size: total,
                max: self.max_message_size,
            });
        }
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total);
        let message = LdapMessage::decode(&frame)?;
        tracing::trace!(
            message_id = message.message_id,
            op = message.op.name(),
            length = total,
            "decoded LDAP message"
        );
        Ok(Some(message))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() => Ok(None),
            None => Err(CodecError::ConnectionClosed),
        }
    }
}

impl Encoder<LdapMessage> for LdapCodec {
    type Error = CodecError;

    fn encode(&mut self, item: LdapMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let before = dst.len();
        item.encode_into(dst);
        tracing::trace!(
            message_id = item.message_id,
            op = item.op.name(),
            length = dst.len() - before,
            "encoded LDAP message"
        );
        Ok(())
    }
}
