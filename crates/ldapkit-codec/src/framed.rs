//! Framed message stream for async I/O.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures_core::Stream;
use futures_util::Sink;
use ldap_protocol::LdapMessage;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::error::CodecError;
use crate::message_codec::LdapCodec;

pin_project! {
    /// A framed LDAP message stream over an async I/O transport.
    ///
    /// This wraps a tokio-util `Framed` codec and yields whole
    /// [`LdapMessage`]s in both directions.
    pub struct MessageStream<T> {
        #[pin]
        inner: Framed<T, LdapCodec>,
    }
}

impl<T> MessageStream<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a new message stream over the given transport.
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, LdapCodec::new())
    }

    /// Create a new message stream with a custom codec.
    pub fn with_codec(transport: T, codec: LdapCodec) -> Self {
        Self {
            inner: Framed::new(transport, codec),
        }
    }

    /// Get a reference to the underlying transport.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Get a mutable reference to the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Get a reference to the codec.
    pub fn codec(&self) -> &LdapCodec {
        self.inner.codec()
    }

    /// Consume the stream and return the underlying transport.
    ///
    /// Any buffered but undecoded input is lost. Used for the StartTLS
    /// upgrade, where the server sends nothing further until the handshake.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    /// Get a reference to the read buffer.
    pub fn read_buffer(&self) -> &BytesMut {
        self.inner.read_buffer()
    }
}

impl<T> Stream for MessageStream<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<LdapMessage, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<T> Sink<LdapMessage> for MessageStream<T>
where
    T: AsyncWrite + Unpin,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: LdapMessage) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T> std::fmt::Debug for MessageStream<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("transport", self.inner.get_ref())
            .finish()
    }
}
