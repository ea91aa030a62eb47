//! Byte stream transports.
//!
//! A [`Transport`] turns an [`LdapUrl`] into a connected byte stream. TLS
//! and LDAP framing are layered on top by the
//! [`TransportFactory`](crate::TransportFactory), so a transport only deals
//! with sockets.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::{Endpoint, LdapUrl};
use crate::error::ConnectionError;

/// A bidirectional byte stream usable under an LDAP connection.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug + 'static {}

/// Type-erased stream, so TLS and plain connections share one type.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens byte streams to LDAP endpoints.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Connect to `url` within `timeout`.
    async fn connect(&self, url: &LdapUrl, timeout: Duration) -> Result<BoxedStream, ConnectionError>;
}

/// TCP transport for `ldap://` and `ldaps://` URLs.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    nodelay: bool,
}

impl TcpTransport {
    /// Create a TCP transport with `TCP_NODELAY` enabled.
    pub fn new() -> Self {
        Self { nodelay: true }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, url: &LdapUrl, timeout: Duration) -> Result<BoxedStream, ConnectionError> {
        let Endpoint::Tcp { host, port } = &url.endpoint else {
            return Err(ConnectionError::NoEndpoints);
        };

        tracing::debug!(host = %host, port = port, "opening TCP connection");

        let stream = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), *port)))
            .await
            .map_err(|_| ConnectionError::Timeout {
                during: "TCP connect",
                elapsed: timeout,
            })?
            .map_err(|source| ConnectionError::Network {
                url: url.to_string(),
                source,
            })?;

        if self.nodelay {
            stream
                .set_nodelay(true)
                .map_err(|source| ConnectionError::Network {
                    url: url.to_string(),
                    source,
                })?;
        }

        Ok(Box::new(stream))
    }
}

/// Unix domain socket transport for `ldapi://` URLs.
#[cfg(unix)]
#[derive(Debug, Clone, Default)]
pub struct UnixTransport;

#[cfg(unix)]
#[async_trait]
impl Transport for UnixTransport {
    async fn connect(&self, url: &LdapUrl, timeout: Duration) -> Result<BoxedStream, ConnectionError> {
        let Endpoint::Unix(path) = &url.endpoint else {
            return Err(ConnectionError::NoEndpoints);
        };

        tracing::debug!(path = %path, "opening Unix socket connection");

        let stream = tokio::time::timeout(timeout, tokio::net::UnixStream::connect(path))
            .await
            .map_err(|_| ConnectionError::Timeout {
                during: "Unix socket connect",
                elapsed: timeout,
            })?
            .map_err(|source| ConnectionError::Network {
                url: url.to_string(),
                source,
            })?;

        Ok(Box::new(stream))
    }
}

/// Picks the backend by URL scheme.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransport {
    tcp: TcpTransport,
}

impl DefaultTransport {
    /// Create the default transport.
    pub fn new() -> Self {
        Self {
            tcp: TcpTransport::new(),
        }
    }
}

#[async_trait]
impl Transport for DefaultTransport {
    async fn connect(&self, url: &LdapUrl, timeout: Duration) -> Result<BoxedStream, ConnectionError> {
        match &url.endpoint {
            Endpoint::Tcp { .. } => self.tcp.connect(url, timeout).await,
            #[cfg(unix)]
            Endpoint::Unix(_) => UnixTransport.connect(url, timeout).await,
            #[cfg(not(unix))]
            Endpoint::Unix(path) => Err(ConnectionError::Network {
                url: url.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    format!("Unix sockets are not supported on this platform: {path}"),
                ),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tcp_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ok").await.unwrap();
        });

        let url = LdapUrl::parse(&format!("ldap://127.0.0.1:{port}")).unwrap();
        let mut stream = DefaultTransport::new()
            .connect(&url, Duration::from_secs(5))
            .await
            .unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = LdapUrl::parse(&format!("ldap://127.0.0.1:{port}")).unwrap();
        let err = TcpTransport::new()
            .connect(&url, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_connect() {
        let dir = std::env::temp_dir().join(format!("ldapkit-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ldapi");
        let _ = std::fs::remove_file(&path);
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hi").await.unwrap();
        });

        let encoded = percent_encoding::utf8_percent_encode(
            path.to_str().unwrap(),
            percent_encoding::NON_ALPHANUMERIC,
        );
        let url = LdapUrl::parse(&format!("ldapi://{encoded}")).unwrap();
        let mut stream = DefaultTransport::new()
            .connect(&url, Duration::from_secs(5))
            .await
            .unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        server.await.unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
