//! Interfaces for the two external collaborators this crate deliberately
//! does not implement (spec.md §1, §6): the WebTransport/HTTP3/QUIC session
//! acceptor, and the TCP dialer. The core is written entirely against these
//! traits so it can be driven end-to-end in tests with in-memory stand-ins,
//! the same way `comms::Server` is written against `tokio::net::TcpListener`
//! without knowing anything about what's upstream of an accepted connection.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional, authenticated, in-order byte stream — one per relayed
/// TCP connection. The transport has already completed its handshake by the
/// time the core sees this.
pub trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> PeerStream for T {}

/// Given `(host, port)`, returns a connected, readable/writable byte stream
/// within `timeout`, per spec.md §6.
#[async_trait]
pub trait Dialer: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn dial(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> std::io::Result<Self::Stream>;
}

/// A real TCP dialer, the expected production implementation of [`Dialer`].
/// Not exercised by this crate's tests (which use an in-memory dialer
/// instead), but kept here as the natural default for glue code.
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    type Stream = tokio::net::TcpStream;

    async fn dial(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> std::io::Result<Self::Stream> {
        let fut = tokio::net::TcpStream::connect((host, port));
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timed out",
            )),
        }
    }
}
