//! Socket layer seen by the server.
//!
//! The server listens and accepts through [`NetworkProvider`] and
//! [`Listener`] only, never through `tokio::net` directly. Streams are plain
//! `AsyncRead + AsyncWrite` halves-in-one; framing happens above them.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// Opens listening sockets.
///
/// No `Send` bound: the server lives on one thread.
#[async_trait(?Send)]
pub trait NetworkProvider: Clone {
    /// Stream produced for every accepted client.
    type TcpStream: AsyncRead + AsyncWrite + Unpin + 'static;
    /// Listening socket.
    type Listener: Listener<TcpStream = Self::TcpStream> + 'static;

    /// Listen on a `host:port` address. Port 0 picks a free port.
    async fn listen(&self, addr: &str) -> io::Result<Self::Listener>;
}

/// A bound, listening socket.
#[async_trait(?Send)]
pub trait Listener {
    /// Stream produced for every accepted client.
    type TcpStream: AsyncRead + AsyncWrite + Unpin + 'static;

    /// Wait for the next client. Must be cancel safe.
    async fn accept(&self) -> io::Result<(Self::TcpStream, SocketAddr)>;

    /// Address actually bound.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Sockets from `tokio::net`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioNetworkProvider;

#[async_trait(?Send)]
impl NetworkProvider for TokioNetworkProvider {
    type TcpStream = tokio::net::TcpStream;
    type Listener = TokioListener;

    async fn listen(&self, addr: &str) -> io::Result<TokioListener> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        tracing::debug!(addr, "socket bound");
        Ok(TokioListener { inner })
    }
}

/// [`Listener`] over a `tokio::net::TcpListener`.
#[derive(Debug)]
pub struct TokioListener {
    inner: tokio::net::TcpListener,
}

#[async_trait(?Send)]
impl Listener for TokioListener {
    type TcpStream = tokio::net::TcpStream;

    async fn accept(&self) -> io::Result<(tokio::net::TcpStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        // OSC packets are small; do not let Nagle hold them back.
        // A peer that already reset must not fail the listener.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "set_nodelay failed on accepted stream");
        }
        Ok((stream, peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_listen_on_ephemeral_port_and_accept() {
        let listener = TokioNetworkProvider
            .listen("127.0.0.1:0")
            .await
            .expect("listen");
        let addr = listener.local_addr().expect("local addr");
        assert_ne!(addr.port(), 0);

        let mut client = tokio::net::TcpStream::connect(addr).await.expect("connect");
        let (mut accepted, peer) = listener.accept().await.expect("accept");
        assert_eq!(peer, client.local_addr().expect("client addr"));

        client.write_all(b"/osc\0\0\0\0").await.expect("write");
        let mut buf = [0u8; 8];
        accepted.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"/osc\0\0\0\0");
    }

    #[tokio::test]
    async fn test_listen_on_taken_port_fails() {
        let first = TokioNetworkProvider
            .listen("127.0.0.1:0")
            .await
            .expect("listen");
        let taken = first.local_addr().expect("local addr").to_string();

        assert!(TokioNetworkProvider.listen(&taken).await.is_err());
    }
}
