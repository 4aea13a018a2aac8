//! Transport streams and pooled connections.
//!
//! [`Transport`] abstracts how raw byte streams are opened (plain TCP by
//! default; TLS arrives as a caller-supplied implementation). A
//! [`PooledConnection`] owns one buffered stream plus the [`Address`] it
//! was opened for, which is also the pool's grouping key.

use crate::base::neterror::NetError;
use crate::http::headers::HeaderTable;
use crate::socket::proxy::ProxyServer;
use futures::future::BoxFuture;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;

/// A bidirectional byte stream with a cheap liveness probe.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync {
    /// True if the peer hasn't closed and no unsolicited bytes are
    /// waiting. An idle connection with readable data is not reusable:
    /// either the server closed it or the previous response wasn't fully
    /// drained.
    fn is_connected(&self) -> bool;
}

pub type TransportStream = Box<dyn Stream>;

/// Opens streams to `host:port`. Implementations decide what the bytes
/// mean (plain TCP, TLS, a test double).
pub trait Transport: Send + Sync {
    fn connect(&self, host: &str, port: u16) -> BoxFuture<'_, Result<TransportStream, NetError>>;
}

impl Stream for TcpStream {
    fn is_connected(&self) -> bool {
        let mut buf = [0u8; 1];
        match self.try_read(&mut buf) {
            Ok(_) => false,
            Err(e) => e.kind() == std::io::ErrorKind::WouldBlock,
        }
    }
}

/// Plain TCP transport, the default.
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn connect(&self, host: &str, port: u16) -> BoxFuture<'_, Result<TransportStream, NetError>> {
        let target = (host.to_string(), port);
        Box::pin(async move {
            let stream = TcpStream::connect(target)
                .await
                .map_err(|e| NetError::from_io(&e))?;
            stream.set_nodelay(true).map_err(|e| NetError::from_io(&e))?;
            Ok(Box::new(stream) as TransportStream)
        })
    }
}

/// Pool grouping key: the TCP endpoint the socket is physically connected
/// to, plus the route that makes its bytes interchangeable with another
/// socket's. Two requests may share a connection only when every field
/// matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// Origin host (not the proxy).
    pub host: String,
    pub port: u16,
    pub proxy: Option<ProxyServer>,
    /// Whether a CONNECT tunnel through the proxy is required.
    pub tunnel: bool,
}

impl Address {
    /// The endpoint the TCP connection is actually opened to.
    pub fn socket_host_port(&self) -> (&str, u16) {
        match &self.proxy {
            Some(proxy) => (proxy.host.as_str(), proxy.port),
            None => (self.host.as_str(), self.port),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.proxy {
            Some(proxy) if self.tunnel => {
                write!(f, "{}:{} tunnel via {}", self.host, self.port, proxy)
            }
            Some(proxy) => write!(f, "{}:{} via {}", self.host, self.port, proxy),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// One buffered connection, owned exclusively by a request while checked
/// out and by the pool while idle.
pub struct PooledConnection {
    address: Address,
    stream: BufReader<TransportStream>,
    /// Completed exchanges carried so far.
    use_count: u32,
}

impl PooledConnection {
    /// Open a fresh connection for `address`, bounding the attempt by
    /// `connect_timeout`.
    pub async fn connect(
        address: Address,
        transport: &dyn Transport,
        connect_timeout: Duration,
    ) -> Result<Self, NetError> {
        let (host, port) = address.socket_host_port();
        let stream = tokio::time::timeout(connect_timeout, transport.connect(host, port))
            .await
            .map_err(|_| NetError::ConnectionTimedOut)??;
        Ok(Self { address, stream: BufReader::new(stream), use_count: 0 })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    pub fn mark_used(&mut self) {
        self.use_count += 1;
    }

    /// True if this idle connection can still carry a request: the
    /// read buffer holds no leftover bytes and the peer hasn't closed.
    pub fn is_alive(&self) -> bool {
        self.stream.buffer().is_empty() && self.stream.get_ref().is_connected()
    }

    /// Establish a CONNECT tunnel to the origin through the proxy.
    ///
    /// Only the headers the proxy needs are sent; the origin request's
    /// headers stay private to the tunneled stream.
    pub async fn establish_tunnel(
        &mut self,
        user_agent: &str,
        proxy_authorization: Option<&str>,
    ) -> Result<(), NetError> {
        let mut request = HeaderTable::new();
        request.set_status_line(format!(
            "CONNECT {}:{} HTTP/1.1",
            self.address.host, self.address.port
        ));
        request.set("Host", format!("{}:{}", self.address.host, self.address.port));
        request.set("User-Agent", user_agent);
        if let Some(authorization) = proxy_authorization {
            request.set("Proxy-Authorization", authorization);
        }
        request.set("Proxy-Connection", "Keep-Alive");
        self.write_all(request.to_header_string().as_bytes()).await?;

        let status_line = match crate::http::headers::read_wire_line(&mut self.stream).await? {
            Some(line) => line,
            None => return Err(NetError::TunnelConnectionFailed),
        };
        let mut response = HeaderTable::new();
        response.set_status_line(status_line);
        response.read_headers(&mut self.stream).await?;

        match response.response_code()? {
            200 => Ok(()),
            _ => Err(NetError::TunnelConnectionFailed),
        }
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| NetError::from_io(&e))
    }

    pub async fn flush(&mut self) -> Result<(), NetError> {
        self.stream.flush().await.map_err(|e| NetError::from_io(&e))
    }
}

impl AsyncRead for PooledConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for PooledConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

impl tokio::io::AsyncBufRead for PooledConnection {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().stream).poll_fill_buf(cx)
    }

    fn consume(mut self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.stream).consume(amt)
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("address", &self.address)
            .field("use_count", &self.use_count)
            .finish()
    }
}
