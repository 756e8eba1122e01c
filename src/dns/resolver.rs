//! DNS resolver trait and the classic upstream transport.
//!
//! Provides abstraction over DNS resolution to enable:
//! - Testing with mock resolvers
//! - Chaining classic DNS and DNS-over-HTTPS upstreams behind one interface

use std::fmt;
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::error::{Error, Result};

/// Receive buffer size for UDP exchanges, large enough for EDNS payloads.
pub const MAX_UDP_DNS_SIZE: usize = 4096;

/// Network transport a query arrived on, reused for classic upstream exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for DNS resolution.
///
/// Implementations perform exactly one upstream exchange per call, without
/// retrying:
/// - Classic DNS over UDP or TCP
/// - DNS-over-HTTPS JSON API
/// - Mock responses for testing
pub trait DnsResolver: Send + Sync + 'static {
    /// Resolve a DNS query and return the response.
    ///
    /// `protocol` is the transport the client used.
    fn resolve(
        &self,
        query: &Message,
        protocol: Protocol,
    ) -> impl Future<Output = Result<Message>> + Send;
}

/// Classic DNS resolver forwarding to a fixed upstream server.
#[derive(Debug, Clone)]
pub struct UpstreamResolver {
    upstream_addr: SocketAddr,
    timeout: Duration,
}

impl UpstreamResolver {
    /// Create a new upstream resolver.
    pub const fn new(upstream_addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            upstream_addr,
            timeout,
        }
    }

    /// Address of the upstream server.
    pub const fn upstream_addr(&self) -> SocketAddr {
        self.upstream_addr
    }

    async fn exchange_udp(&self, query_bytes: &[u8]) -> Result<Vec<u8>> {
        let bind_addr = if self.upstream_addr.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.upstream_addr).await?;
        socket.send(query_bytes).await?;

        let mut response_buf = vec![0u8; MAX_UDP_DNS_SIZE];
        let len = socket.recv(&mut response_buf).await?;
        response_buf.truncate(len);
        Ok(response_buf)
    }

    async fn exchange_tcp(&self, query_bytes: &[u8]) -> Result<Vec<u8>> {
        let mut stream = TcpStream::connect(self.upstream_addr).await?;
        write_frame(&mut stream, query_bytes).await?;
        let response = read_frame(&mut stream).await?;
        Ok(response)
    }
}

impl DnsResolver for UpstreamResolver {
    async fn resolve(&self, query: &Message, protocol: Protocol) -> Result<Message> {
        let query_bytes = query.to_bytes()?;

        let exchange = async {
            match protocol {
                Protocol::Udp => self.exchange_udp(&query_bytes).await,
                Protocol::Tcp => self.exchange_tcp(&query_bytes).await,
            }
        };
        let response_bytes = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::UpstreamTimeout {
                addr: self.upstream_addr,
            })??;

        let response = Message::from_bytes(&response_bytes)?;
        if response.id() != query.id() {
            return Err(Error::IdMismatch {
                expected: query.id(),
                actual: response.id(),
            });
        }

        Ok(response)
    }
}

/// Read one length-prefixed DNS message from a TCP stream.
pub(crate) async fn read_frame<S>(stream: &mut S) -> std::io::Result<Vec<u8>>
where
    S: AsyncReadExt + Unpin,
{
    let len = stream.read_u16().await?;
    let mut buf = vec![0u8; usize::from(len)];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write one length-prefixed DNS message to a TCP stream.
pub(crate) async fn write_frame<S>(stream: &mut S, payload: &[u8]) -> std::io::Result<()>
where
    S: AsyncWriteExt + Unpin,
{
    let len = u16::try_from(payload.len()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "DNS message larger than 65535 bytes",
        )
    })?;

    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await?;
    stream.flush().await
}
