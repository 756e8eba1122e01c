//! DNS server orchestration.
//!
//! Receives queries on UDP and TCP, hands each one to the dispatch chain
//! together with a sink bound to the client, and sends the answer back.
//! Designed with trait-based dependencies for testability.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use crate::dns::chain::{DispatchChain, ResponseSink, failure_response};
use crate::dns::resolver::{DnsResolver, MAX_UDP_DNS_SIZE, Protocol, read_frame, write_frame};
use crate::error::Result;

/// Sink answering a UDP client with one datagram.
pub struct UdpSink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl UdpSink {
    pub const fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }
}

impl ResponseSink for UdpSink {
    async fn write(self, response: &Message) -> Result<()> {
        let bytes = response.to_bytes()?;
        self.socket.send_to(&bytes, self.peer).await?;
        Ok(())
    }

    async fn write_failure(self, query: &Message) -> Result<()> {
        self.write(&failure_response(query)).await
    }
}

/// Sink answering a TCP client with one length-prefixed message.
pub struct TcpSink<'a, W> {
    stream: &'a mut W,
}

impl<'a, W> TcpSink<'a, W> {
    pub const fn new(stream: &'a mut W) -> Self {
        Self { stream }
    }
}

impl<W> ResponseSink for TcpSink<'_, W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(self, response: &Message) -> Result<()> {
        let bytes = response.to_bytes()?;
        write_frame(self.stream, &bytes).await?;
        Ok(())
    }

    async fn write_failure(self, query: &Message) -> Result<()> {
        self.write(&failure_response(query)).await
    }
}

/// UDP and TCP front end of the dispatch chain.
pub struct DnsServer<C, D> {
    chain: Arc<DispatchChain<C, D>>,
    tcp_idle_timeout: Duration,
}

impl<C, D> DnsServer<C, D>
where
    C: DnsResolver,
    D: DnsResolver,
{
    /// Create a new server.
    pub fn new(chain: DispatchChain<C, D>, tcp_idle_timeout: Duration) -> Self {
        Self {
            chain: Arc::new(chain),
            tcp_idle_timeout,
        }
    }

    /// Serve queries received on a bound UDP socket, one task per datagram.
    ///
    /// Runs until the task is aborted.
    pub async fn serve_udp(&self, socket: UdpSocket) -> Result<()> {
        let socket = Arc::new(socket);
        info!(addr = ?socket.local_addr().ok(), "serving DNS over UDP");

        let mut buf = vec![0u8; MAX_UDP_DNS_SIZE];
        loop {
            let (len, peer) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(err) => {
                    warn!(error = %err, "failed to receive UDP datagram");
                    continue;
                }
            };

            let Some(query) = parse_query(&buf[..len], peer) else {
                continue;
            };

            let chain = Arc::clone(&self.chain);
            let sink = UdpSink::new(Arc::clone(&socket), peer);
            tokio::spawn(async move {
                chain.handle(&query, Protocol::Udp, sink).await;
            });
        }
    }

    /// Serve queries received on a TCP listener, one task per connection.
    ///
    /// Runs until the task is aborted.
    pub async fn serve_tcp(&self, listener: TcpListener) -> Result<()> {
        info!(addr = ?listener.local_addr().ok(), "serving DNS over TCP");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "failed to accept TCP connection");
                    continue;
                }
            };

            let chain = Arc::clone(&self.chain);
            let idle_timeout = self.tcp_idle_timeout;
            tokio::spawn(async move {
                if let Err(err) = serve_connection(stream, peer, chain, idle_timeout).await {
                    debug!(peer = %peer, error = %err, "TCP connection closed with error");
                }
            });
        }
    }
}

impl<C, D> Clone for DnsServer<C, D> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            tcp_idle_timeout: self.tcp_idle_timeout,
        }
    }
}

/// Answer the queries of one TCP connection in order until it goes idle or
/// the client closes it.
async fn serve_connection<C, D>(
    mut stream: TcpStream,
    peer: SocketAddr,
    chain: Arc<DispatchChain<C, D>>,
    idle_timeout: Duration,
) -> Result<()>
where
    C: DnsResolver,
    D: DnsResolver,
{
    loop {
        let frame = match tokio::time::timeout(idle_timeout, read_frame(&mut stream)).await {
            Err(_) => {
                debug!(peer = %peer, "closing idle TCP connection");
                return Ok(());
            }
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Ok(Err(err)) => return Err(err.into()),
            Ok(Ok(frame)) => frame,
        };

        let Some(query) = parse_query(&frame, peer) else {
            return Ok(());
        };

        chain
            .handle(&query, Protocol::Tcp, TcpSink::new(&mut stream))
            .await;
    }
}

/// Parse an inbound message, dropping anything that is not a query.
fn parse_query(payload: &[u8], peer: SocketAddr) -> Option<Message> {
    let query = match Message::from_bytes(payload) {
        Ok(query) => query,
        Err(err) => {
            warn!(peer = %peer, error = %err, "failed to parse DNS message");
            return None;
        }
    };

    if query.message_type() != MessageType::Query {
        debug!(peer = %peer, "ignoring DNS message that is not a query");
        return None;
    }

    Some(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::chain::ChainConfig;
    use crate::dns::resolver::tests::{MockResolver, create_query, mock_tag};
    use hickory_proto::op::ResponseCode;

    fn create_server(doh: MockResolver) -> DnsServer<MockResolver, MockResolver> {
        let chain = DispatchChain::new(doh, ChainConfig::default());
        DnsServer::new(chain, Duration::from_secs(2))
    }

    async fn spawn_udp(server: DnsServer<MockResolver, MockResolver>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move { server.serve_udp(socket).await });
        addr
    }

    async fn spawn_tcp(server: DnsServer<MockResolver, MockResolver>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.serve_tcp(listener).await });
        addr
    }

    async fn udp_exchange(client: &UdpSocket, server: SocketAddr, query: &Message) -> Message {
        client
            .send_to(&query.to_bytes().unwrap(), server)
            .await
            .unwrap();
        let mut buf = [0u8; 4096];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        Message::from_bytes(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn should_answer_udp_query() {
        let doh = MockResolver::new(2);
        let addr = spawn_udp(create_server(doh.clone())).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let response = udp_exchange(&client, addr, &create_query("example.com.", 321)).await;

        assert_eq!(response.id(), 321);
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert_eq!(mock_tag(&response), Some(2));
        assert_eq!(doh.last_protocol().await, Some(Protocol::Udp));
    }

    #[tokio::test]
    async fn should_answer_servfail_over_udp_when_chain_fails() {
        let doh = MockResolver::new(2);
        doh.set_error("connection refused").await;
        let addr = spawn_udp(create_server(doh)).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let response = udp_exchange(&client, addr, &create_query("example.com.", 99)).await;

        assert_eq!(response.id(), 99);
        assert_eq!(response.response_code(), ResponseCode::ServFail);
    }

    #[tokio::test]
    async fn should_ignore_malformed_datagram() {
        let doh = MockResolver::new(2);
        let addr = spawn_udp(create_server(doh.clone())).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        client.send_to(&[0xde, 0xad], addr).await.unwrap();
        let response = udp_exchange(&client, addr, &create_query("example.com.", 5)).await;

        assert_eq!(response.id(), 5);
        assert_eq!(doh.resolve_count(), 1);
    }

    #[tokio::test]
    async fn should_answer_several_queries_on_one_tcp_connection() {
        let doh = MockResolver::new(2);
        let addr = spawn_tcp(create_server(doh.clone())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        for id in [10u16, 11] {
            let query = create_query("example.com.", id);
            write_frame(&mut stream, &query.to_bytes().unwrap())
                .await
                .unwrap();
            let frame = read_frame(&mut stream).await.unwrap();
            let response = Message::from_bytes(&frame).unwrap();
            assert_eq!(response.id(), id);
        }

        assert_eq!(doh.resolve_count(), 2);
        assert_eq!(doh.last_protocol().await, Some(Protocol::Tcp));
    }

    #[tokio::test]
    async fn should_write_tcp_failure_as_servfail() {
        let query = create_query("example.com.", 8);
        let mut buffer = Vec::new();

        TcpSink::new(&mut buffer).write_failure(&query).await.unwrap();

        let len = usize::from(u16::from_be_bytes([buffer[0], buffer[1]]));
        assert_eq!(len, buffer.len() - 2);
        let response = Message::from_bytes(&buffer[2..]).unwrap();
        assert_eq!(response.id(), 8);
        assert_eq!(response.response_code(), ResponseCode::ServFail);
    }

    #[test]
    fn should_drop_responses_received_as_queries() {
        let mut message = create_query("example.com.", 1);
        message.set_message_type(MessageType::Response);
        let peer: SocketAddr = "127.0.0.1:5300".parse().unwrap();

        assert!(parse_query(&message.to_bytes().unwrap(), peer).is_none());
        assert!(parse_query(&create_query("example.com.", 1).to_bytes().unwrap(), peer).is_some());
    }
}
