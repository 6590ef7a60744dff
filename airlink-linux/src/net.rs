//! Network stack seam: DNS, TCP feed connections and the UDP socket used for client fan-out.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream, UdpSocket};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub trait Network: Send + Sync + 'static {
    type Stream: FeedStream;
    type Datagram: DatagramSocket;

    /// Single blocking-style lookup; only IPv4 results are considered.
    fn resolve_ipv4(&self, host: &str) -> impl Future<Output = io::Result<Ipv4Addr>> + Send;

    fn connect(&self, addr: SocketAddrV4) -> impl Future<Output = io::Result<Self::Stream>> + Send;

    fn bind_udp(&self) -> impl Future<Output = io::Result<Self::Datagram>> + Send;
}

/// Connected feed socket. Dropping it closes the connection.
pub trait FeedStream: Send + 'static {
    fn send(&mut self, frame: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

pub trait DatagramSocket: Send + Sync + 'static {
    fn send_to(
        &self,
        payload: &[u8],
        dest: SocketAddrV4,
    ) -> impl Future<Output = io::Result<usize>> + Send;
}

/// Host network stack via tokio.
#[derive(Debug, Clone)]
pub struct TokioNetwork {
    connect_timeout: Duration,
    send_timeout: Duration,
}

impl TokioNetwork {
    pub fn new() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            send_timeout: SEND_TIMEOUT,
        }
    }
}

impl Default for TokioNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{what} timed out"))
}

impl Network for TokioNetwork {
    type Stream = TcpFeedStream;
    type Datagram = UdpSocket;

    async fn resolve_ipv4(&self, host: &str) -> io::Result<Ipv4Addr> {
        let mut addrs = tokio::net::lookup_host((host, 0)).await?;
        addrs
            .find_map(|a| match a {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no IPv4 address"))
    }

    async fn connect(&self, addr: SocketAddrV4) -> io::Result<TcpFeedStream> {
        let socket = TcpSocket::new_v4()?;
        let stream = tokio::time::timeout(self.connect_timeout, socket.connect(addr.into()))
            .await
            .map_err(|_| timed_out("connect"))??;
        stream.set_nodelay(true)?;
        Ok(TcpFeedStream {
            stream,
            send_timeout: self.send_timeout,
        })
    }

    async fn bind_udp(&self) -> io::Result<UdpSocket> {
        UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await
    }
}

pub struct TcpFeedStream {
    stream: TcpStream,
    send_timeout: Duration,
}

impl FeedStream for TcpFeedStream {
    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        tokio::time::timeout(self.send_timeout, self.stream.write_all(frame))
            .await
            .map_err(|_| timed_out("send"))?
    }
}

impl DatagramSocket for UdpSocket {
    async fn send_to(&self, payload: &[u8], dest: SocketAddrV4) -> io::Result<usize> {
        UdpSocket::send_to(self, payload, SocketAddr::V4(dest)).await
    }
}
