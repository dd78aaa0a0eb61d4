//! TCP plumbing shared by the message and file services.
//!
//! Every outbound exchange is one connection: connect, write, close. The
//! configured timeout bounds each step on its own: the connect, every
//! [`WRITE_STEP`] piece of the payload, and the close. A slow peer that
//! keeps reading is never cut off; a stalled one is.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use classmesh_core::config::NetworkConfig;
use classmesh_core::MeshError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};

/// How long a listener waits on a silent connection before dropping it.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest piece of a payload written under a single timeout.
pub const WRITE_STEP: usize = 64 * 1024;

/// How this node opens outbound connections.
#[derive(Debug, Clone, Copy)]
pub struct Outbound {
    /// Local address to send from. Peers identify us by source host, so a
    /// node bound to a concrete address must also connect from it.
    pub source: Option<IpAddr>,
    pub timeout: Duration,
}

impl Outbound {
    pub fn new(source: Option<IpAddr>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    pub fn from_network(network: &NetworkConfig) -> Self {
        let source = Some(network.bind_addr).filter(|ip| !ip.is_unspecified());
        Self::new(source, network.connect_timeout())
    }

    /// Open a connection to `addr`, write `payload`, and close it.
    pub async fn send_once(&self, addr: SocketAddr, payload: &[u8]) -> Result<(), MeshError> {
        let mut stream = self
            .step(addr, self.connect(addr))
            .await?
            .map_err(|source| MeshError::Connect { addr, source })?;

        for piece in payload.chunks(WRITE_STEP) {
            self.step(addr, stream.write_all(piece))
                .await?
                .map_err(|e| MeshError::io(format!("write to {addr}"), e))?;
        }

        self.step(addr, stream.shutdown())
            .await?
            .map_err(|e| MeshError::io(format!("close {addr}"), e))
    }

    /// Run one step of an exchange under the timeout.
    async fn step<F: Future>(&self, addr: SocketAddr, fut: F) -> Result<F::Output, MeshError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| MeshError::Timeout {
                addr,
                after: self.timeout,
            })
    }

    async fn connect(&self, addr: SocketAddr) -> std::io::Result<TcpStream> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        if let Some(source) = self.source.filter(|s| s.is_ipv4() == addr.is_ipv4()) {
            socket.bind(SocketAddr::new(source, 0))?;
        }
        socket.connect(addr).await
    }
}

/// Read until EOF, failing if more than `limit` bytes arrive.
pub async fn read_bounded<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>, MeshError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut limited = reader.take(limit as u64 + 1);
    match tokio::time::timeout(RECEIVE_TIMEOUT, limited.read_to_end(&mut buf)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(MeshError::io("read payload", e)),
        Err(_) => return Err(MeshError::framing("peer went silent before finishing payload")),
    }
    if buf.len() > limit {
        return Err(MeshError::framing(format!("payload exceeds {limit} bytes")));
    }
    Ok(buf)
}
