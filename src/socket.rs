//! Datagram transport.
//!
//! The engines never talk to the OS directly; they go through the narrow
//! [`Transport`] trait: send one datagram, receive one datagram with an
//! optional timeout.  [`Socket`] is the production implementation, a thin
//! wrapper around `tokio::net::UdpSocket`.  The test-only network in
//! [`crate::simulator`] is the other one.
//!
//! All protocol logic lives elsewhere; this module owns only byte I/O.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;

/// Errors that can arise from transport operations.
///
/// A receive timeout is **not** an error; see [`Recv::Timeout`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recv {
    /// `len` bytes were written to the buffer, sent from `from`.
    Datagram { len: usize, from: SocketAddr },
    /// Nothing arrived before the timeout.
    Timeout,
}

/// A bound, unreliable datagram endpoint.
///
/// Methods take `&self` so one endpoint can be shared by a send path and a
/// receive path if an embedding needs that.
pub trait Transport {
    fn local_addr(&self) -> SocketAddr;

    /// Send `bytes` as one datagram to `dest`.
    fn send_to(
        &self,
        bytes: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receive one datagram into `buf`.  `None` blocks until one arrives.
    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Recv, TransportError>> + Send;
}

/// An async UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, TransportError> {
        let inner = UdpSocket::bind(local_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: local_addr,
                source,
            })?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Bind on all IPv4 interfaces at `port`.
    pub async fn open(port: u16) -> Result<Self, TransportError> {
        Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await
    }
}

impl Transport for Socket {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    async fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<Recv, TransportError> {
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.inner.recv_from(buf)).await {
                Ok(result) => result,
                Err(_elapsed) => return Ok(Recv::Timeout),
            },
            None => self.inner.recv_from(buf).await,
        };
        let (len, from) = result?;
        Ok(Recv::Datagram { len, from })
    }
}
