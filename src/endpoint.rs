//! The datagram-endpoint abstraction: a bounded receive with a deadline
//! on the endpoint itself, rather than a separate timer task.
//!
//! [`DatagramEndpoint`] is the seam the Operation Logger composes
//! against: the transfer engine and dispatcher only ever see this trait,
//! so a logging decorator can wrap a real socket without either side
//! knowing about the other.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::audit::OperationLogger;

/// A bound, peer-connected datagram socket (or a decorator around one).
/// Every session owns exactly one of these exclusively.
pub trait DatagramEndpoint: Send + Sync {
    /// Send one datagram to the connected peer.
    fn send(&self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Receive one datagram from the connected peer. Blocks until one
    /// arrives; callers that need a deadline use [`recv_timeout`].
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Bounded receive on top of any [`DatagramEndpoint`]. Returns `Ok(None)`
/// on timeout (a non-terminal condition for callers) rather than an error.
pub async fn recv_timeout<E: DatagramEndpoint + ?Sized>(
    endpoint: &E,
    buf: &mut [u8],
    timeout: Duration,
) -> io::Result<Option<usize>> {
    match tokio::time::timeout(timeout, endpoint.recv(buf)).await {
        Ok(result) => result.map(Some),
        Err(_elapsed) => Ok(None),
    }
}

impl DatagramEndpoint for UdpSocket {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, buf).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        UdpSocket::recv(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Either a bare socket or one wrapped by the Operation Logger. A session
/// picks one at dispatch time based on whether `op_log_path` is configured,
/// and the rest of the transfer engine is oblivious to the choice.
pub enum Endpoint {
    Plain(UdpSocket),
    Logged(OperationLogger<UdpSocket>),
}

impl DatagramEndpoint for Endpoint {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Endpoint::Plain(socket) => socket.send(buf).await,
            Endpoint::Logged(logger) => logger.send(buf).await,
        }
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Endpoint::Plain(socket) => socket.recv(buf).await,
            Endpoint::Logged(logger) => logger.recv(buf).await,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Endpoint::Plain(socket) => DatagramEndpoint::local_addr(socket),
            Endpoint::Logged(logger) => logger.local_addr(),
        }
    }
}
