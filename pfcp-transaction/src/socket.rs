//! Datagram transmit primitive and the UDP socket behind it.
//!
//! The transaction layer only ever sees [`Transmit`]: one non-blocking
//! `send_to`.  [`Socket`] implements it over `tokio::net::UdpSocket` and also
//! runs the receive side, turning each datagram into a dispatch event.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::dispatcher::Endpoint;

/// Maximum UDP payload size.
const MAX_DATAGRAM: usize = 65_535;

/// Pause after an error caused by a single bad exchange (e.g. an ICMP
/// port-unreachable surfacing as `ConnectionReset`).
const RECV_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Pause after any other receive error.
const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Hand one datagram to the network without waiting.
///
/// Called from the dispatch loop, so implementations must not block.
pub trait Transmit: Send + Sync {
    fn send_to(&self, buf: &[u8], peer: SocketAddr) -> io::Result<usize>;
}

/// A UDP socket shared by the dispatch loop (sending) and the receive task.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }
}

impl Transmit for Socket {
    fn send_to(&self, buf: &[u8], peer: SocketAddr) -> io::Result<usize> {
        // A full send buffer surfaces as `WouldBlock`; the Tx timer retries.
        self.inner.try_send_to(buf, peer)
    }
}

/// Feed every received datagram into `endpoint` until its dispatch loop stops.
pub async fn receive_loop(socket: Arc<Socket>, endpoint: Endpoint) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                if endpoint.is_closed() {
                    break;
                }
                let delay = recv_backoff(&e);
                if delay == RECV_RETRY_DELAY {
                    log::warn!("[udp {}] recv error: {}", socket.local_addr, e);
                } else {
                    log::error!(
                        "[udp {}] recv error: {}, retrying in {:?}",
                        socket.local_addr,
                        e,
                        delay
                    );
                }
                tokio::time::sleep(delay).await;
                continue;
            }
        };
        if len == 0 {
            log::warn!("[udp {}] empty datagram from {}", socket.local_addr, peer);
            continue;
        }
        if endpoint.deliver(buf[..len].to_vec(), peer).is_err() {
            break;
        }
    }
    log::debug!("[udp {}] receive loop stopped", socket.local_addr);
}

/// How long to wait before receiving again after `err`.
fn recv_backoff(err: &io::Error) -> Duration {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => RECV_RETRY_DELAY,
        _ => RECV_ERROR_BACKOFF,
    }
}
