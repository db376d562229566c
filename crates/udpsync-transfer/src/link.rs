//! Datagram transport under the ARQ state machines.
//!
//! [`DatagramLink`] is the only thing the sender and receiver know about the
//! network: send one datagram to the fixed peer, receive one datagram with an
//! optional timeout. [`UdpLink`] implements it over a connected UDP socket;
//! [`LossyLink`] wraps any link and drops outbound datagrams to exercise the
//! retransmission paths.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::protocol::Packet;

/// OS socket buffer size requested for transfer sockets (4 MB).
pub const SOCKET_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// A bidirectional, unreliable datagram channel to one peer.
pub trait DatagramLink: Send {
    /// Send one datagram to the peer.
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Receive one datagram into `buf`, returning its length.
    ///
    /// Returns `Ok(None)` when `timeout` elapses without a datagram. `None`
    /// as the timeout blocks until a datagram arrives.
    fn recv(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<Option<usize>>;
}

impl<L: DatagramLink + ?Sized> DatagramLink for Box<L> {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        (**self).send(datagram)
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<Option<usize>> {
        (**self).recv(buf, timeout)
    }
}

/// Bind a blocking UDP socket with large OS buffers.
///
/// Port 0 lets the OS choose an ephemeral port; every transfer binds its own.
pub fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(false)?;
    // Buffer sizes are advisory; a kernel cap is not an error.
    let _ = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE);
    let _ = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE);
    socket.bind(&addr.into())?;

    Ok(socket.into())
}

/// [`DatagramLink`] over a UDP socket connected to the peer.
///
/// Connecting makes the kernel filter out datagrams from any other address,
/// so a stray sender cannot inject packets into the transfer.
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    read_timeout: Option<Duration>,
}

impl UdpLink {
    /// Connect `socket` to `peer` and wrap it.
    pub fn connect(socket: UdpSocket, peer: SocketAddr) -> io::Result<Self> {
        socket.connect(peer)?;
        socket.set_read_timeout(None)?;
        Ok(Self {
            socket,
            read_timeout: None,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        // A zero read timeout is rejected by the OS; poll for the shortest
        // representable wait instead.
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        if timeout != self.read_timeout {
            self.socket.set_read_timeout(timeout)?;
            self.read_timeout = timeout;
        }
        Ok(())
    }
}

impl DatagramLink for UdpLink {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        match self.socket.send(datagram) {
            Ok(_) => Ok(()),
            // An ICMP error from an earlier datagram; this one may still
            // arrive, and if not the ARQ layer resends it.
            Err(e) if is_peer_unreachable(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<Option<usize>> {
        self.set_timeout(timeout)?;
        match self.socket.recv(buf) {
            Ok(n) => Ok(Some(n)),
            // Unix reports WouldBlock, Windows TimedOut
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                Ok(None)
            }
            // Peer port not open yet or already closed: nothing received.
            Err(e) if is_peer_unreachable(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn is_peer_unreachable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

/// Decides whether an outbound datagram is dropped.
pub type DropPolicy = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// Fault-injecting wrapper that silently drops outbound datagrams.
///
/// Inbound traffic is untouched; wrap the peer's link as well to lose
/// datagrams in the other direction.
pub struct LossyLink<L> {
    inner: L,
    policy: DropPolicy,
    dropped: Arc<AtomicU64>,
}

impl<L: DatagramLink> LossyLink<L> {
    /// Drop every datagram for which `policy` returns `true`.
    pub fn new(inner: L, policy: impl FnMut(&[u8]) -> bool + Send + 'static) -> Self {
        Self {
            inner,
            policy: Box::new(policy),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Drop each datagram independently with probability `loss_rate`.
    ///
    /// The RNG is seeded so a failing run can be replayed.
    pub fn random(inner: L, loss_rate: f64, seed: u64) -> Self {
        let loss_rate = loss_rate.clamp(0.0, 1.0);
        let mut rng = StdRng::seed_from_u64(seed);
        Self::new(inner, move |_| rng.random_bool(loss_rate))
    }

    /// Drop only the first transmission of the packet with `index`.
    pub fn drop_first(inner: L, index: i32) -> Self {
        let mut done = false;
        Self::new(inner, move |datagram| {
            if done {
                return false;
            }
            let hit = Packet::decode(datagram).is_ok_and(|pkt| pkt.index == index);
            done = hit;
            hit
        })
    }

    /// Shared counter of datagrams dropped so far.
    pub fn dropped(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }
}

impl<L: DatagramLink> DatagramLink for LossyLink<L> {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        if (self.policy)(datagram) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        self.inner.send(datagram)
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<Option<usize>> {
        self.inner.recv(buf, timeout)
    }
}
