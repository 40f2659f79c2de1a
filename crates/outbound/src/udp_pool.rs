use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::Duration;

use crate::config::EngineConfig;
use crate::error::OutboundError;
use crate::memory::MemoryAccounting;
use crate::pending::PendingTable;
use crate::rand_source::RandomSource;
use crate::reactor::Reactor;

/// Bound on rejection-sampling draws before a send gives up with
/// `ResourceExhausted` (§4.1).
const MAX_ALLOC_ATTEMPTS: u32 = 64;

/// Owns the fixed set of bound UDP source sockets for one engine and the
/// pending-request index they demultiplex replies against. Kept as two
/// separate per-family lists, not one flat `Vec`, so a send can never be
/// dispatched on a family-mismatched socket: `allocate` draws only from
/// the list matching the destination's family. Each socket has its own
/// reader task; a reply is matched to its request purely by (id, source
/// address), so one pending table is shared by every socket.
pub struct UdpPortPool {
    v4_sockets: Vec<Arc<UdpSocket>>,
    v6_sockets: Vec<Arc<UdpSocket>>,
    pending: Arc<PendingTable>,
    rand: Arc<dyn RandomSource>,
    reactor: Arc<dyn Reactor>,
}

impl UdpPortPool {
    /// Bind `config.num_udp_ports` sockets per configured interface per
    /// enabled address family, and spawn their reader tasks. An interface
    /// list with no address of a given family falls back to that
    /// family's wildcard address (mirroring the original's separate
    /// `udp4_ports`/`udp6_ports` bind loops). Sequential binding from
    /// `port_base` when set, otherwise ephemeral ports chosen by the OS.
    pub async fn create(
        config: &EngineConfig,
        rand: Arc<dyn RandomSource>,
        memory: Arc<MemoryAccounting>,
        reactor: Arc<dyn Reactor>,
    ) -> anyhow::Result<Self> {
        let pending = Arc::new(PendingTable::new(memory.clone()));

        let v4_sockets = if config.do_ip4 {
            bind_family(config, &pending, true).await?
        } else {
            Vec::new()
        };
        let v6_sockets = if config.do_ip6 {
            bind_family(config, &pending, false).await?
        } else {
            Vec::new()
        };

        anyhow::ensure!(!v4_sockets.is_empty() || !v6_sockets.is_empty(), "no UDP address family enabled");
        memory.add(config.buf_size * (v4_sockets.len() + v6_sockets.len()));

        Ok(Self {
            v4_sockets,
            v6_sockets,
            pending,
            rand,
            reactor,
        })
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Walk the pending index at shutdown, dropping every outstanding
    /// request's channel without a separate per-entry timer cancel —
    /// the reader tasks are about to be dropped along with this pool, so
    /// there is nothing left to race against (§9's "already-detached"
    /// fast path).
    pub fn shutdown(&self) {
        self.pending.drain_all();
    }

    #[cfg(test)]
    pub(crate) fn pending_table(&self) -> &PendingTable {
        &self.pending
    }

    /// Allocate a (socket, id) pair by rejection sampling, stamp `id` into
    /// `packet`, send it to `dest`, and race the reply against `timeout`.
    pub async fn send(
        &self,
        mut packet: Vec<u8>,
        dest: SocketAddr,
        timeout: Duration,
    ) -> Result<Bytes, OutboundError> {
        let (socket, id) = self.allocate(dest)?;
        reso_outbound_wire::stamp_id(&mut packet, id);
        let key = (id, dest);

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.pending.insert(key, tx);

        if let Err(e) = socket.send_to(&packet, dest).await {
            self.pending.remove(&key);
            return Err(OutboundError::from(e));
        }

        let deadline = self.reactor.now() + timeout;
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                self.pending.remove(&key);
                Err(OutboundError::Timeout)
            }
            reply = rx => {
                reply.map_err(|_| OutboundError::Cancelled)
            }
        }
    }

    /// Draw a random (socket, id) pair from the list matching `dest`'s
    /// address family, redrawing on a pending-table collision, up to
    /// [`MAX_ALLOC_ATTEMPTS`] times.
    fn allocate(&self, dest: SocketAddr) -> Result<(Arc<UdpSocket>, u16), OutboundError> {
        let sockets: &[Arc<UdpSocket>] = match dest {
            SocketAddr::V4(_) => &self.v4_sockets,
            SocketAddr::V6(_) => &self.v6_sockets,
        };
        if sockets.is_empty() {
            return Err(OutboundError::ResourceExhausted(
                "no bound socket for destination's address family".into(),
            ));
        }

        for _ in 0..MAX_ALLOC_ATTEMPTS {
            let socket = &sockets[(self.rand.next_u32() as usize) % sockets.len()];
            let id = self.rand.next_u32() as u16;
            if !self.pending.contains(&(id, dest)) {
                return Ok((socket.clone(), id));
            }
        }
        Err(OutboundError::ResourceExhausted(
            "no free (socket, id) pair after rejection-sampling bound".into(),
        ))
    }
}

/// Bind `config.num_udp_ports` sockets per configured interface of the
/// requested family (or that family's wildcard address if none of
/// `config.interfaces` belongs to it), spawning a reader task per socket.
async fn bind_family(
    config: &EngineConfig,
    pending: &Arc<PendingTable>,
    v4: bool,
) -> anyhow::Result<Vec<Arc<UdpSocket>>> {
    let mut addrs: Vec<IpAddr> = config.interfaces.iter().copied().filter(|ip| ip.is_ipv4() == v4).collect();
    if addrs.is_empty() {
        addrs.push(if v4 {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        });
    }

    let mut sockets = Vec::with_capacity(addrs.len() * config.num_udp_ports);
    for ip in addrs {
        for i in 0..config.num_udp_ports {
            let port = config.port_base.map(|base| base + i as u16).unwrap_or(0);
            let socket = UdpSocket::bind(SocketAddr::new(ip, port)).await?;
            let socket = Arc::new(socket);
            spawn_reader(socket.clone(), pending.clone(), config.buf_size);
            sockets.push(socket);
        }
    }
    Ok(sockets)
}

/// Per-socket loop: read a datagram into a freshly-allocated buffer (the
/// secondary-buffer guarantee of §4.1 falls out naturally here — the
/// buffer handed to a matched request is never reused by this loop, it
/// is replaced by a new allocation on the next iteration), extract the
/// id, and dispatch to the matching pending entry.
fn spawn_reader(socket: Arc<UdpSocket>, pending: Arc<PendingTable>, buf_size: usize) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; buf_size];
        loop {
            let (n, src) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "udp recv failed, reader task exiting");
                    return;
                }
            };

            let Some(id) = reso_outbound_wire::extract_id(&buf[..n]) else {
                tracing::warn!(%src, "udp reply too short to carry an id, dropped");
                continue;
            };

            match pending.remove(&(id, src)) {
                Some(tx) => {
                    let _ = tx.send(Bytes::copy_from_slice(&buf[..n]));
                }
                None => {
                    tracing::warn!(%src, id, "udp reply matches no pending request, dropped");
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "udp_pool_tests.rs"]
mod udp_pool_tests;
