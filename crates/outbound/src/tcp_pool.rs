use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::{Duration, Instant};

use crate::error::OutboundError;
use crate::reactor::Reactor;

/// Fixed-capacity TCP connection pool (§4.3). A slot is a `Semaphore`
/// permit rather than a hand-rolled freelist: Tokio guarantees a permit
/// is handed back to the semaphore (not lost) when an `acquire` future is
/// dropped before completing, which is exactly the "wait-queue timeout
/// never consumes a slot" requirement — racing the acquire against the
/// deadline with `select!` gets both the FIFO wait queue and the timeout
/// behavior for free, the same pattern as `TcpPool::get_or_connect` this
/// is grounded on.
pub struct TcpPool {
    num_slots: usize,
    permits: Arc<Semaphore>,
    reactor: Arc<dyn Reactor>,
}

impl TcpPool {
    pub fn new(num_slots: usize, reactor: Arc<dyn Reactor>) -> Self {
        Self {
            num_slots,
            permits: Arc::new(Semaphore::new(num_slots)),
            reactor,
        }
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn free_slots(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.num_slots - self.free_slots()
    }

    /// Submit one TCP request. `timeout` is measured from this call (the
    /// enqueue time), not from whenever a slot actually frees up — a
    /// request that waits the whole timeout out in the queue reports
    /// `Timeout` and never touches a socket.
    pub async fn send(
        &self,
        packet: Vec<u8>,
        dest: SocketAddr,
        timeout: Duration,
    ) -> Result<Bytes, OutboundError> {
        let deadline = self.reactor.now() + timeout;

        let permit = tokio::select! {
            biased;
            _ = tokio::time::sleep_until(deadline) => return Err(OutboundError::Timeout),
            acquired = self.permits.clone().acquire_owned() => acquired.map_err(|_| {
                OutboundError::ResourceExhausted("tcp pool closed".into())
            })?,
        };

        let result = Self::run(packet, dest, deadline).await;
        drop(permit);
        result
    }

    async fn run(packet: Vec<u8>, dest: SocketAddr, deadline: Instant) -> Result<Bytes, OutboundError> {
        if packet.len() > u16::MAX as usize {
            return Err(OutboundError::Protocol("query too large for DNS/TCP".into()));
        }
        let want_id =
            reso_outbound_wire::extract_id(&packet).ok_or_else(|| OutboundError::Protocol("packet too short to carry an id".into()))?;

        let mut stream = tokio::time::timeout_at(deadline, TcpStream::connect(dest))
            .await
            .map_err(|_| OutboundError::Timeout)?
            .map_err(OutboundError::from)?;
        stream.set_nodelay(true).map_err(OutboundError::from)?;

        let len_prefix = (packet.len() as u16).to_be_bytes();
        tokio::time::timeout_at(deadline, stream.write_all(&len_prefix))
            .await
            .map_err(|_| OutboundError::Timeout)?
            .map_err(OutboundError::from)?;
        tokio::time::timeout_at(deadline, stream.write_all(&packet))
            .await
            .map_err(|_| OutboundError::Timeout)?
            .map_err(OutboundError::from)?;

        let mut resp_len_buf = [0u8; 2];
        tokio::time::timeout_at(deadline, stream.read_exact(&mut resp_len_buf))
            .await
            .map_err(|_| OutboundError::Timeout)?
            .map_err(OutboundError::from)?;
        let resp_len = u16::from_be_bytes(resp_len_buf) as usize;

        let mut buf = vec![0u8; resp_len];
        tokio::time::timeout_at(deadline, stream.read_exact(&mut buf))
            .await
            .map_err(|_| OutboundError::Timeout)?
            .map_err(OutboundError::from)?;

        let got_id = reso_outbound_wire::extract_id(&buf)
            .ok_or_else(|| OutboundError::Protocol("tcp reply too short to carry an id".into()))?;
        if got_id != want_id {
            return Err(OutboundError::Protocol(format!(
                "tcp reply id mismatch: sent {want_id}, got {got_id}"
            )));
        }

        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
#[path = "tcp_pool_tests.rs"]
mod tcp_pool_tests;
