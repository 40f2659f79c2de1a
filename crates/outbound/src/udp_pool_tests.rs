use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::net::UdpSocket;
use tokio::time::Duration;

use super::*;
use crate::config::EngineConfig;
use crate::reactor::TokioReactor;

/// A deterministic [`RandomSource`] that always returns the same value,
/// so a test can force a pending-table collision.
struct FixedRandom(u32);

impl RandomSource for FixedRandom {
    fn next_u32(&self) -> u32 {
        self.0
    }
}

/// A [`RandomSource`] that cycles through a fixed sequence, used where a
/// test needs the socket index and id to be predictable but non-zero.
struct SeqRandom(AtomicU32);

impl RandomSource for SeqRandom {
    fn next_u32(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

fn loopback_v4(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

async fn test_pool(rand: Arc<dyn RandomSource>) -> UdpPortPool {
    let mut config = EngineConfig::test_default();
    config.interfaces.push(IpAddr::V4(Ipv4Addr::LOCALHOST));
    UdpPortPool::create(&config, rand, Arc::new(MemoryAccounting::new()), Arc::new(TokioReactor))
        .await
        .expect("pool should bind")
}

#[tokio::test]
async fn send_times_out_when_nobody_answers() {
    let pool = test_pool(Arc::new(SeqRandom(AtomicU32::new(1)))).await;
    let dead_socket = UdpSocket::bind(loopback_v4(0)).await.unwrap();
    let dest = dead_socket.local_addr().unwrap();

    let packet = vec![0u8, 0, 1, 0, 0, 1, 0, 0, 0, 0, 0, 0];
    let result = pool.send(packet, dest, Duration::from_millis(50)).await;

    assert_eq!(result, Err(OutboundError::Timeout));
    assert_eq!(pool.pending_len(), 0);
}

#[tokio::test]
async fn send_receives_the_matching_reply() {
    let pool = test_pool(Arc::new(SeqRandom(AtomicU32::new(1)))).await;
    let server = UdpSocket::bind(loopback_v4(0)).await.unwrap();
    let dest = server.local_addr().unwrap();

    let responder = tokio::spawn(async move {
        let mut buf = [0u8; 512];
        let (n, from) = server.recv_from(&mut buf).await.unwrap();
        let id = reso_outbound_wire::extract_id(&buf[..n]).unwrap();
        let mut reply = buf[..n].to_vec();
        reply[2] |= 0x80; // QR
        reso_outbound_wire::stamp_id(&mut reply, id);
        server.send_to(&reply, from).await.unwrap();
    });

    let packet = vec![0u8, 0, 1, 0, 0, 1, 0, 0, 0, 0, 0, 0];
    let result = pool
        .send(packet, dest, Duration::from_secs(2))
        .await
        .expect("should receive a reply");

    assert_eq!(result[2] & 0x80, 0x80, "reply should carry the QR bit");
    responder.await.unwrap();
}

#[tokio::test]
async fn id_collision_on_every_draw_reports_resource_exhausted() {
    let pool = test_pool(Arc::new(FixedRandom(7))).await;
    // pre-occupy the exact (id, dest) the fixed random source will always draw.
    let dest = loopback_v4(12345);
    let (tx, _rx) = tokio::sync::oneshot::channel();
    pool.pending_table().insert((7u16, dest), tx);

    let packet = vec![0u8, 0, 1, 0, 0, 1, 0, 0, 0, 0, 0, 0];
    let result = pool.send(packet, dest, Duration::from_millis(50)).await;

    assert!(matches!(result, Err(OutboundError::ResourceExhausted(_))));
}
