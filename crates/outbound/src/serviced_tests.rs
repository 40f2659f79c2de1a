use std::any::Any;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use reso_outbound_wire::{DnsHeader, WireReader};
use tokio::net::UdpSocket;

use super::*;
use crate::rand_source::RandomSource;
use crate::reactor::TokioReactor;

struct SeqRandom(AtomicU32);

impl RandomSource for SeqRandom {
    fn next_u32(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// A harness with no authoritative server running behind `dest` — only
/// useful for tests that stop or reject a subscription before any reply
/// could matter. The bound-but-silent socket is leaked into the returned
/// tuple's drop glue so the port stays reserved for the test's duration.
async fn harness() -> (Arc<ServicedIndex>, SocketAddr, UdpSocket) {
    let mut config = EngineConfig::test_default();
    config.interfaces.push(IpAddr::V4(Ipv4Addr::LOCALHOST));
    config.serviced_udp_timeout_ms = 300;
    let memory = Arc::new(MemoryAccounting::new());
    let udp_pool = Arc::new(
        UdpPortPool::create(
            &config,
            Arc::new(SeqRandom(AtomicU32::new(1))),
            memory.clone(),
            Arc::new(TokioReactor),
        )
        .await
        .unwrap(),
    );
    let tcp_pool = Arc::new(TcpPool::new(config.num_tcp_slots, Arc::new(TokioReactor)));
    let server = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .unwrap();
    let dest = server.local_addr().unwrap();
    let index = ServicedIndex::new(udp_pool, tcp_pool, Arc::new(config), memory);
    (index, dest, server)
}

fn query_arcount(buf: &[u8]) -> u16 {
    let mut reader = WireReader::new(buf);
    DnsHeader::decode(&mut reader).map(|h| h.arcount).unwrap_or(0)
}

fn plain_reply(id: u16, rcode: u8, tc: bool) -> Vec<u8> {
    use reso_outbound_wire::{DnsFlags, DnsHeader, WireWriter};
    let header = DnsHeader {
        id,
        flags: DnsFlags {
            qr: true,
            tc,
            rd: true,
            rcode_low: rcode,
            ..DnsFlags::default()
        },
        qdcount: 0,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    };
    let mut w = WireWriter::with_capacity(12);
    header.encode(&mut w);
    w.into_bytes().to_vec()
}

fn qname_example() -> Bytes {
    let mut q = Vec::new();
    q.push(7);
    q.extend_from_slice(b"example");
    q.push(0);
    Bytes::from(q)
}

fn eq_i32(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<i32>(), b.downcast_ref::<i32>()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[tokio::test]
async fn two_concurrent_identical_submissions_share_one_wire_send() {
    let mut config = EngineConfig::test_default();
    config.interfaces.push(IpAddr::V4(Ipv4Addr::LOCALHOST));
    let memory = Arc::new(MemoryAccounting::new());
    let udp_pool = Arc::new(
        UdpPortPool::create(
            &config,
            Arc::new(SeqRandom(AtomicU32::new(1))),
            memory.clone(),
            Arc::new(TokioReactor),
        )
        .await
        .unwrap(),
    );
    let tcp_pool = Arc::new(TcpPool::new(config.num_tcp_slots, Arc::new(TokioReactor)));
    let server = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .unwrap();
    let dest = server.local_addr().unwrap();
    let index = ServicedIndex::new(udp_pool, tcp_pool, Arc::new(config), memory);

    let received = Arc::new(AtomicU32::new(0));
    let received_clone = received.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        let (n, from) = server.recv_from(&mut buf).await.unwrap();
        received_clone.fetch_add(1, Ordering::Relaxed);
        let id = reso_outbound_wire::extract_id(&buf[..n]).unwrap();
        let reply = plain_reply(id, 0, false);
        server.send_to(&reply, from).await.unwrap();
    });

    let h1 = index
        .serviced_query(
            qname_example(),
            1,
            1,
            DnsFlags::query(),
            true,
            dest,
            Box::new(1i32),
            eq_i32,
        )
        .unwrap();
    let h2 = index
        .serviced_query(
            qname_example(),
            1,
            1,
            DnsFlags::query(),
            true,
            dest,
            Box::new(2i32),
            eq_i32,
        )
        .unwrap();

    let (r1, r2) = tokio::join!(h1.wait(), h2.wait());
    let r1 = r1.unwrap();
    let r2 = r2.unwrap();
    assert_eq!(r1, r2);
    assert_eq!(received.load(Ordering::Relaxed), 1);
    assert!(index.is_empty());
}

#[tokio::test]
async fn formerr_on_udp_edns_falls_back_to_plain() {
    let mut config = EngineConfig::test_default();
    config.interfaces.push(IpAddr::V4(Ipv4Addr::LOCALHOST));
    let memory = Arc::new(MemoryAccounting::new());
    let udp_pool = Arc::new(
        UdpPortPool::create(
            &config,
            Arc::new(SeqRandom(AtomicU32::new(1))),
            memory.clone(),
            Arc::new(TokioReactor),
        )
        .await
        .unwrap(),
    );
    let tcp_pool = Arc::new(TcpPool::new(config.num_tcp_slots, Arc::new(TokioReactor)));
    let server = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .unwrap();
    let dest = server.local_addr().unwrap();
    let index = ServicedIndex::new(udp_pool, tcp_pool, Arc::new(config), memory);

    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            let (n, from) = server.recv_from(&mut buf).await.unwrap();
            let id = reso_outbound_wire::extract_id(&buf[..n]).unwrap();
            let arcount = query_arcount(&buf[..n]);
            let reply = if arcount > 0 {
                const FORMERR: u8 = 1;
                plain_reply(id, FORMERR, false)
            } else {
                plain_reply(id, 0, false)
            };
            server.send_to(&reply, from).await.unwrap();
            if arcount == 0 {
                return;
            }
        }
    });

    let handle = index
        .serviced_query(
            qname_example(),
            1,
            1,
            DnsFlags::query(),
            true,
            dest,
            Box::new(1i32),
            eq_i32,
        )
        .unwrap();

    let reply = handle.wait().await.unwrap();
    let header = reso_outbound_wire::parse_reply_header(&reply).unwrap();
    assert_eq!(header.rcode, 0);
}

#[tokio::test]
async fn duplicate_argument_is_rejected() {
    let (index, dest, _server) = harness().await;

    let _h1 = index
        .serviced_query(
            qname_example(),
            1,
            1,
            DnsFlags::query(),
            false,
            dest,
            Box::new(42i32),
            eq_i32,
        )
        .unwrap();

    let second = index.serviced_query(
        qname_example(),
        1,
        1,
        DnsFlags::query(),
        false,
        dest,
        Box::new(42i32),
        eq_i32,
    );

    assert!(matches!(second, Err(OutboundError::Duplicate)));
}

#[tokio::test]
async fn stop_detaches_the_subscriber_without_a_terminal_callback() {
    let (index, dest, _server) = harness().await;

    let handle = index
        .serviced_query(
            qname_example(),
            1,
            1,
            DnsFlags::query(),
            false,
            dest,
            Box::new(1i32),
            eq_i32,
        )
        .unwrap();

    handle.stop();
    let result = handle.wait().await;
    assert_eq!(result, Err(OutboundError::Cancelled));
    assert!(index.is_empty());
}
