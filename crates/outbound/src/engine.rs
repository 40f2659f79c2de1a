use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use reso_outbound_wire::DnsFlags;
use tokio::time::Duration;

use crate::config::EngineConfig;
use crate::error::OutboundError;
use crate::infra::{DoNotQueryList, InfraCache};
use crate::memory::MemoryAccounting;
use crate::rand_source::RandomSource;
use crate::reactor::Reactor;
use crate::serviced::{ArgEq, ServicedHandle, ServicedIndex};
use crate::target::{self, DelegationPoint};
use crate::tcp_pool::TcpPool;
use crate::udp_pool::UdpPortPool;

/// Top-level facade wiring the port/id pool, the TCP connection pool, the
/// serviced-query dedup index and target selection into one handle (§6).
/// Everything here is a thin delegation to the module that owns the
/// actual state; this type exists so a caller only has to construct and
/// hold one `Arc`.
pub struct OutboundEngine {
    udp_pool: Arc<UdpPortPool>,
    tcp_pool: Arc<TcpPool>,
    serviced: Arc<ServicedIndex>,
    config: Arc<EngineConfig>,
    memory: Arc<MemoryAccounting>,
    infra: Arc<dyn InfraCache>,
    rand: Arc<dyn RandomSource>,
    do_not_query: Arc<dyn DoNotQueryList>,
    reactor: Arc<dyn Reactor>,
}

impl OutboundEngine {
    /// Bind the UDP port pool and bring up the rest of the engine's state
    /// around it. The TCP pool and serviced-query index need no I/O of
    /// their own to start. `reactor` is the clock every deadline in the
    /// engine is computed from — swap in a fake one to drive the pools
    /// and target selection off something other than the wall clock in
    /// tests.
    pub async fn create(
        config: EngineConfig,
        infra: Arc<dyn InfraCache>,
        rand: Arc<dyn RandomSource>,
        do_not_query: Arc<dyn DoNotQueryList>,
        reactor: Arc<dyn Reactor>,
    ) -> anyhow::Result<Arc<Self>> {
        let config = Arc::new(config);
        let memory = Arc::new(MemoryAccounting::new());
        let udp_pool = Arc::new(UdpPortPool::create(&config, rand.clone(), memory.clone(), reactor.clone()).await?);
        let tcp_pool = Arc::new(TcpPool::new(config.num_tcp_slots, reactor.clone()));
        let serviced = ServicedIndex::new(udp_pool.clone(), tcp_pool.clone(), config.clone(), memory.clone());

        Ok(Arc::new(Self {
            udp_pool,
            tcp_pool,
            serviced,
            config,
            memory,
            infra,
            rand,
            do_not_query,
            reactor,
        }))
    }

    /// Fire-and-wait a single UDP query with exactly one subscriber: no
    /// dedup, no retry, no transport fallback (§4.1).
    pub async fn send_udp(&self, packet: Vec<u8>, dest: SocketAddr, timeout: Duration) -> Result<Bytes, OutboundError> {
        self.udp_pool.send(packet, dest, timeout).await
    }

    /// Fire-and-wait a single TCP query through the shared connection
    /// pool: no dedup, no retry, no transport fallback (§4.3).
    pub async fn send_tcp(&self, packet: Vec<u8>, dest: SocketAddr, timeout: Duration) -> Result<Bytes, OutboundError> {
        self.tcp_pool.send(packet, dest, timeout).await
    }

    /// Submit or attach to a deduplicated, transport-escalating query
    /// (§4.4). Returns `Err(OutboundError::Duplicate)` synchronously if
    /// `arg` compares equal, under `arg_eq`, to an already-registered
    /// subscriber on the same question.
    pub fn serviced_query(
        self: &Arc<Self>,
        qname: Bytes,
        qtype: u16,
        qclass: u16,
        flags: DnsFlags,
        dnssec: bool,
        destination: SocketAddr,
        arg: Box<dyn Any + Send>,
        arg_eq: ArgEq,
    ) -> Result<ServicedHandle, OutboundError> {
        self.serviced
            .serviced_query(qname, qtype, qclass, flags, dnssec, destination, arg, arg_eq)
    }

    /// Total bytes currently charged against this engine's running memory
    /// budget (§4.5): shared UDP buffers, the pending-UDP index, and the
    /// serviced-query index's qname copies and subscriber lists.
    pub fn memory_in_use(&self) -> usize {
        self.memory.total()
    }

    /// Number of serviced-query entries currently in flight, including
    /// ones mid-fan-out.
    pub fn serviced_in_flight(&self) -> usize {
        self.serviced.len()
    }

    /// Choose the next target from a delegation point, reordering its
    /// candidates in place (§4.6). Timestamps infra-cache lookups off
    /// this engine's `Reactor` rather than the wall clock directly, so a
    /// fake reactor drives both the pools and target selection.
    pub fn select_target(
        &self,
        dp: &mut DelegationPoint,
        zone: &str,
        qtype: u16,
        dnssec_expected: &mut bool,
    ) -> Option<SocketAddr> {
        target::select_target(
            dp,
            zone,
            qtype,
            self.infra.as_ref(),
            self.do_not_query.as_ref(),
            self.rand.as_ref(),
            &self.config,
            self.reactor.now(),
            dnssec_expected,
        )
    }

    /// Release what can be released synchronously: every outstanding UDP
    /// pending entry is dropped without sending a reply. Serviced-query
    /// driver tasks and in-flight TCP sends are left to wind down (or get
    /// aborted) as this engine's `Arc` is dropped along with them.
    pub fn shutdown(&self) {
        self.udp_pool.shutdown();
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod engine_tests;
