use std::net::IpAddr;

use serde::Deserialize;

/// Tunables for one [`crate::engine::OutboundEngine`] instance. Constructed
/// by the caller (optionally via `toml`/`serde`, the way the host binary
/// builds its own config) and handed to `OutboundEngine::create`; this crate
/// never reads a config file or env var itself.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Number of UDP source sockets to open per interface/address family.
    pub num_udp_ports: usize,
    /// Local addresses to bind outgoing sockets to. Empty means "let the OS
    /// pick a wildcard address per enabled family".
    #[serde(default)]
    pub interfaces: Vec<IpAddr>,
    pub do_ip4: bool,
    pub do_ip6: bool,
    /// Starting port for sequential binding, or `None` for ephemeral ports.
    #[serde(default)]
    pub port_base: Option<u16>,
    /// Number of TCP slots in the connection pool.
    pub num_tcp_slots: usize,
    /// Shared UDP receive buffer size, in octets.
    pub buf_size: usize,

    /// RTT band (ms) within which candidates are considered equivalent.
    pub rtt_band: u32,
    /// RTT (ms) at or above which a server is considered unusable.
    pub useful_server_top_timeout: u32,
    /// Attempt count at which a candidate is retired from selection.
    pub outbound_msg_retry: u32,
    /// Assumed RTT (ms) for a candidate with no infra-cache history.
    pub unknown_server_niceness: u32,
    /// Number of UDP retries (same transport/EDNS state) before escalating
    /// to TCP. The source this is ported from defines `retry` but never a
    /// fixed K; it is configuration here, not a constant.
    pub udp_retry_budget: u32,

    /// Per-attempt UDP timeout used internally by the serviced-query state
    /// machine. `send_udp`'s own timeout is still caller-supplied per
    /// call; this is the value the dedup engine uses when it drives its
    /// own retries, since §6's `serviced_query` signature carries no
    /// per-call timeout of its own.
    pub serviced_udp_timeout_ms: u64,
    /// Per-attempt TCP timeout, same rationale as `serviced_udp_timeout_ms`.
    pub serviced_tcp_timeout_s: u64,
}

impl EngineConfig {
    /// A configuration sized for tests and small deployments: one UDP
    /// socket, a handful of TCP slots, conservative RTT thresholds.
    pub fn test_default() -> Self {
        Self {
            num_udp_ports: 1,
            interfaces: Vec::new(),
            do_ip4: true,
            do_ip6: false,
            port_base: None,
            num_tcp_slots: 2,
            buf_size: 4096,
            rtt_band: 50,
            useful_server_top_timeout: 376,
            outbound_msg_retry: 5,
            unknown_server_niceness: 376,
            udp_retry_budget: 3,
            serviced_udp_timeout_ms: 500,
            serviced_tcp_timeout_s: 5,
        }
    }
}
