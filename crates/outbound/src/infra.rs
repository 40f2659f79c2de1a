use std::net::SocketAddr;

use tokio::time::Instant;

/// Per-server history consulted by target selection (§4.6): round-trip
/// time, and whether the server is known to be lame (or DNSSEC-lame) for
/// the zone in question.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InfraHint {
    pub rtt_ms: u32,
    pub lame: bool,
    pub dnssec_lame: bool,
}

/// External collaborator owning per-server RTT/lameness/EDNS-support
/// history. Borrowed for the engine's lifetime; shared across engines, so
/// implementations must synchronise internally.
pub trait InfraCache: Send + Sync {
    fn lookup(&self, addr: SocketAddr, zone: &str, qtype: u16, now: Instant) -> Option<InfraHint>;
}

/// External collaborator answering whether an address must never be
/// queried (administratively blocked, RFC 1918 martian, etc).
pub trait DoNotQueryList: Send + Sync {
    fn contains(&self, addr: &SocketAddr) -> bool;
}

/// A [`DoNotQueryList`] that blocks nothing, for callers with no policy.
#[derive(Debug, Default)]
pub struct AllowAll;

impl DoNotQueryList for AllowAll {
    fn contains(&self, _addr: &SocketAddr) -> bool {
        false
    }
}
