use std::collections::HashSet;
use std::net::SocketAddr;

use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::infra::{DoNotQueryList, InfraCache};
use crate::rand_source::RandomSource;

/// One address in a delegation point (§3). `attempts` and `retired`
/// persist across calls to [`select_target`] — a delegation point is
/// walked by the caller one selection at a time as it tries servers, so
/// this list, not a single call's stack, is where attempt counts live.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub addr: SocketAddr,
    pub attempts: u32,
    pub retired: bool,
}

impl Candidate {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            attempts: 0,
            retired: false,
        }
    }
}

/// The set of name servers and glue addresses believed authoritative for
/// a zone cut. Candidate order matters: [`select_target`] stably moves
/// the best-RTT subset to the front, preserving relative order within
/// each partition, so repeated selections keep favoring the same servers
/// without starving the rest outright.
#[derive(Debug, Clone, Default)]
pub struct DelegationPoint {
    pub candidates: Vec<Candidate>,
}

impl DelegationPoint {
    pub fn new(addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            candidates: addrs.into_iter().map(Candidate::new).collect(),
        }
    }
}

struct Survivor {
    addr: SocketAddr,
    selection_rtt: u32,
}

/// Port of `iter_filter_unsuitable` / `iter_fill_rtt` / `iter_filter_order`
/// / `iter_server_selection` (§4.6): filter candidates that cannot be
/// used, band the rest around the best observed RTT, move that best set
/// to the front, and pick uniformly among it.
///
/// `dnssec_expected` is cleared, per the algorithm, when the chosen
/// candidate's selection RTT (after the DNSSEC-lame penalty) is at or
/// above `useful_server_top_timeout`.
pub fn select_target(
    dp: &mut DelegationPoint,
    zone: &str,
    qtype: u16,
    infra: &dyn InfraCache,
    do_not_query: &dyn DoNotQueryList,
    rand: &dyn RandomSource,
    config: &EngineConfig,
    now: Instant,
    dnssec_expected: &mut bool,
) -> Option<SocketAddr> {
    let mut survivors = Vec::new();

    for candidate in &dp.candidates {
        if candidate.retired {
            continue;
        }
        if do_not_query.contains(&candidate.addr) {
            continue;
        }
        if candidate.addr.is_ipv6() && !config.do_ip6 {
            continue;
        }
        if candidate.addr.is_ipv4() && !config.do_ip4 {
            continue;
        }

        let hint = infra.lookup(candidate.addr, zone, qtype, now);
        let (raw_rtt, dnssec_lame, lame) = match hint {
            Some(h) => (h.rtt_ms, h.dnssec_lame, h.lame),
            None => (config.unknown_server_niceness, false, false),
        };

        if lame {
            continue;
        }
        if raw_rtt >= config.useful_server_top_timeout {
            continue;
        }

        let selection_rtt = if dnssec_lame {
            raw_rtt + config.useful_server_top_timeout
        } else {
            raw_rtt
        };

        survivors.push(Survivor {
            addr: candidate.addr,
            selection_rtt,
        });
    }

    let low = survivors.iter().map(|s| s.selection_rtt).min()?;

    let best_set: Vec<&Survivor> = survivors
        .iter()
        .filter(|s| s.selection_rtt.saturating_sub(low) <= config.rtt_band)
        .collect();

    if best_set.is_empty() {
        return None;
    }

    // Stable partition: best-set candidates first (original relative
    // order preserved), then everyone else. This is the Rust shape of
    // the source's swap-to-front, including its no-op on an already-
    // first candidate (§9 open question) — a stable partition never
    // reorders a prefix that is already entirely best-set.
    let best_addrs: HashSet<SocketAddr> = best_set.iter().map(|s| s.addr).collect();
    let (mut front, back): (Vec<Candidate>, Vec<Candidate>) = dp
        .candidates
        .iter()
        .cloned()
        .partition(|c| best_addrs.contains(&c.addr));
    front.extend(back);
    dp.candidates = front;

    let chosen = if best_set.len() == 1 {
        best_set[0]
    } else {
        let pick = (rand.next_u32() as usize) % best_set.len();
        best_set[pick]
    };
    let chosen_addr = chosen.addr;
    let chosen_rtt = chosen.selection_rtt;

    if chosen_rtt >= config.useful_server_top_timeout {
        *dnssec_expected = false;
    }

    if let Some(candidate) = dp.candidates.iter_mut().find(|c| c.addr == chosen_addr) {
        candidate.attempts += 1;
        if candidate.attempts >= config.outbound_msg_retry {
            candidate.retired = true;
        }
    }

    Some(chosen_addr)
}

#[cfg(test)]
#[path = "target_tests.rs"]
mod target_tests;
