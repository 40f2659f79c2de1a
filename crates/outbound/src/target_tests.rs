use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};

use super::*;
use crate::infra::{AllowAll, InfraHint};

struct FakeInfra(HashMap<SocketAddr, InfraHint>);

impl InfraCache for FakeInfra {
    fn lookup(&self, addr: SocketAddr, _zone: &str, _qtype: u16, _now: Instant) -> Option<InfraHint> {
        self.0.get(&addr).copied()
    }
}

struct SeqRandom(AtomicU32);

impl RandomSource for SeqRandom {
    fn next_u32(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

fn addr(last_octet: u8) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, last_octet)), 53)
}

fn test_config() -> EngineConfig {
    let mut c = EngineConfig::test_default();
    c.rtt_band = 50;
    c.useful_server_top_timeout = 376;
    c.outbound_msg_retry = 5;
    c.unknown_server_niceness = 376;
    c
}

#[test]
fn best_set_excludes_the_slow_candidate_and_splits_between_the_fast_pair() {
    let a = addr(1);
    let b = addr(2);
    let c = addr(3);
    let mut dp = DelegationPoint::new([a, b, c]);
    let infra = FakeInfra(HashMap::from([
        (
            a,
            InfraHint {
                rtt_ms: 20,
                lame: false,
                dnssec_lame: false,
            },
        ),
        (
            b,
            InfraHint {
                rtt_ms: 25,
                lame: false,
                dnssec_lame: false,
            },
        ),
        (
            c,
            InfraHint {
                rtt_ms: 400,
                lame: false,
                dnssec_lame: false,
            },
        ),
    ]));
    let config = test_config();
    let do_not_query = AllowAll;

    let mut seen_a = false;
    let mut seen_b = false;
    for seed in 0..20u32 {
        let rand = SeqRandom(AtomicU32::new(seed));
        let mut dnssec_expected = true;
        let picked = select_target(
            &mut dp.clone(),
            "example.",
            1,
            &infra,
            &do_not_query,
            &rand,
            &config,
            Instant::now(),
            &mut dnssec_expected,
        )
        .expect("best set is non-empty");
        assert_ne!(picked, c, "the slow candidate must never be chosen");
        if picked == a {
            seen_a = true;
        }
        if picked == b {
            seen_b = true;
        }
    }
    assert!(seen_a && seen_b, "both fast candidates should be reachable");
}

#[test]
fn single_candidate_is_retired_after_outbound_msg_retry_attempts() {
    let a = addr(1);
    let mut dp = DelegationPoint::new([a]);
    let infra = FakeInfra(HashMap::from([(
        a,
        InfraHint {
            rtt_ms: 20,
            lame: false,
            dnssec_lame: false,
        },
    )]));
    let config = test_config();
    let do_not_query = AllowAll;
    let rand = SeqRandom(AtomicU32::new(0));

    for _ in 0..config.outbound_msg_retry {
        let mut dnssec_expected = true;
        let picked = select_target(
            &mut dp,
            "example.",
            1,
            &infra,
            &do_not_query,
            &rand,
            &config,
            Instant::now(),
            &mut dnssec_expected,
        );
        assert_eq!(picked, Some(a));
    }

    let mut dnssec_expected = true;
    let picked = select_target(
        &mut dp,
        "example.",
        1,
        &infra,
        &do_not_query,
        &rand,
        &config,
        Instant::now(),
        &mut dnssec_expected,
    );
    assert_eq!(picked, None, "candidate must be retired once attempts reach the limit");
}

#[test]
fn no_surviving_candidate_returns_none() {
    let a = addr(1);
    let mut dp = DelegationPoint::new([a]);
    let infra = FakeInfra(HashMap::from([(
        a,
        InfraHint {
            rtt_ms: 999,
            lame: false,
            dnssec_lame: false,
        },
    )]));
    let config = test_config();
    let do_not_query = AllowAll;
    let rand = SeqRandom(AtomicU32::new(0));
    let mut dnssec_expected = true;

    let picked = select_target(
        &mut dp,
        "example.",
        1,
        &infra,
        &do_not_query,
        &rand,
        &config,
        Instant::now(),
        &mut dnssec_expected,
    );
    assert_eq!(picked, None);
}
