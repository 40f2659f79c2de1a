use tokio::time::Instant;

/// Abstracts the timer/socket-readiness source the engine is driven by.
/// The shipped implementation just asks the ambient Tokio runtime — all
/// actual socket I/O and timers in this crate go straight through
/// `tokio::net`/`tokio::time`, the way `reso-resolver`'s forwarder does;
/// this trait exists so a test harness can swap in a fake clock rather
/// than binding real sockets for every scenario (§2 Test tooling).
pub trait Reactor: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Production [`Reactor`]: the engine's suspension points are exactly
/// `tokio::time`/`tokio::net` awaits, so this has nothing to own beyond
/// being a handle callers pass around.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioReactor;

impl Reactor for TokioReactor {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
