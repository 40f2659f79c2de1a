use thiserror::Error;

/// Error discriminants surfaced to subscribers (§7). The engine never
/// raises out of a callback: every failure path ends by handing one of
/// these to whoever is waiting, never by propagating a panic or unwound
/// error out of a driver task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutboundError {
    /// The deadline for this request (or, for a TCP wait-queue entry, the
    /// deadline measured from enqueue) was reached before a reply arrived.
    #[error("timed out waiting for a reply")]
    Timeout,

    /// A send/recv syscall failed, or a TCP connection reset/refused.
    #[error("network error: {0}")]
    Network(String),

    /// The id in a reply didn't match what was sent, the header was
    /// malformed, or an OPT record was misused.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No free (socket, id) pair was found within the rejection-sampling
    /// bound, or the TCP pool was full and the wait-queue entry's timer
    /// elapsed before a slot freed up.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The caller's target-selection policy produced no candidate.
    #[error("no target available")]
    NoTarget,

    /// All subscribers detached (called `stop`) before a terminal outcome
    /// was reached.
    #[error("request cancelled")]
    Cancelled,

    /// A `serviced_query` submission's argument compared equal, under the
    /// caller-supplied predicate, to an already-registered subscriber's
    /// argument (§4.4). Not one of the six wire-facing discriminants this
    /// core's reply callbacks can produce; it is only ever returned
    /// synchronously from the submission call itself.
    #[error("a subscriber with an equal argument is already registered")]
    Duplicate,
}

impl From<std::io::Error> for OutboundError {
    fn from(e: std::io::Error) -> Self {
        OutboundError::Network(e.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
