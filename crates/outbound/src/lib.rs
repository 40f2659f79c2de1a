pub mod config;
pub mod engine;
pub mod error;
pub mod infra;
pub mod memory;
pub mod pending;
pub mod rand_source;
pub mod reactor;
pub mod serviced;
pub mod target;
pub mod tcp_pool;
pub mod udp_pool;

pub use config::EngineConfig;
pub use engine::OutboundEngine;
pub use error::OutboundError;
pub use infra::{AllowAll, DoNotQueryList, InfraCache, InfraHint};
pub use rand_source::{RandomSource, ThreadRandom};
pub use reactor::{Reactor, TokioReactor};
pub use serviced::{ArgEq, ServicedHandle, ServicedKey};
pub use target::{Candidate, DelegationPoint};
