//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! caller asks LoadBalancer for a server
//!     → balancer.rs (snapshot server lists, build ServerView)
//!     → Apply selection rule:
//!         - round_robin.rs (shared cyclic cursor over reachable servers)
//!         - least_active.rs (fewest in-flight, skip tripped breakers)
//!         - random.rs (uniform pick over reachable servers)
//!     → caller dispatches, then reports the outcome back
//!     → health registry updated, retry policy consulted
//! ```
//!
//! # Design Decisions
//! - Rules are strategy objects; the server lists and registry are passed per call
//! - Server lists are immutable snapshots swapped wholesale on refresh
//! - A rule returning `None` is surfaced as `NoServerAvailable`, never retried

use std::fmt;
use std::sync::Arc;

use crate::config::schema::{RuleKind, SelectionConfig};
use crate::health::registry::HealthRegistry;

pub mod balancer;
pub mod filter;
pub mod least_active;
pub mod list;
pub mod random;
pub mod round_robin;
pub mod server;

pub use balancer::{LoadBalancer, LoadBalancerBuilder};
pub use filter::{RandomSubsetFilter, ServerListFilter};
pub use least_active::LeastActive;
pub use list::{refresh_once, spawn_list_refresher, ServerListSource, StaticServerList};
pub use random::RandomRule;
pub use round_robin::RoundRobin;
pub use server::Server;

/// Everything a rule may look at for one selection.
#[derive(Debug, Clone, Copy)]
pub struct ServerView<'a> {
    /// Every known server.
    pub all: &'a [Server],
    /// Servers the prober currently considers reachable.
    pub reachable: &'a [Server],
    pub registry: &'a HealthRegistry,
    /// Milliseconds since the Unix epoch.
    pub now: u64,
}

/// Strategy that picks one server, or none.
pub trait SelectionRule: Send + Sync + fmt::Debug {
    fn choose(&self, view: &ServerView<'_>) -> Option<Server>;

    /// Rule name for logs.
    fn name(&self) -> &'static str;
}

/// Whether a candidate must pass the liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Reachable and ready to serve.
    Required,
    /// Accept any candidate.
    Ignored,
}

impl Liveness {
    pub fn admits(self, server: &Server, registry: &HealthRegistry) -> bool {
        match self {
            Liveness::Required => server.is_ready_to_serve() && registry.is_reachable(server),
            Liveness::Ignored => true,
        }
    }
}

/// Build the configured selection rule.
pub fn rule_from_config(config: &SelectionConfig) -> Arc<dyn SelectionRule> {
    let attempts = config.round_robin_max_attempts;
    match config.rule {
        RuleKind::RoundRobin => Arc::new(RoundRobin::with_max_attempts(attempts)),
        RuleKind::LeastActive => Arc::new(LeastActive::with_fallback(
            RoundRobin::with_max_attempts(attempts),
        )),
        RuleKind::Random => Arc::new(RandomRule::with_max_attempts(attempts)),
    }
}
