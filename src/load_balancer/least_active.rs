//! Least-active-requests selection strategy.

use crate::load_balancer::round_robin::RoundRobin;
use crate::load_balancer::{Liveness, SelectionRule, Server, ServerView};

/// Least-active selector.
///
/// Scans every known server (reachability is not consulted) and picks the one
/// with the fewest in-flight requests whose circuit breaker is closed. Ties go
/// to the first server in list order. When every breaker is tripped it falls
/// back to round-robin over the full list, preferring a tripped server over no
/// server at all.
///
/// The scan is linear; pair it with a [`RandomSubsetFilter`] to keep the
/// candidate list short.
///
/// [`RandomSubsetFilter`]: crate::load_balancer::RandomSubsetFilter
#[derive(Debug, Default)]
pub struct LeastActive {
    fallback: RoundRobin,
}

impl LeastActive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(fallback: RoundRobin) -> Self {
        Self { fallback }
    }
}

impl SelectionRule for LeastActive {
    fn choose(&self, view: &ServerView<'_>) -> Option<Server> {
        let mut chosen: Option<&Server> = None;
        let mut minimal = u64::MAX;

        for server in view.all {
            if view.registry.is_circuit_breaker_tripped(server, view.now) {
                continue;
            }
            let active = view.registry.active_requests(server, view.now);
            if active < minimal {
                minimal = active;
                chosen = Some(server);
            }
        }

        match chosen {
            Some(server) => Some(server.clone()),
            None => {
                tracing::debug!(
                    servers = view.all.len(),
                    "All circuit breakers tripped, falling back to round-robin"
                );
                self.fallback
                    .choose_from(view.all, view.registry, Liveness::Required)
                    .or_else(|| {
                        self.fallback
                            .choose_from(view.all, view.registry, Liveness::Ignored)
                    })
            }
        }
    }

    fn name(&self) -> &'static str {
        "least_active"
    }
}
