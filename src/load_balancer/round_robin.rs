//! Round-robin selection strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::health::registry::HealthRegistry;
use crate::load_balancer::{Liveness, SelectionRule, Server, ServerView};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Round-robin selector.
///
/// Rotates a shared cursor over the reachable servers. The cursor is advanced
/// with a compare-and-swap loop, so concurrent callers never block; under
/// contention the rotation is eventually fair rather than exact.
#[derive(Debug)]
pub struct RoundRobin {
    cursor: AtomicUsize,
    max_attempts: u32,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            cursor: AtomicUsize::new(0),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Advance the cursor and return the new position modulo `modulo`.
    fn increment_and_get_modulo(&self, modulo: usize) -> usize {
        let mut current = self.cursor.load(Ordering::Relaxed);
        loop {
            let next = (current + 1) % modulo;
            match self.cursor.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Rotate over `candidates`, skipping servers that fail `liveness`.
    pub fn choose_from(
        &self,
        candidates: &[Server],
        registry: &HealthRegistry,
        liveness: Liveness,
    ) -> Option<Server> {
        if candidates.is_empty() {
            tracing::warn!("No servers available for round-robin selection");
            return None;
        }

        for _ in 0..self.max_attempts {
            let index = self.increment_and_get_modulo(candidates.len());
            let server = &candidates[index];
            if liveness.admits(server, registry) {
                return Some(server.clone());
            }
        }

        tracing::warn!(
            attempts = self.max_attempts,
            candidates = candidates.len(),
            "No live server found by round-robin"
        );
        None
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionRule for RoundRobin {
    fn choose(&self, view: &ServerView<'_>) -> Option<Server> {
        self.choose_from(view.reachable, view.registry, Liveness::Required)
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
