//! Random selection strategy.

use rand::Rng;

use crate::load_balancer::round_robin::DEFAULT_MAX_ATTEMPTS;
use crate::load_balancer::{Liveness, SelectionRule, Server, ServerView};

/// Uniform random pick over reachable servers, with the same bounded
/// liveness retry as round-robin.
#[derive(Debug)]
pub struct RandomRule {
    max_attempts: u32,
}

impl RandomRule {
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for RandomRule {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionRule for RandomRule {
    fn choose(&self, view: &ServerView<'_>) -> Option<Server> {
        let candidates = view.reachable;
        if candidates.is_empty() {
            return None;
        }

        let mut rng = rand::thread_rng();
        for _ in 0..self.max_attempts {
            let server = &candidates[rng.gen_range(0..candidates.len())];
            if Liveness::Required.admits(server, view.registry) {
                return Some(server.clone());
            }
        }
        None
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
