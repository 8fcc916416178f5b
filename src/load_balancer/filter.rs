//! Server list filters applied when a new list is installed.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use rand::seq::SliceRandom;

use crate::health::registry::HealthRegistry;
use crate::load_balancer::Server;

/// Narrows a freshly fetched server list before rules see it.
pub trait ServerListFilter: Send + Sync + fmt::Debug {
    fn filter(&self, servers: Vec<Server>, registry: &HealthRegistry, now: u64) -> Vec<Server>;
}

/// Sticky random subset of at most `size` servers.
///
/// Members of the previous subset that are still listed and whose breaker is
/// closed are kept; the rest is refilled at random. Each client therefore
/// talks to its own small, stable slice of the fleet.
#[derive(Debug)]
pub struct RandomSubsetFilter {
    size: usize,
    current: Mutex<Vec<Server>>,
}

impl RandomSubsetFilter {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            current: Mutex::new(Vec::new()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    // Poison is ignored: the subset is only ever replaced whole.
    fn current(&self) -> MutexGuard<'_, Vec<Server>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ServerListFilter for RandomSubsetFilter {
    fn filter(&self, servers: Vec<Server>, registry: &HealthRegistry, now: u64) -> Vec<Server> {
        if servers.len() <= self.size {
            *self.current() = servers.clone();
            return servers;
        }

        let listed: HashSet<&Server> = servers.iter().collect();
        let mut current = self.current();

        let mut chosen: HashSet<Server> = current
            .iter()
            .filter(|s| listed.contains(s) && !registry.is_circuit_breaker_tripped(s, now))
            .take(self.size)
            .cloned()
            .collect();

        let mut pool: Vec<&Server> = servers.iter().filter(|s| !chosen.contains(*s)).collect();
        pool.shuffle(&mut rand::thread_rng());
        for server in pool {
            if chosen.len() >= self.size {
                break;
            }
            chosen.insert(server.clone());
        }

        let subset: Vec<Server> = servers.into_iter().filter(|s| chosen.contains(s)).collect();
        tracing::debug!(size = subset.len(), "Server subset refreshed");
        *current = subset.clone();
        subset
    }
}
