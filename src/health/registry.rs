//! Concurrent server → health mapping.
//!
//! # Responsibilities
//! - Lazily create a `ServerHealth` the first time a server is observed
//!   by an attempt or by [`HealthRegistry::track`]
//! - Record attempt outcomes and answer circuit breaker queries
//! - Prune entries for servers that left the live list
//! - Produce aggregate snapshots for reporting

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::config::schema::CircuitBreakerConfig;
use crate::health::stats::{HealthSnapshot, ServerHealth};
use crate::load_balancer::server::Server;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::BlackoutPolicy;

/// Health state for every known server.
#[derive(Debug)]
pub struct HealthRegistry {
    entries: DashMap<Server, Arc<ServerHealth>>,
    blackout: BlackoutPolicy,
    active_requests_timeout_ms: Option<u64>,
}

impl HealthRegistry {
    pub fn new(blackout: BlackoutPolicy) -> Self {
        Self {
            entries: DashMap::new(),
            blackout,
            active_requests_timeout_ms: None,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self {
            entries: DashMap::new(),
            blackout: BlackoutPolicy::from_config(config),
            active_requests_timeout_ms: config.active_requests_timeout_ms,
        }
    }

    pub fn blackout_policy(&self) -> &BlackoutPolicy {
        &self.blackout
    }

    /// Health entry for `server`, created on first use.
    pub fn health(&self, server: &Server) -> Arc<ServerHealth> {
        if let Some(entry) = self.entries.get(server) {
            return entry.value().clone();
        }
        self.entries
            .entry(server.clone())
            .or_insert_with(|| Arc::new(ServerHealth::new()))
            .value()
            .clone()
    }

    /// Existing entry without creating one.
    pub fn get(&self, server: &Server) -> Option<Arc<ServerHealth>> {
        self.entries.get(server).map(|e| e.value().clone())
    }

    pub fn record_attempt_start(&self, server: &Server, now: u64) {
        let health = self.health(server);
        health.record_attempt_start(now);
        metrics::record_active_requests(server, health.active_requests());
    }

    pub fn record_attempt_end(&self, server: &Server, success: bool, circuit_tripping: bool, now: u64) {
        let health = self.health(server);
        health.record_attempt_end(success, circuit_tripping, now);

        metrics::record_attempt(server, success);
        metrics::record_active_requests(server, health.active_requests());
        if circuit_tripping {
            metrics::record_circuit_trip(server);
            tracing::debug!(
                server = %server,
                successive_failures = health.successive_failures(),
                blackout_ms = self.blackout.blackout_ms(health.successive_failures()),
                "Circuit-tripping failure recorded"
            );
        }
    }

    pub fn is_circuit_breaker_tripped(&self, server: &Server, now: u64) -> bool {
        self.get(server)
            .map(|h| h.is_circuit_breaker_tripped(&self.blackout, now))
            .unwrap_or(false)
    }

    /// In-flight requests; `now` matters only when an idle timeout is configured.
    pub fn active_requests(&self, server: &Server, now: u64) -> u64 {
        self.get(server)
            .map(|h| h.active_requests_at(now, self.active_requests_timeout_ms))
            .unwrap_or(0)
    }

    /// Unknown servers are optimistically reachable.
    pub fn is_reachable(&self, server: &Server) -> bool {
        self.get(server).map(|h| h.is_reachable()).unwrap_or(true)
    }

    /// Returns true when the value changed. Untracked servers are ignored,
    /// so a late verdict cannot resurrect a pruned entry.
    pub fn set_reachable(&self, server: &Server, reachable: bool) -> bool {
        let Some(health) = self.get(server) else {
            return false;
        };
        let previous = health.set_reachable(reachable);
        metrics::record_server_reachable(server, reachable);
        previous != reachable
    }

    /// Ensure every server in `servers` has an entry.
    pub fn track(&self, servers: &[Server]) {
        for server in servers {
            self.health(server);
        }
    }

    /// Drop entries for servers not in `live`.
    pub fn retain_only(&self, live: &[Server]) -> usize {
        let live: HashSet<&Server> = live.iter().collect();
        let before = self.entries.len();
        self.entries.retain(|server, _| live.contains(server));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of `servers`, in their order. Untracked servers report a
    /// fresh health record and are not added.
    pub fn snapshot(&self, servers: &[Server], now: u64) -> RegistrySnapshot {
        let servers: Vec<ServerSnapshot> = servers
            .iter()
            .map(|server| {
                let health = self.get(server).unwrap_or_default();
                ServerSnapshot {
                    server: server.id(),
                    zone: server.zone().map(str::to_string),
                    ready_to_serve: server.is_ready_to_serve(),
                    health: health.snapshot(&self.blackout, now, self.active_requests_timeout_ms),
                }
            })
            .collect();

        RegistrySnapshot {
            total_servers: servers.len(),
            reachable_servers: servers.iter().filter(|s| s.health.reachable).count(),
            tripped_servers: servers.iter().filter(|s| s.health.circuit_tripped).count(),
            active_requests: servers.iter().map(|s| s.health.active_requests).sum(),
            servers,
        }
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new(BlackoutPolicy::default())
    }
}

/// One server in a registry snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub server: String,
    pub zone: Option<String>,
    pub ready_to_serve: bool,
    #[serde(flatten)]
    pub health: HealthSnapshot,
}

/// Aggregate view across a server list.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub total_servers: usize,
    pub reachable_servers: usize,
    pub tripped_servers: usize,
    pub active_requests: u64,
    pub servers: Vec<ServerSnapshot>,
}
