//! Per-server health counters.
//!
//! # Responsibilities
//! - Track in-flight, total and failed requests
//! - Track the circuit-tripping failure streak and its last timestamp
//! - Hold the prober's reachability verdict
//!
//! # Design Decisions
//! - Every field is an independent atomic; no lock per server or across servers
//! - Circuit state is derived on read (see `resilience::circuit_breaker`)
//! - Timestamps are milliseconds since the Unix epoch

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::resilience::circuit_breaker::BlackoutPolicy;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Mutable health state for one server.
#[derive(Debug)]
pub struct ServerHealth {
    active_requests: AtomicI64,
    active_requests_changed_at: AtomicU64,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    successive_failures: AtomicU32,
    last_failure_at: AtomicU64,
    reachable: AtomicBool,
}

impl ServerHealth {
    /// Fresh state; servers are considered reachable until a probe says otherwise.
    pub fn new() -> Self {
        Self {
            active_requests: AtomicI64::new(0),
            active_requests_changed_at: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            successive_failures: AtomicU32::new(0),
            last_failure_at: AtomicU64::new(0),
            reachable: AtomicBool::new(true),
        }
    }

    /// A request was dispatched to this server.
    pub fn record_attempt_start(&self, now: u64) {
        self.active_requests.fetch_add(1, Ordering::AcqRel);
        self.active_requests_changed_at.store(now, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// A dispatched request completed.
    pub fn record_attempt_end(&self, success: bool, circuit_tripping: bool, now: u64) {
        self.decrement_active();
        self.active_requests_changed_at.store(now, Ordering::Relaxed);

        if !success {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }
        if circuit_tripping {
            self.successive_failures.fetch_add(1, Ordering::AcqRel);
            self.last_failure_at.store(now, Ordering::Release);
        }
        if success {
            self.successive_failures.store(0, Ordering::Release);
        }
    }

    // Never drop below zero, even for an unmatched end.
    fn decrement_active(&self) {
        let _ = self
            .active_requests
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then(|| n - 1)
            });
    }

    /// Raw in-flight count.
    pub fn active_requests(&self) -> u64 {
        self.active_requests.load(Ordering::Acquire).max(0) as u64
    }

    /// In-flight count as seen at `now`.
    ///
    /// With `timeout_ms` set, a counter that has not moved for that long is
    /// reported as zero so a leaked start cannot starve the server forever.
    pub fn active_requests_at(&self, now: u64, timeout_ms: Option<u64>) -> u64 {
        let count = self.active_requests();
        match timeout_ms {
            Some(timeout) if count > 0 => {
                let changed = self.active_requests_changed_at.load(Ordering::Relaxed);
                if now.saturating_sub(changed) > timeout {
                    0
                } else {
                    count
                }
            }
            _ => count,
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    pub fn successive_failures(&self) -> u32 {
        self.successive_failures.load(Ordering::Acquire)
    }

    pub fn last_failure_at(&self) -> u64 {
        self.last_failure_at.load(Ordering::Acquire)
    }

    pub fn is_circuit_breaker_tripped(&self, policy: &BlackoutPolicy, now: u64) -> bool {
        policy.is_tripped(self.successive_failures(), self.last_failure_at(), now)
    }

    pub fn blackout_remaining_ms(&self, policy: &BlackoutPolicy, now: u64) -> u64 {
        policy.remaining_ms(self.successive_failures(), self.last_failure_at(), now)
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    /// Set by the prober. Returns the previous value.
    pub fn set_reachable(&self, reachable: bool) -> bool {
        self.reachable.swap(reachable, Ordering::AcqRel)
    }

    /// Point-in-time view for reporting.
    pub fn snapshot(&self, policy: &BlackoutPolicy, now: u64, timeout_ms: Option<u64>) -> HealthSnapshot {
        HealthSnapshot {
            active_requests: self.active_requests_at(now, timeout_ms),
            total_requests: self.total_requests(),
            total_failures: self.total_failures(),
            successive_failures: self.successive_failures(),
            circuit_tripped: self.is_circuit_breaker_tripped(policy, now),
            blackout_remaining_ms: self.blackout_remaining_ms(policy, now),
            reachable: self.is_reachable(),
        }
    }
}

impl Default for ServerHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable view of one server's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub active_requests: u64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub successive_failures: u32,
    pub circuit_tripped: bool,
    pub blackout_remaining_ms: u64,
    pub reachable: bool,
}
