//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a load balancer.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::circuit_breaker::BlackoutCurve;

/// Root configuration for one client-side load balancer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Name used in logs and metric labels.
    pub name: String,

    /// Statically configured servers.
    pub servers: Vec<ServerConfig>,

    /// Selection rule settings.
    pub selection: SelectionConfig,

    /// Background probe settings.
    pub probe: ProbeConfig,

    /// Per-server circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry budgets and classification.
    pub retries: RetryConfig,

    /// Server list polling.
    pub list_refresh: ListRefreshConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            servers: Vec::new(),
            selection: SelectionConfig::default(),
            probe: ProbeConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retries: RetryConfig::default(),
            list_refresh: ListRefreshConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// A statically configured server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server address (e.g., "10.0.0.1:8080").
    pub address: String,

    /// Optional zone tag.
    #[serde(default)]
    pub zone: Option<String>,

    /// Admission flag; a server that is not ready is never selected.
    #[serde(default = "default_ready_to_serve")]
    pub ready_to_serve: bool,

    /// Free-form metadata carried with the server.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_ready_to_serve() -> bool {
    true
}

/// Which selection rule the load balancer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    #[default]
    RoundRobin,
    LeastActive,
    Random,
}

/// Selection rule configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Rule to apply.
    pub rule: RuleKind,

    /// Bounded retries inside one round-robin selection call.
    pub round_robin_max_attempts: u32,

    /// Size of the random subset the rule sees. `None` disables subsetting.
    pub subset_size: Option<usize>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            rule: RuleKind::RoundRobin,
            round_robin_max_attempts: 10,
            subset_size: None,
        }
    }
}

/// Which probe the prober runs against each server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Always reports alive; probing is effectively disabled.
    #[default]
    Constant,
    /// TCP connect check.
    Tcp,
    /// HTTP GET against `path`.
    Http,
}

/// Health probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Run the background prober.
    pub enabled: bool,

    /// Probe implementation.
    pub kind: ProbeKind,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Interval between probe rounds in milliseconds.
    pub interval_ms: u64,

    /// Hard deadline for a single probe in milliseconds.
    pub timeout_ms: u64,
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: ProbeKind::Constant,
            path: "/health".to_string(),
            interval_ms: 30_000,
            timeout_ms: 2_000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Growth curve of the blackout window.
    pub curve: BlackoutCurve,

    /// Blackout applied once the failure threshold is reached, in milliseconds.
    pub base_blackout_ms: u64,

    /// Ceiling for the blackout window in milliseconds.
    pub max_blackout_ms: u64,

    /// Consecutive circuit-tripping failures before the breaker opens.
    pub failure_threshold: u32,

    /// Report zero in-flight requests when the counter has been idle this long.
    pub active_requests_timeout_ms: Option<u64>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            curve: BlackoutCurve::Exponential,
            base_blackout_ms: 10_000,
            max_blackout_ms: 30_000,
            failure_threshold: 1,
            active_requests_timeout_ms: None,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries against the server that just failed.
    pub max_retries_same_server: u32,

    /// Retries against freshly selected servers.
    pub max_retries_other_servers: u32,

    /// Treat every failure as retriable.
    pub retry_on_all_errors: bool,

    /// Response statuses worth retrying on another server.
    pub retriable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries_same_server: 0,
            max_retries_other_servers: 1,
            retry_on_all_errors: false,
            retriable_status_codes: vec![503],
        }
    }
}

/// Server list polling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListRefreshConfig {
    /// Interval between list refreshes in milliseconds.
    pub interval_ms: u64,
}

impl Default for ListRefreshConfig {
    fn default() -> Self {
        Self { interval_ms: 30_000 }
    }
}

impl ListRefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
