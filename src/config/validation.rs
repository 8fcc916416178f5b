//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, blackout base <= ceiling)
//! - Reject unparsable or duplicate server addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: LoadBalancerConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::LoadBalancerConfig;
use crate::load_balancer::server::Server;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("circuit_breaker.base_blackout_ms ({base}) exceeds max_blackout_ms ({max})")]
    BlackoutRange { base: u64, max: u64 },

    #[error("invalid server address '{0}'")]
    InvalidAddress(String),

    #[error("duplicate server address '{0}'")]
    DuplicateAddress(String),

    #[error("retriable status code {0} is not a valid HTTP status")]
    InvalidStatus(u16),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &LoadBalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.selection.round_robin_max_attempts == 0 {
        errors.push(ValidationError::Zero {
            field: "selection.round_robin_max_attempts",
        });
    }
    if config.selection.subset_size == Some(0) {
        errors.push(ValidationError::Zero {
            field: "selection.subset_size",
        });
    }
    if config.probe.interval_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "probe.interval_ms",
        });
    }
    if config.probe.timeout_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "probe.timeout_ms",
        });
    }
    if config.list_refresh.interval_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "list_refresh.interval_ms",
        });
    }
    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::Zero {
            field: "circuit_breaker.failure_threshold",
        });
    }

    let cb = &config.circuit_breaker;
    if cb.base_blackout_ms > cb.max_blackout_ms {
        errors.push(ValidationError::BlackoutRange {
            base: cb.base_blackout_ms,
            max: cb.max_blackout_ms,
        });
    }

    for status in &config.retries.retriable_status_codes {
        if !(100..=599).contains(status) {
            errors.push(ValidationError::InvalidStatus(*status));
        }
    }

    let mut seen = HashSet::new();
    for server in &config.servers {
        match server.address.parse::<Server>() {
            Ok(parsed) => {
                if !seen.insert(parsed) {
                    errors.push(ValidationError::DuplicateAddress(server.address.clone()));
                }
            }
            Err(_) => errors.push(ValidationError::InvalidAddress(server.address.clone())),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
