//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → LoadBalancerConfig (validated, immutable)
//!     → LoadBalancer::from_config builds rule, retry policy and server list
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CircuitBreakerConfig, ListRefreshConfig, LoadBalancerConfig, ObservabilityConfig,
    ProbeConfig, ProbeKind, RetryConfig, RuleKind, SelectionConfig, ServerConfig,
};
