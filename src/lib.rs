//! Client-side load balancer.
//!
//! Linked into a service caller, it keeps a live view of candidate servers,
//! tracks their load and health, picks one server per outgoing request and
//! decides whether a failed attempt is retried, and where.
//!
//! # Architecture
//! ```text
//!   caller ──choose_server()──▶ LoadBalancer ──▶ SelectionRule
//!     │                            │                 │ reads
//!     │ report_outcome()           ▼                 ▼
//!     └──────────────────────▶ HealthRegistry ◀── Prober (background)
//!                                  ▲
//!                  RetryPolicy ────┘ classifies failures
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;

pub use config::schema::LoadBalancerConfig;
pub use error::{Error, Result};
pub use health::{HealthProbe, HealthRegistry, Prober};
pub use lifecycle::Shutdown;
pub use load_balancer::{LoadBalancer, SelectionRule, Server};
pub use resilience::{AttemptFailure, RetryDecision, RetryPolicy};
