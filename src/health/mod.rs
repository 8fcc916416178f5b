//! Health tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Passive (request path):
//!     attempt start/end reported by the caller
//!     → registry.rs (lazy per-server entry)
//!     → stats.rs (atomic counters, failure streak)
//!
//! Active (background):
//!     active.rs ticker
//!     → probe.rs (one probe per server, hard deadline)
//!     → stats.rs reachability flag
//!     → balancer's reachable subset rebuilt
//! ```
//!
//! # Design Decisions
//! - Circuit breaker and reachability are independent axes
//! - Probing never blocks selection; they share only atomics
//! - Servers are reachable until a probe says otherwise

pub mod active;
pub mod probe;
pub mod registry;
pub mod stats;

pub use active::{ProbeRoundSummary, Prober};
pub use probe::{ConstantProbe, HealthProbe, HttpProbe, ProbeError, TcpProbe};
pub use registry::{HealthRegistry, RegistrySnapshot, ServerSnapshot};
pub use stats::{now_millis, HealthSnapshot, ServerHealth};
