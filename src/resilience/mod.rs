//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt fails:
//!     → retries.rs (is it circuit-tripping? retriable here or elsewhere?)
//!     → health registry records the outcome
//!     → circuit_breaker.rs (blackout window derived from the failure streak)
//!     → RetryTracker decides: same server, next server, or give up
//! ```
//!
//! # Design Decisions
//! - Breaker state is never stored; it is recomputed from counters and the clock
//! - Only failures with no response count toward the breaker
//! - Policies are trait objects so callers can narrow them per request

pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{BlackoutCurve, BlackoutPolicy};
pub use retries::{
    AttemptFailure, DefaultRetryPolicy, RequestSpecificRetryPolicy, RetryDecision, RetryPolicy,
    RetryTracker,
};
