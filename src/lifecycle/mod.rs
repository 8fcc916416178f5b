//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     LoadBalancer built → list refresher spawned → prober spawned
//!
//! Shutdown (shutdown.rs):
//!     trigger → loops leave their select! → drain with deadline → abort stragglers
//! ```
//!
//! # Design Decisions
//! - Request-path code never waits on lifecycle events
//! - Shutdown has a deadline; stuck tasks are aborted, not awaited forever

pub mod shutdown;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::spawn_background_tasks;
