//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Selection, outcome recording, prober rounds:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges via the metrics facade)
//!
//! Consumers:
//!     → Whatever subscriber / recorder the embedding application installs
//! ```

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::install_prometheus_recorder;
