//! Structured logging.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the embedding application, which may call [`init_logging`].

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::ObservabilityConfig;

/// Install a global fmt subscriber. `RUST_LOG` overrides the configured level.
///
/// Fails if a global subscriber has already been set.
pub fn init_logging(
    config: &ObservabilityConfig,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("client_balancer={}", config.log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}
