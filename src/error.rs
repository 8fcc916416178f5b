//! Crate-level error type.

use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::resilience::retries::AttemptFailure;

/// Errors surfaced to callers of the load balancer.
///
/// Only selection failures and exhausted retry budgets cross the request
/// path; probe failures and lost selection races are absorbed internally.
#[derive(Debug, Error)]
pub enum Error {
    /// Selection found no eligible server.
    #[error("no server available from load balancer '{lb}'")]
    NoServerAvailable { lb: String },

    /// Both retry budgets were spent without a successful attempt.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: AttemptFailure },

    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A server list source failed to produce a snapshot.
    #[error("server list source failed: {0}")]
    ServerList(String),
}

impl Error {
    /// True when the error came from selection rather than from attempts.
    pub fn is_no_server_available(&self) -> bool {
        matches!(self, Error::NoServerAvailable { .. })
    }
}

/// Result alias for load balancer operations.
pub type Result<T> = std::result::Result<T, Error>;
