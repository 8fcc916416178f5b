//! Retry classification and budgets.
//!
//! # Responsibilities
//! - Classify an attempt failure as retriable on the same server, on another
//!   server, or not at all
//! - Decide whether a failure counts toward a server's circuit breaker
//! - Drive the caller's retry loop through [`RetryTracker`]
//!
//! # Design Decisions
//! - Failures with no response (refused, timed out, reset) trip the breaker
//! - A response proves the server is up, so it never trips the breaker
//! - Connect failures are only worth retrying on a different server
//! - Throttling responses are only worth retrying on a different server

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::config::schema::RetryConfig;

/// Outcome of a failed attempt, as reported by the caller's transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    /// The connection was refused or the host was unroutable.
    #[error("connection refused")]
    ConnectionRefused,

    /// The connection could not be established in time.
    #[error("connect timed out")]
    ConnectTimeout,

    /// Connected, but no response arrived in time.
    #[error("read timed out")]
    ReadTimeout,

    /// The connection dropped before a response arrived.
    #[error("connection reset")]
    ConnectionReset,

    /// The server answered with an error status.
    #[error("server responded with status {status}")]
    Response { status: u16 },

    /// Anything the transport could not classify.
    #[error("{0}")]
    Other(String),
}

impl AttemptFailure {
    /// True when no response was received from the server.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            AttemptFailure::ConnectionRefused
                | AttemptFailure::ConnectTimeout
                | AttemptFailure::ReadTimeout
                | AttemptFailure::ConnectionReset
        )
    }

    /// True when the request never reached the server, so any request is safe to resend.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            AttemptFailure::ConnectionRefused | AttemptFailure::ConnectTimeout
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AttemptFailure::Response { status } => Some(*status),
            _ => None,
        }
    }

    pub fn is_throttled(&self) -> bool {
        self.status() == Some(429)
    }
}

/// Strategy deciding whether and where a failed attempt is retried.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Whether `failure` is worth retrying on the same server (`same_server`)
    /// or on a different one.
    fn is_retriable(&self, failure: &AttemptFailure, same_server: bool) -> bool;

    /// Whether `failure` counts toward the server's circuit breaker.
    fn is_circuit_tripping_failure(&self, failure: &AttemptFailure) -> bool;

    fn max_retries_same_server(&self) -> u32;

    fn max_retries_other_servers(&self) -> u32;
}

/// Policy driven by [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct DefaultRetryPolicy {
    max_same: u32,
    max_other: u32,
    retry_on_all_errors: bool,
    retriable_statuses: Vec<u16>,
}

impl DefaultRetryPolicy {
    pub fn new(max_same: u32, max_other: u32) -> Self {
        Self {
            max_same,
            max_other,
            retry_on_all_errors: false,
            retriable_statuses: RetryConfig::default().retriable_status_codes,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_same: config.max_retries_same_server,
            max_other: config.max_retries_other_servers,
            retry_on_all_errors: config.retry_on_all_errors,
            retriable_statuses: config.retriable_status_codes.clone(),
        }
    }

    pub fn with_retriable_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.retriable_statuses = statuses;
        self
    }

    pub fn with_retry_on_all_errors(mut self, enabled: bool) -> Self {
        self.retry_on_all_errors = enabled;
        self
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn is_retriable(&self, failure: &AttemptFailure, same_server: bool) -> bool {
        if self.retry_on_all_errors {
            return true;
        }
        match failure {
            // The server is likely down; try elsewhere.
            AttemptFailure::ConnectionRefused | AttemptFailure::ConnectTimeout => !same_server,
            AttemptFailure::ReadTimeout | AttemptFailure::ConnectionReset => true,
            AttemptFailure::Response { status: 429 } => !same_server,
            AttemptFailure::Response { status } => {
                !same_server && self.retriable_statuses.contains(status)
            }
            AttemptFailure::Other(_) => false,
        }
    }

    fn is_circuit_tripping_failure(&self, failure: &AttemptFailure) -> bool {
        failure.is_connection_failure()
    }

    fn max_retries_same_server(&self) -> u32 {
        self.max_same
    }

    fn max_retries_other_servers(&self) -> u32 {
        self.max_other
    }
}

/// Narrows or widens a fallback policy for one kind of request.
///
/// A non-idempotent request, for example, should only be resent when it
/// provably never reached the server.
#[derive(Debug, Clone)]
pub struct RequestSpecificRetryPolicy {
    fallback: Arc<dyn RetryPolicy>,
    ok_to_retry_on_connect_errors: bool,
    ok_to_retry_on_all_errors: bool,
}

impl RequestSpecificRetryPolicy {
    pub fn new(
        fallback: Arc<dyn RetryPolicy>,
        ok_to_retry_on_connect_errors: bool,
        ok_to_retry_on_all_errors: bool,
    ) -> Self {
        Self {
            fallback,
            ok_to_retry_on_connect_errors,
            ok_to_retry_on_all_errors,
        }
    }

    /// Retries only failures that happened before the request was sent.
    pub fn non_idempotent(fallback: Arc<dyn RetryPolicy>) -> Self {
        Self::new(fallback, true, false)
    }
}

impl RetryPolicy for RequestSpecificRetryPolicy {
    fn is_retriable(&self, failure: &AttemptFailure, same_server: bool) -> bool {
        if self.ok_to_retry_on_all_errors {
            return true;
        }
        if failure.is_throttled() {
            return !same_server;
        }
        self.ok_to_retry_on_connect_errors
            && failure.is_connect_failure()
            && self.fallback.is_retriable(failure, same_server)
    }

    fn is_circuit_tripping_failure(&self, failure: &AttemptFailure) -> bool {
        self.fallback.is_circuit_tripping_failure(failure)
    }

    fn max_retries_same_server(&self) -> u32 {
        self.fallback.max_retries_same_server()
    }

    fn max_retries_other_servers(&self) -> u32 {
        self.fallback.max_retries_other_servers()
    }
}

/// Next step after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry against the server that just failed.
    SameServer,
    /// Select a new server and retry there.
    NextServer,
    /// Budgets spent or failure not retriable; surface it.
    GiveUp,
}

/// Per-request retry state.
///
/// The same-server budget applies to each server in turn and is reset when
/// the tracker moves on to another server.
#[derive(Debug)]
pub struct RetryTracker<'a> {
    policy: &'a dyn RetryPolicy,
    same_server_retries: u32,
    other_server_retries: u32,
    attempts: u32,
}

impl<'a> RetryTracker<'a> {
    pub fn new(policy: &'a dyn RetryPolicy) -> Self {
        Self {
            policy,
            same_server_retries: 0,
            other_server_retries: 0,
            attempts: 0,
        }
    }

    /// Attempts reported so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn on_failure(&mut self, failure: &AttemptFailure) -> RetryDecision {
        self.attempts += 1;

        if self.same_server_retries < self.policy.max_retries_same_server()
            && self.policy.is_retriable(failure, true)
        {
            self.same_server_retries += 1;
            return RetryDecision::SameServer;
        }

        if self.other_server_retries < self.policy.max_retries_other_servers()
            && self.policy.is_retriable(failure, false)
        {
            self.other_server_retries += 1;
            self.same_server_retries = 0;
            return RetryDecision::NextServer;
        }

        RetryDecision::GiveUp
    }
}
