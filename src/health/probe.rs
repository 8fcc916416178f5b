//! Liveness probes used by the prober.
//!
//! A probe answers one question: is this server alive right now. Probe errors
//! are the prober's concern; it treats every one of them as "unreachable".

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::config::schema::{ProbeConfig, ProbeKind};
use crate::load_balancer::server::Server;

/// Reasons a probe could not return a verdict.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,

    #[error("probe I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),
}

/// Active liveness check against a single server.
#[async_trait]
pub trait HealthProbe: Send + Sync + fmt::Debug {
    async fn probe(&self, server: &Server) -> Result<bool, ProbeError>;
}

/// Always returns the same verdict.
#[derive(Debug, Clone, Copy)]
pub struct ConstantProbe {
    alive: bool,
}

impl ConstantProbe {
    pub fn new(alive: bool) -> Self {
        Self { alive }
    }

    /// Every server is alive; equivalent to probing being disabled.
    pub fn alive() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl HealthProbe for ConstantProbe {
    async fn probe(&self, _server: &Server) -> Result<bool, ProbeError> {
        Ok(self.alive)
    }
}

/// Alive when a TCP connection can be opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn probe(&self, server: &Server) -> Result<bool, ProbeError> {
        TcpStream::connect((server.host(), server.port())).await?;
        Ok(true)
    }
}

/// Alive when `GET http://host:port{path}` answers with a 2xx status.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    path: String,
}

impl HttpProbe {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("client-balancer-probe")
            .no_proxy()
            .build()?;
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Ok(Self { client, path })
    }

    fn url(&self, server: &Server) -> String {
        format!("http://{}{}", server, self.path)
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, server: &Server) -> Result<bool, ProbeError> {
        let response = self.client.get(self.url(server)).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout
            } else {
                ProbeError::Http(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }
}

/// Build the configured probe.
///
/// A disabled probe, or an HTTP client that cannot be built, degrades to
/// [`ConstantProbe::alive`].
pub fn probe_from_config(config: &ProbeConfig) -> Arc<dyn HealthProbe> {
    if !config.enabled {
        return Arc::new(ConstantProbe::alive());
    }
    match config.kind {
        ProbeKind::Constant => Arc::new(ConstantProbe::alive()),
        ProbeKind::Tcp => Arc::new(TcpProbe),
        ProbeKind::Http => match HttpProbe::new(config.path.clone(), config.timeout()) {
            Ok(probe) => Arc::new(probe),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build HTTP probe, assuming all servers alive");
                Arc::new(ConstantProbe::alive())
            }
        },
    }
}
